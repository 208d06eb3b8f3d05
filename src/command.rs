//! Device command catalog
//!
//! Commands are plain table entries: a name, one numeric code per link type and
//! the protocols the device must have declared. Encoding a command produces a
//! Command Data packet whose payload is the 16-bit command code.

use crate::packet::{Frame, PacketId};
use crate::protocol::CapabilityManager;
use crate::types::{GarminError, LinkType, Result};

/// Commands understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartSession,
    GetDeviceDescription,
    AbortTransfer,
    TransferAlmanac,
    TransferPosition,
    TransferProximityWaypoints,
    TransferRoute,
    TransferTime,
    TransferTrackLog,
    TransferWaypoints,
    PowerOff,
    StartPvtData,
    StopPvtData,
    TransferFlightBook,
    TransferLaps,
    TransferWaypointCategories,
    TransferRuns,
    TransferWorkouts,
    TransferWorkoutOccurrences,
    TransferFitnessUserProfile,
    TransferWorkoutLimits,
    TransferCourses,
    TransferCourseLaps,
    TransferCoursePoints,
    TransferCourseTracks,
    TransferCourseLimits,
}

/// Static description of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    /// Command code per link type, indexed by [`LinkType::index`]
    pub codes: [Option<u16>; 2],
    pub required_capabilities: &'static [&'static str],
}

const fn descriptor(
    name: &'static str,
    codes: [Option<u16>; 2],
    required_capabilities: &'static [&'static str],
) -> CommandDescriptor {
    CommandDescriptor {
        name,
        codes,
        required_capabilities,
    }
}

static START_SESSION: CommandDescriptor = descriptor("StartSession", [Some(0x05), None], &[]);
static GET_DEVICE_DESCRIPTION: CommandDescriptor =
    descriptor("GetDeviceDescription", [Some(0xFE), None], &[]);
static ABORT_TRANSFER: CommandDescriptor = descriptor("AbortTransfer", [Some(0), Some(0)], &[]);
static TRANSFER_ALMANAC: CommandDescriptor =
    descriptor("TransferAlmanac", [Some(1), Some(4)], &["almanac"]);
static TRANSFER_POSITION: CommandDescriptor =
    descriptor("TransferPosition", [Some(2), None], &["position"]);
static TRANSFER_PROXIMITY_WAYPOINTS: CommandDescriptor = descriptor(
    "TransferProximityWaypoints",
    [Some(3), Some(17)],
    &["waypoint.proximity"],
);
static TRANSFER_ROUTE: CommandDescriptor =
    descriptor("TransferRoute", [Some(4), Some(8)], &["route"]);
static TRANSFER_TIME: CommandDescriptor =
    descriptor("TransferTime", [Some(5), Some(20)], &["date_time"]);
static TRANSFER_TRACK_LOG: CommandDescriptor =
    descriptor("TransferTrackLog", [Some(6), None], &["track"]);
static TRANSFER_WAYPOINTS: CommandDescriptor =
    descriptor("TransferWaypoints", [Some(7), Some(21)], &["waypoint"]);
static POWER_OFF: CommandDescriptor = descriptor("PowerOff", [Some(8), Some(26)], &[]);
static START_PVT_DATA: CommandDescriptor = descriptor("StartPvtData", [Some(49), None], &["pvt"]);
static STOP_PVT_DATA: CommandDescriptor = descriptor("StopPvtData", [Some(50), None], &["pvt"]);
static TRANSFER_FLIGHT_BOOK: CommandDescriptor =
    descriptor("TransferFlightBook", [Some(92), None], &["flightbook"]);
static TRANSFER_LAPS: CommandDescriptor = descriptor("TransferLaps", [Some(117), None], &["lap"]);
static TRANSFER_WAYPOINT_CATEGORIES: CommandDescriptor = descriptor(
    "TransferWaypointCategories",
    [Some(121), None],
    &["waypoint.category"],
);
static TRANSFER_RUNS: CommandDescriptor = descriptor("TransferRuns", [Some(450), None], &["run"]);
static TRANSFER_WORKOUTS: CommandDescriptor =
    descriptor("TransferWorkouts", [Some(451), None], &["workout"]);
static TRANSFER_WORKOUT_OCCURRENCES: CommandDescriptor = descriptor(
    "TransferWorkoutOccurrences",
    [Some(452), None],
    &["workout.occurrence"],
);
static TRANSFER_FITNESS_USER_PROFILE: CommandDescriptor =
    descriptor("TransferFitnessUserProfile", [Some(453), None], &["fitness"]);
static TRANSFER_WORKOUT_LIMITS: CommandDescriptor =
    descriptor("TransferWorkoutLimits", [Some(454), None], &["workout.limits"]);
static TRANSFER_COURSES: CommandDescriptor =
    descriptor("TransferCourses", [Some(561), None], &["course"]);
static TRANSFER_COURSE_LAPS: CommandDescriptor =
    descriptor("TransferCourseLaps", [Some(562), None], &["course.lap"]);
static TRANSFER_COURSE_POINTS: CommandDescriptor =
    descriptor("TransferCoursePoints", [Some(563), None], &["course.point"]);
static TRANSFER_COURSE_TRACKS: CommandDescriptor =
    descriptor("TransferCourseTracks", [Some(564), None], &["course.track"]);
static TRANSFER_COURSE_LIMITS: CommandDescriptor =
    descriptor("TransferCourseLimits", [Some(565), None], &["course.limits"]);

impl Command {
    pub const ALL: [Command; 26] = [
        Command::StartSession,
        Command::GetDeviceDescription,
        Command::AbortTransfer,
        Command::TransferAlmanac,
        Command::TransferPosition,
        Command::TransferProximityWaypoints,
        Command::TransferRoute,
        Command::TransferTime,
        Command::TransferTrackLog,
        Command::TransferWaypoints,
        Command::PowerOff,
        Command::StartPvtData,
        Command::StopPvtData,
        Command::TransferFlightBook,
        Command::TransferLaps,
        Command::TransferWaypointCategories,
        Command::TransferRuns,
        Command::TransferWorkouts,
        Command::TransferWorkoutOccurrences,
        Command::TransferFitnessUserProfile,
        Command::TransferWorkoutLimits,
        Command::TransferCourses,
        Command::TransferCourseLaps,
        Command::TransferCoursePoints,
        Command::TransferCourseTracks,
        Command::TransferCourseLimits,
    ];

    pub fn descriptor(self) -> &'static CommandDescriptor {
        match self {
            Command::StartSession => &START_SESSION,
            Command::GetDeviceDescription => &GET_DEVICE_DESCRIPTION,
            Command::AbortTransfer => &ABORT_TRANSFER,
            Command::TransferAlmanac => &TRANSFER_ALMANAC,
            Command::TransferPosition => &TRANSFER_POSITION,
            Command::TransferProximityWaypoints => &TRANSFER_PROXIMITY_WAYPOINTS,
            Command::TransferRoute => &TRANSFER_ROUTE,
            Command::TransferTime => &TRANSFER_TIME,
            Command::TransferTrackLog => &TRANSFER_TRACK_LOG,
            Command::TransferWaypoints => &TRANSFER_WAYPOINTS,
            Command::PowerOff => &POWER_OFF,
            Command::StartPvtData => &START_PVT_DATA,
            Command::StopPvtData => &STOP_PVT_DATA,
            Command::TransferFlightBook => &TRANSFER_FLIGHT_BOOK,
            Command::TransferLaps => &TRANSFER_LAPS,
            Command::TransferWaypointCategories => &TRANSFER_WAYPOINT_CATEGORIES,
            Command::TransferRuns => &TRANSFER_RUNS,
            Command::TransferWorkouts => &TRANSFER_WORKOUTS,
            Command::TransferWorkoutOccurrences => &TRANSFER_WORKOUT_OCCURRENCES,
            Command::TransferFitnessUserProfile => &TRANSFER_FITNESS_USER_PROFILE,
            Command::TransferWorkoutLimits => &TRANSFER_WORKOUT_LIMITS,
            Command::TransferCourses => &TRANSFER_COURSES,
            Command::TransferCourseLaps => &TRANSFER_COURSE_LAPS,
            Command::TransferCoursePoints => &TRANSFER_COURSE_POINTS,
            Command::TransferCourseTracks => &TRANSFER_COURSE_TRACKS,
            Command::TransferCourseLimits => &TRANSFER_COURSE_LIMITS,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Encode the command for the device
    ///
    /// Session start and the product request are sent before negotiation and
    /// never look at the capabilities.
    pub fn encode(self, link: LinkType, capabilities: &CapabilityManager) -> Result<Frame> {
        match self {
            Command::StartSession => Ok(Self::start_session()),
            Command::GetDeviceDescription => Ok(Self::device_description()),
            _ => self.descriptor().encode(link, capabilities),
        }
    }

    /// USB layer Start Session packet
    pub fn start_session() -> Frame {
        Frame::basic(PacketId::StartSession.code(), Vec::new())
    }

    /// Product Request packet
    pub fn device_description() -> Frame {
        Frame::application(PacketId::ProductRequest.code(), Vec::new())
    }
}

impl CommandDescriptor {
    /// Command code for a link type, if the command exists on that link
    pub fn code(&self, link: LinkType) -> Option<u16> {
        self.codes[link.index()]
    }

    /// Resolve the code, check capabilities and build the Command Data packet
    pub fn encode(&self, link: LinkType, capabilities: &CapabilityManager) -> Result<Frame> {
        let code = self
            .code(link)
            .ok_or(GarminError::UnsupportedCommand {
                command: self.name,
                link,
            })?;

        if let Some(missing) = self
            .required_capabilities
            .iter()
            .find(|name| !capabilities.supports(name))
        {
            return Err(GarminError::Capability {
                capability: missing.to_string(),
            });
        }

        Ok(Frame::application(
            link.command_packet_id(),
            code.to_le_bytes().to_vec(),
        ))
    }
}
