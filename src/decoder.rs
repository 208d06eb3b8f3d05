//! Record decoding
//!
//! [`RecordDecoder`] maps a packet id to the function that decodes its payload.
//! Decoders for versioned records ask the [`CapabilityManager`] which datatype the
//! device negotiated and refuse layouts they do not implement.

use crate::packet::{Frame, PacketId};
use crate::protocol::CapabilityManager;
use crate::reader::Cursor;
use crate::records::{
    ActivityProfile, AlmanacEntry, CourseLimits, CourseRecord, FitnessUserProfile,
    HeartRateZone, Lap, Position, ProductInfo, QuickWorkout, Run, SpeedZone, TrackHeader,
    TrackPoint, Workout, WorkoutLimits, WorkoutOccurrence, WorkoutStep,
};
use crate::types::{GarminError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Step slots always present in a D1008 workout
pub const WORKOUT_STEP_SLOTS: usize = 20;

const NAME_FIELD_LEN: usize = 16;
const HEART_RATE_ZONES: usize = 5;
const SPEED_ZONES: usize = 10;

/// A decoded packet payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    ULong(u32),
    UShort(u16),
    DateTime(DateTime<Utc>),
    Position(Position),
    ProductData(ProductInfo),
    ExtendedProductData(Vec<String>),
    ProtocolArray(CapabilityManager),
    Run(Run),
    Lap(Lap),
    Workout(Workout),
    WorkoutOccurrence(WorkoutOccurrence),
    WorkoutLimits(WorkoutLimits),
    FitnessUserProfile(FitnessUserProfile),
    TrackHeader(TrackHeader),
    TrackPoint(TrackPoint),
    Almanac(AlmanacEntry),
    CourseLimits(CourseLimits),
    Course(CourseRecord),
    Unknown { packet_id: u16, payload: Vec<u8> },
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::ULong(_) => "ulong",
            Value::UShort(_) => "ushort",
            Value::DateTime(_) => "date_time",
            Value::Position(_) => "position",
            Value::ProductData(_) => "product_data",
            Value::ExtendedProductData(_) => "extended_product_data",
            Value::ProtocolArray(_) => "protocol_array",
            Value::Run(_) => "run",
            Value::Lap(_) => "lap",
            Value::Workout(_) => "workout",
            Value::WorkoutOccurrence(_) => "workout_occurrence",
            Value::WorkoutLimits(_) => "workout_limits",
            Value::FitnessUserProfile(_) => "fitness_user_profile",
            Value::TrackHeader(_) => "track_header",
            Value::TrackPoint(_) => "track_data",
            Value::Almanac(_) => "almanac",
            Value::CourseLimits(_) => "course_limits",
            Value::Course(_) => "course",
            Value::Unknown { .. } => "unknown",
        }
    }
}

/// Extract a typed record from a decoded [`Value`]
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! impl_from_value {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(GarminError::Protocol(format!(
                            "Expected {} record, got {}",
                            stringify!($variant),
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

impl_from_value! {
    ULong => u32,
    UShort => u16,
    DateTime => DateTime<Utc>,
    Position => Position,
    ProductData => ProductInfo,
    ExtendedProductData => Vec<String>,
    ProtocolArray => CapabilityManager,
    Run => Run,
    Lap => Lap,
    Workout => Workout,
    WorkoutOccurrence => WorkoutOccurrence,
    WorkoutLimits => WorkoutLimits,
    FitnessUserProfile => FitnessUserProfile,
    TrackHeader => TrackHeader,
    TrackPoint => TrackPoint,
    Almanac => AlmanacEntry,
    CourseLimits => CourseLimits,
    Course => CourseRecord,
}

/// Packet id to decoder registry
pub struct RecordDecoder;

impl RecordDecoder {
    /// Decode a payload by packet id
    ///
    /// Ids without a decoder come back as [`Value::Unknown`]; the stream consumer
    /// decides whether that is acceptable.
    pub fn decode(packet_id: u16, payload: &[u8], caps: &CapabilityManager) -> Result<Value> {
        let c = &mut Cursor::new(payload);
        let value = match PacketId::from_u16(packet_id) {
            Some(PacketId::SessionStarted) => Value::ULong(c.read_u32()?),
            Some(PacketId::TransferComplete) | Some(PacketId::Records) => {
                Value::UShort(c.read_u16()?)
            }
            Some(PacketId::DateTime) => Value::DateTime(decode_date_time(c, caps)?),
            Some(PacketId::PositionData) => Value::Position(c.read_position()?),
            Some(PacketId::ProductData) => Value::ProductData(decode_product_data(c)?),
            Some(PacketId::ExtendedProductData) => Value::ExtendedProductData(c.read_strings()?),
            Some(PacketId::ProtocolArray) => {
                Value::ProtocolArray(CapabilityManager::parse(payload)?)
            }
            Some(PacketId::Run) => Value::Run(decode_run(c, caps)?),
            Some(PacketId::Lap) => Value::Lap(decode_lap(c, caps)?),
            Some(PacketId::Workout) => Value::Workout(decode_workout(c, caps)?),
            Some(PacketId::WorkoutOccurrence) => {
                Value::WorkoutOccurrence(decode_workout_occurrence(c, caps)?)
            }
            Some(PacketId::WorkoutLimits) => Value::WorkoutLimits(decode_workout_limits(c, caps)?),
            Some(PacketId::FitnessUserProfile) => {
                Value::FitnessUserProfile(decode_fitness_user_profile(c, caps)?)
            }
            Some(PacketId::TrackHeader) => Value::TrackHeader(decode_track_header(c, caps)?),
            Some(PacketId::TrackData) => Value::TrackPoint(decode_track_data(c, caps)?),
            Some(PacketId::AlmanacData) => Value::Almanac(decode_almanac(c, caps)?),
            Some(PacketId::CourseLimits) => Value::CourseLimits(decode_course_limits(c, caps)?),
            Some(PacketId::Course) => decode_course(c, caps, "course", &[1006])?,
            Some(PacketId::CourseLap) => decode_course(c, caps, "course.lap", &[1007])?,
            Some(PacketId::CoursePoint) => decode_course(c, caps, "course.point", &[1012])?,
            Some(PacketId::CourseTrackHeader) => {
                decode_course(c, caps, "course.track.header", &[310, 311, 312])?
            }
            Some(PacketId::CourseTrackData) => {
                decode_course(c, caps, "course.track.data", &[302, 304])?
            }
            _ => {
                warn!("Unknown packet with id [{:04X}] ({})", packet_id, packet_id);
                Value::Unknown {
                    packet_id,
                    payload: payload.to_vec(),
                }
            }
        };

        Ok(value)
    }

    pub fn decode_frame(frame: &Frame, caps: &CapabilityManager) -> Result<Value> {
        Self::decode(frame.packet_id(), frame.payload(), caps)
    }
}

/// Date and time (D600)
pub fn decode_date_time(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<DateTime<Utc>> {
    caps.datatype_for("date_time", &[600])?;

    let month = c.read_u8()?;
    let day = c.read_u8()?;
    let year = c.read_u16()?;
    let hour = c.read_u16()?;
    let minute = c.read_u8()?;
    let second = c.read_u8()?;

    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            GarminError::Protocol(format!(
                "Invalid device time {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        })
}

/// Product Data (A000)
pub fn decode_product_data(c: &mut Cursor<'_>) -> Result<ProductInfo> {
    let product_id = c.read_u16()?;
    let software_version = c.read_i16()?;
    let description = c.read_string()?;
    let extra = c.read_strings()?;

    Ok(ProductInfo {
        product_id,
        software_version,
        description,
        extra,
    })
}

/// Run (D1009)
pub fn decode_run(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<Run> {
    caps.datatype_for("run", &[1009])?;

    let track_index = c.read_u16()?;
    let first_lap_index = c.read_u16()?;
    let last_lap_index = c.read_u16()?;
    let sport_type = c.read_u8()?;
    let program_type = c.read_u8()?;
    let multisport = c.read_u8()?;
    c.skip(3)?; // unused1, unused2

    let quick_workout = QuickWorkout {
        time: c.read_u32()?,
        distance: c.read_f32()?,
    };

    // Runs always embed a D1008 workout, whatever the workout protocol says
    let workout = read_workout_body(c)?;

    Ok(Run {
        track_index,
        first_lap_index,
        last_lap_index,
        sport_type,
        program_type,
        multisport,
        quick_workout,
        workout,
    })
}

/// Lap (D1011, D1015)
pub fn decode_lap(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<Lap> {
    caps.datatype_for("lap", &[1011, 1015])?;

    let index = c.read_u16()?;
    c.skip(2)?;
    let start_time = c.read_time()?;
    let total_time = c.read_u32()?;
    let total_distance = c.read_f32()?;
    let max_speed = c.read_f32()?;
    let begin = c.read_position()?;
    let end = c.read_position()?;
    let calories = c.read_u16()?;
    let avg_heart_rate = c.read_u8()?;
    let max_heart_rate = c.read_u8()?;
    let intensity = c.read_u8()?;
    let avg_cadence = c.read_u8()?;
    let trigger_method = c.read_u8()?;
    // D1015 appends five undocumented bytes

    Ok(Lap {
        index,
        start_time,
        total_time,
        total_distance,
        max_speed,
        begin,
        end,
        calories,
        avg_heart_rate,
        max_heart_rate,
        intensity,
        avg_cadence,
        trigger_method,
    })
}

/// Workout (D1008)
pub fn decode_workout(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<Workout> {
    caps.datatype_for("workout", &[1008])?;
    read_workout_body(c)
}

fn read_workout_body(c: &mut Cursor<'_>) -> Result<Workout> {
    let valid_step_count = c.read_u32()?;

    let mut steps = Vec::with_capacity(WORKOUT_STEP_SLOTS);
    for _ in 0..WORKOUT_STEP_SLOTS {
        let custom_name = c.read_fixed_string(NAME_FIELD_LEN)?;
        let target_custom_zone_low = c.read_f32()?;
        let target_custom_zone_high = c.read_f32()?;
        let duration_value = c.read_u16()?;
        let intensity = c.read_u8()?;
        let duration_type = c.read_u8()?;
        let target_type = c.read_u8()?;
        let target_value = c.read_u8()?;
        c.skip(2)?;

        steps.push(WorkoutStep {
            custom_name,
            target_custom_zone_low,
            target_custom_zone_high,
            duration_value,
            intensity,
            duration_type,
            target_type,
            target_value,
        });
    }
    steps.truncate((valid_step_count as usize).min(WORKOUT_STEP_SLOTS));

    let name = c.read_fixed_string(NAME_FIELD_LEN)?;
    let sport_type = c.read_u8()?;

    Ok(Workout {
        valid_step_count,
        steps,
        name,
        sport_type,
    })
}

/// Workout Occurrence (D1003)
pub fn decode_workout_occurrence(
    c: &mut Cursor<'_>,
    caps: &CapabilityManager,
) -> Result<WorkoutOccurrence> {
    caps.datatype_for("workout.occurrence", &[1003])?;

    Ok(WorkoutOccurrence {
        workout_name: c.read_fixed_string(NAME_FIELD_LEN)?,
        day: c.read_time()?,
    })
}

/// Workout Limits (D1005)
pub fn decode_workout_limits(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<WorkoutLimits> {
    caps.datatype_for("workout.limits", &[1005])?;

    Ok(WorkoutLimits {
        max_workouts: c.read_u32()?,
        max_unscheduled_workouts: c.read_u32()?,
        max_occurrences: c.read_u32()?,
    })
}

/// Fitness User Profile (D1004)
pub fn decode_fitness_user_profile(
    c: &mut Cursor<'_>,
    caps: &CapabilityManager,
) -> Result<FitnessUserProfile> {
    caps.datatype_for("fitness", &[1004])?;

    let running = read_activity_profile(c)?;
    let biking = read_activity_profile(c)?;
    let other = read_activity_profile(c)?;

    let weight = c.read_f32()?;
    let birth_year = c.read_u16()?;
    let birth_month = c.read_u8()?;
    let birth_day = c.read_u8()?;
    let gender = c.read_u8()?;

    Ok(FitnessUserProfile {
        running,
        biking,
        other,
        weight,
        birth_year,
        birth_month,
        birth_day,
        gender,
    })
}

fn read_activity_profile(c: &mut Cursor<'_>) -> Result<ActivityProfile> {
    let mut heart_rate_zones = Vec::with_capacity(HEART_RATE_ZONES);
    for _ in 0..HEART_RATE_ZONES {
        let low_heart_rate = c.read_u8()?;
        let high_heart_rate = c.read_u8()?;
        c.skip(2)?;
        heart_rate_zones.push(HeartRateZone {
            low_heart_rate,
            high_heart_rate,
        });
    }

    let mut speed_zones = Vec::with_capacity(SPEED_ZONES);
    for _ in 0..SPEED_ZONES {
        speed_zones.push(SpeedZone {
            low_speed: c.read_f32()?,
            high_speed: c.read_f32()?,
            name: c.read_fixed_string(NAME_FIELD_LEN)?,
        });
    }

    let gear_weight = c.read_f32()?;
    let max_heart_rate = c.read_u8()?;
    c.skip(3)?;

    Ok(ActivityProfile {
        heart_rate_zones,
        speed_zones,
        gear_weight,
        max_heart_rate,
    })
}

/// Track header (D310, D311, D312)
pub fn decode_track_header(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<TrackHeader> {
    match caps.datatype_for("track.header", &[310, 311, 312])? {
        311 => Ok(TrackHeader::Index(c.read_u16()?)),
        _ => Ok(TrackHeader::Identified {
            display: c.read_bool()?,
            color: c.read_u8()?,
            identifier: c.read_string()?,
        }),
    }
}

/// Track point (D304)
pub fn decode_track_data(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<TrackPoint> {
    caps.datatype_for("track.data", &[304])?;

    Ok(TrackPoint {
        position: c.read_position()?,
        time: c.read_time()?,
        altitude: c.read_f32()?,
        distance: c.read_f32()?,
        heart_rate: c.read_u8()?,
        cadence: c.read_u8()?,
        sensor: c.read_bool()?,
    })
}

/// Almanac (D501)
pub fn decode_almanac(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<AlmanacEntry> {
    caps.datatype_for("almanac", &[501])?;

    Ok(AlmanacEntry {
        week_number: c.read_u16()?,
        toa: c.read_f32()?,
        af0: c.read_f32()?,
        af1: c.read_f32()?,
        eccentricity: c.read_f32()?,
        sqrta: c.read_f32()?,
        m0: c.read_f32()?,
        w: c.read_f32()?,
        omg0: c.read_f32()?,
        odot: c.read_f32()?,
        inclination: c.read_f32()?,
        health: c.read_u8()?,
    })
}

/// Course Limits (D1013)
pub fn decode_course_limits(c: &mut Cursor<'_>, caps: &CapabilityManager) -> Result<CourseLimits> {
    caps.datatype_for("course.limits", &[1013])?;

    Ok(CourseLimits {
        max_courses: c.read_u32()?,
        max_course_laps: c.read_u32()?,
        max_course_points: c.read_u32()?,
        max_course_track_points: c.read_u32()?,
    })
}

/// Course family records: datatype check only, payload kept raw
fn decode_course(
    c: &mut Cursor<'_>,
    caps: &CapabilityManager,
    name: &str,
    allowed: &[u16],
) -> Result<Value> {
    let datatype = caps.datatype_for(name, allowed)?;
    let payload = c.read_bytes(c.remaining())?.to_vec();
    Ok(Value::Course(CourseRecord { datatype, payload }))
}
