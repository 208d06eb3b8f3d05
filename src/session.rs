//! Session controller
//!
//! A [`Session`] owns the claimed channel and the negotiated capabilities. Each
//! operation sends one command, then reads frames until the matching stream
//! consumer completes. Composite downloads chain several such exchanges.
//!
//! The channel is closed when the session is dropped, whatever path leads there.

use crate::command::Command;
use crate::decoder::{FromValue, RecordDecoder, Value};
use crate::packet::{hex_dump, Frame, PacketId};
use crate::protocol::CapabilityManager;
use crate::records::{
    AlmanacEntry, CourseLimits, CourseRecord, CourseTrack, DeviceCapabilities,
    FitnessUserProfile, Lap, Position, ProductInfo, Run, RunHistory, TrackHeader, TrackLog,
    TrackPoint, Workout, WorkoutLimits, WorkoutOccurrence,
};
use crate::stream::{
    CapabilityNegotiation, Consumer, Group, GroupedList, RecordList, SingleRecord, Step,
};
use crate::transport::{Channel, Transport};
use crate::types::{GarminError, LinkType, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest payload prefix written to the debug log
const LOG_DUMP_LEN: usize = 64;

/// Configuration for a device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on each frame read
    #[serde(with = "millis")]
    pub read_timeout: Duration,

    /// Bound on each frame write
    #[serde(with = "millis")]
    pub write_timeout: Duration,

    /// Largest frame requested from the channel in one read
    pub max_packet_size: usize,

    /// How many Start Session packets to write before waiting for the reply
    pub start_session_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(3000),
            write_timeout: Duration::from_millis(3000),
            max_packet_size: 1024,
            start_session_attempts: 1,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A half-duplex conversation with one device
pub struct Session<C: Channel> {
    channel: C,
    config: SessionConfig,
    capabilities: Option<CapabilityManager>,
    product: Option<ProductInfo>,
    extended_product_data: Vec<String>,
    unit_id: Option<u32>,
}

impl<C: Channel> Session<C> {
    /// Claim a channel from the transport
    pub fn open<T>(transport: &mut T, config: SessionConfig) -> Result<Self>
    where
        T: Transport<Channel = C>,
    {
        let channel = transport.open()?;
        Ok(Self::new(channel, config))
    }

    /// Wrap an already claimed channel
    pub fn new(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            capabilities: None,
            product: None,
            extended_product_data: Vec::new(),
            unit_id: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Capabilities from the last successful negotiation
    pub fn capabilities(&self) -> Option<&CapabilityManager> {
        self.capabilities.as_ref()
    }

    pub fn product(&self) -> Option<&ProductInfo> {
        self.product.as_ref()
    }

    pub fn extended_product_data(&self) -> &[String] {
        &self.extended_product_data
    }

    /// Unit id reported when the session started
    pub fn unit_id(&self) -> Option<u32> {
        self.unit_id
    }

    /// Link type from the negotiated link protocol
    pub fn link_type(&self) -> Result<LinkType> {
        self.negotiated()?.link_type()
    }

    fn negotiated(&self) -> Result<&CapabilityManager> {
        self.capabilities.as_ref().ok_or_else(|| {
            GarminError::Protocol("Device capabilities have not been negotiated".to_string())
        })
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        debug!("Sending {}", frame);
        debug!("Raw frame: {}", hex_dump(&frame.encode(), LOG_DUMP_LEN));
        self.channel.write(&frame.encode(), self.config.write_timeout)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let data = self
            .channel
            .read(self.config.max_packet_size, self.config.read_timeout)?;
        debug!("Received {} bytes: {}", data.len(), hex_dump(&data, LOG_DUMP_LEN));
        let frame = Frame::decode(&data)?;
        debug!("Received {}", frame);
        Ok(frame)
    }

    /// Encode and write a command
    ///
    /// Everything except the session start and the product request needs
    /// negotiated capabilities.
    pub fn send(&mut self, command: Command) -> Result<()> {
        let frame = match command {
            Command::StartSession => Command::start_session(),
            Command::GetDeviceDescription => Command::device_description(),
            _ => {
                let capabilities = self.negotiated()?;
                command.encode(capabilities.link_type()?, capabilities)?
            }
        };
        debug!("Command {}", command.name());
        self.write_frame(&frame)
    }

    /// Drive a consumer with frames until it finishes
    ///
    /// Exactly one read per step. USB layer Data Available notices carry no
    /// record and are skipped. Only packets the consumer accepts are decoded.
    pub fn run<R: Consumer>(&mut self, mut consumer: R) -> Result<R::Output> {
        let empty = CapabilityManager::default();

        loop {
            let frame = self.read_frame()?;
            if frame.is_usb_layer() && frame.packet_id() == PacketId::DataAvailable.code() {
                debug!("Skipping DATA_AVAILABLE notice");
                continue;
            }

            let packet_id = frame.packet_id();
            let value = if consumer.accepts(packet_id) {
                let capabilities = self.capabilities.as_ref().unwrap_or(&empty);
                RecordDecoder::decode_frame(&frame, capabilities)?
            } else {
                // Left undecoded; the consumer reports the unexpected id
                Value::Unknown {
                    packet_id,
                    payload: frame.into_payload(),
                }
            };

            match consumer.feed(packet_id, value) {
                Step::Continue => continue,
                Step::Done(output) => return Ok(output),
                Step::Fail(err) => return Err(err),
            }
        }
    }

    /// Send a command and collect its response
    fn transfer<R: Consumer>(&mut self, command: Command, consumer: R) -> Result<R::Output> {
        let result = self.send(command).and_then(|()| self.run(consumer));
        if let Err(err) = &result {
            error!("{} aborted: {}", command.name(), err);
        }
        result
    }

    fn single<T: FromValue>(&mut self, command: Command, packet: PacketId) -> Result<T> {
        let value = self.transfer(command, SingleRecord::new(packet.code()))?;
        T::from_value(value)
    }

    fn records<T: FromValue>(&mut self, command: Command, packet: PacketId) -> Result<Vec<T>> {
        let values = self.transfer(command, RecordList::new(packet.code()))?;
        values.into_iter().map(T::from_value).collect()
    }

    fn groups(&mut self, command: Command, header: PacketId, data: PacketId) -> Result<Vec<Group>> {
        self.transfer(command, GroupedList::new(header.code(), data.code()))
    }

    /// Start the session and return the device unit id
    pub fn start_session(&mut self) -> Result<u32> {
        let frame = Command::start_session();
        for _ in 0..self.config.start_session_attempts.max(1) {
            self.write_frame(&frame)?;
        }

        let result = self
            .run(SingleRecord::new(PacketId::SessionStarted.code()))
            .and_then(u32::from_value);
        let unit_id = match result {
            Ok(unit_id) => unit_id,
            Err(err) => {
                error!("Session start aborted: {}", err);
                return Err(err);
            }
        };

        info!("Session started with unit id {}", unit_id);
        self.unit_id = Some(unit_id);
        Ok(unit_id)
    }

    /// Request the product description and negotiate capabilities
    pub fn get_device_capabilities(&mut self) -> Result<DeviceCapabilities> {
        let device = self.transfer(Command::GetDeviceDescription, CapabilityNegotiation::new())?;

        info!(
            "Device {} (product {}, software {:.2})",
            device.product.description,
            device.product.product_id,
            device.product.software_version as f32 / 100.0
        );
        let protocols: Vec<String> = device
            .capabilities
            .protocols()
            .map(|(name, code)| format!("{}=A{:03}", name, code))
            .collect();
        info!("Negotiated protocols: {}", protocols.join(", "));

        self.capabilities = Some(device.capabilities.clone());
        self.product = Some(device.product.clone());
        self.extended_product_data = device.extended_product_data.clone();
        Ok(device)
    }

    pub fn get_time(&mut self) -> Result<DateTime<Utc>> {
        self.single(Command::TransferTime, PacketId::DateTime)
    }

    pub fn get_position(&mut self) -> Result<Position> {
        self.single(Command::TransferPosition, PacketId::PositionData)
    }

    pub fn get_almanac(&mut self) -> Result<Vec<AlmanacEntry>> {
        self.records(Command::TransferAlmanac, PacketId::AlmanacData)
    }

    /// Workouts followed by their scheduled occurrences
    pub fn get_workouts(&mut self) -> Result<(Vec<Workout>, Vec<WorkoutOccurrence>)> {
        let workouts: Vec<Workout> = self.records(Command::TransferWorkouts, PacketId::Workout)?;
        for workout in &workouts {
            debug!("Workout {} with {} steps", workout.name, workout.steps.len());
        }
        let occurrences = self.get_workout_occurrences()?;
        Ok((workouts, occurrences))
    }

    pub fn get_workout_occurrences(&mut self) -> Result<Vec<WorkoutOccurrence>> {
        self.records(Command::TransferWorkoutOccurrences, PacketId::WorkoutOccurrence)
    }

    pub fn get_fitness_profile(&mut self) -> Result<FitnessUserProfile> {
        self.single(Command::TransferFitnessUserProfile, PacketId::FitnessUserProfile)
    }

    pub fn get_workout_limits(&mut self) -> Result<WorkoutLimits> {
        self.single(Command::TransferWorkoutLimits, PacketId::WorkoutLimits)
    }

    pub fn get_course_limits(&mut self) -> Result<CourseLimits> {
        self.single(Command::TransferCourseLimits, PacketId::CourseLimits)
    }

    pub fn get_courses(&mut self) -> Result<Vec<CourseRecord>> {
        self.records(Command::TransferCourses, PacketId::Course)
    }

    pub fn get_course_laps(&mut self) -> Result<Vec<CourseRecord>> {
        self.records(Command::TransferCourseLaps, PacketId::CourseLap)
    }

    pub fn get_course_points(&mut self) -> Result<Vec<CourseRecord>> {
        self.records(Command::TransferCoursePoints, PacketId::CoursePoint)
    }

    pub fn get_course_tracks(&mut self) -> Result<Vec<CourseTrack>> {
        self.groups(
            Command::TransferCourseTracks,
            PacketId::CourseTrackHeader,
            PacketId::CourseTrackData,
        )?
        .into_iter()
        .map(|group| -> Result<CourseTrack> {
            Ok(CourseTrack {
                header: group.header.map(CourseRecord::from_value).transpose()?,
                points: collect(group.data)?,
            })
        })
        .collect()
    }

    /// Runs, then all laps, then the track log
    pub fn get_runs(&mut self) -> Result<RunHistory> {
        let runs: Vec<Run> = self.records(Command::TransferRuns, PacketId::Run)?;
        let laps = self.get_laps()?;
        let tracks = self.get_track_log()?;
        info!(
            "Downloaded {} runs, {} laps, {} tracks",
            runs.len(),
            laps.len(),
            tracks.len()
        );
        Ok(RunHistory { runs, laps, tracks })
    }

    pub fn get_laps(&mut self) -> Result<Vec<Lap>> {
        self.records(Command::TransferLaps, PacketId::Lap)
    }

    pub fn get_track_log(&mut self) -> Result<Vec<TrackLog>> {
        self.groups(
            Command::TransferTrackLog,
            PacketId::TrackHeader,
            PacketId::TrackData,
        )?
        .into_iter()
        .map(|group| -> Result<TrackLog> {
            Ok(TrackLog {
                header: group.header.map(TrackHeader::from_value).transpose()?,
                points: collect::<TrackPoint>(group.data)?,
            })
        })
        .collect()
    }

    /// Ask the device to switch itself off. No response follows.
    pub fn power_off(&mut self) -> Result<()> {
        self.send(Command::PowerOff)
    }

    /// Cancel the transfer in progress on the device side
    pub fn abort_transfer(&mut self) -> Result<()> {
        self.send(Command::AbortTransfer)
    }
}

impl<C: Channel> Drop for Session<C> {
    fn drop(&mut self) {
        debug!("Closing device channel");
        self.channel.close();
    }
}

fn collect<T: FromValue>(values: Vec<Value>) -> Result<Vec<T>> {
    values.into_iter().map(T::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::{ScriptedChannel, ScriptedTransport};
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn app(id: PacketId, payload: Vec<u8>) -> Frame {
        Frame::application(id.code(), payload)
    }

    fn records(count: u16) -> Frame {
        app(PacketId::Records, count.to_le_bytes().to_vec())
    }

    fn complete(command: u16) -> Frame {
        app(PacketId::TransferComplete, command.to_le_bytes().to_vec())
    }

    fn protocol_array(triples: &[(u8, u16)]) -> Vec<u8> {
        let mut payload = Vec::new();
        for &(tag, value) in triples {
            payload.push(tag);
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    /// Product data, one extended string and a protocol array
    fn negotiation(channel: ScriptedChannel, triples: &[(u8, u16)]) -> ScriptedChannel {
        let mut product = Vec::new();
        product.extend_from_slice(&484u16.to_le_bytes());
        product.extend_from_slice(&280i16.to_le_bytes());
        product.extend_from_slice(b"Forerunner305 Software Version 2.80\0");

        channel
            .respond(app(PacketId::ProductData, product))
            .respond(app(
                PacketId::ExtendedProductData,
                b"PREDEFINED_ACTIVITY_PROFILES\0".to_vec(),
            ))
            .respond(app(PacketId::ProtocolArray, protocol_array(triples)))
    }

    const FORERUNNER: &[(u8, u16)] = &[
        (b'P', 0),
        (b'L', 1),
        (b'A', 10),
        (b'A', 302),
        (b'D', 311),
        (b'D', 304),
        (b'A', 600),
        (b'D', 600),
        (b'A', 700),
        (b'D', 700),
        (b'A', 906),
        (b'D', 1015),
        (b'A', 1005),
        (b'D', 1005),
        (b'A', 1012),
        (b'D', 311),
        (b'D', 304),
    ];

    struct Harness {
        session: Session<ScriptedChannel>,
        written: Rc<RefCell<Vec<Frame>>>,
        closed: Rc<Cell<u32>>,
    }

    fn harness(channel: ScriptedChannel) -> Harness {
        init_logger();
        let written = channel.written.clone();
        let closed = channel.closed.clone();
        Harness {
            session: Session::new(channel, SessionConfig::default()),
            written,
            closed,
        }
    }

    /// Protocols of a device with run history and workouts
    const TRAINING: &[(u8, u16)] = &[
        (b'P', 0),
        (b'L', 1),
        (b'A', 10),
        (b'A', 302),
        (b'D', 311),
        (b'D', 304),
        (b'A', 906),
        (b'D', 1015),
        (b'A', 1000),
        (b'D', 1009),
        (b'A', 1002),
        (b'D', 1008),
        (b'A', 1003),
        (b'D', 1003),
    ];

    /// A session that has negotiated [`FORERUNNER`], then replays `build`
    fn negotiated_with(build: impl FnOnce(ScriptedChannel) -> ScriptedChannel) -> Harness {
        negotiated_as(FORERUNNER, build)
    }

    fn negotiated_as(
        triples: &[(u8, u16)],
        build: impl FnOnce(ScriptedChannel) -> ScriptedChannel,
    ) -> Harness {
        init_logger();
        let channel = build(negotiation(ScriptedChannel::new(), triples));
        let written = channel.written.clone();
        let closed = channel.closed.clone();
        let mut session = Session::new(channel, SessionConfig::default());
        session.get_device_capabilities().unwrap();
        written.borrow_mut().clear();
        Harness {
            session,
            written,
            closed,
        }
    }

    fn command_code(frame: &Frame) -> u16 {
        u16::from_le_bytes([frame.payload()[0], frame.payload()[1]])
    }

    fn command_codes(written: &RefCell<Vec<Frame>>) -> Vec<u16> {
        written.borrow().iter().map(command_code).collect()
    }

    fn name_field(name: &str) -> Vec<u8> {
        let mut field = vec![0u8; 16];
        field[..name.len()].copy_from_slice(name.as_bytes());
        field
    }

    /// D1008 body: step count, 20 step slots, name, sport
    fn workout_body(valid_steps: u32, name: &str) -> Vec<u8> {
        let mut payload = valid_steps.to_le_bytes().to_vec();
        for _ in 0..20 {
            payload.extend_from_slice(&name_field("WARMUP"));
            payload.extend_from_slice(&2.5f32.to_le_bytes());
            payload.extend_from_slice(&3.5f32.to_le_bytes());
            payload.extend_from_slice(&300u16.to_le_bytes());
            payload.extend_from_slice(&[0, 1, 1, 2, 0, 0]);
        }
        payload.extend_from_slice(&name_field(name));
        payload.push(0);
        payload
    }

    fn run_payload(track_index: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&track_index.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0f32.to_le_bytes());
        payload.extend_from_slice(&workout_body(0, ""));
        payload
    }

    fn lap_payload(index: u16, start: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&index.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&60_000u32.to_le_bytes());
        payload.extend_from_slice(&1000.0f32.to_le_bytes());
        payload.extend_from_slice(&4.2f32.to_le_bytes());
        payload.extend_from_slice(&[0; 16]);
        payload.extend_from_slice(&80u16.to_le_bytes());
        payload.extend_from_slice(&[140, 165, 0, 0xFF, 1]);
        payload.extend_from_slice(&[0; 5]);
        payload
    }

    fn track_point(seconds: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(1i32 << 29).to_le_bytes());
        payload.extend_from_slice(&(-(1i32 << 28)).to_le_bytes());
        payload.extend_from_slice(&seconds.to_le_bytes());
        payload.extend_from_slice(&120.5f32.to_le_bytes());
        payload.extend_from_slice(&42.0f32.to_le_bytes());
        payload.extend_from_slice(&[150, 0xFF, 0]);
        payload
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert_eq!(config.max_packet_size, 1024);
        assert_eq!(config.start_session_attempts, 1);
    }

    #[test]
    fn test_session_config_serde() {
        let json = serde_json::to_value(SessionConfig::default()).unwrap();
        assert_eq!(json["read_timeout"], 3000);

        let config: SessionConfig =
            serde_json::from_str(r#"{"read_timeout": 500, "start_session_attempts": 3}"#).unwrap();
        assert_eq!(config.read_timeout, Duration::from_millis(500));
        assert_eq!(config.write_timeout, Duration::from_millis(3000));
        assert_eq!(config.start_session_attempts, 3);
    }

    #[test]
    fn test_open_claims_channel() {
        let mut transport = ScriptedTransport {
            channel: Some(ScriptedChannel::new()),
        };
        let session = Session::open(&mut transport, SessionConfig::default()).unwrap();
        assert!(session.capabilities().is_none());

        assert!(matches!(
            Session::open(&mut transport, SessionConfig::default()),
            Err(GarminError::TransportIo(_))
        ));
    }

    #[test]
    fn test_start_session() {
        let channel = ScriptedChannel::new()
            // Data available notice first, then the reply
            .respond(Frame::basic(PacketId::DataAvailable.code(), Vec::new()))
            .respond(Frame::basic(
                PacketId::SessionStarted.code(),
                0x0DEC_AF00u32.to_le_bytes().to_vec(),
            ));
        let mut h = harness(channel);

        assert_eq!(h.session.start_session().unwrap(), 0x0DEC_AF00);
        assert_eq!(h.session.unit_id(), Some(0x0DEC_AF00));

        let written = h.written.borrow();
        assert_eq!(written.len(), 1);
        assert!(written[0].is_usb_layer());
        assert_eq!(written[0].packet_id(), 0x05);
        assert!(written[0].payload().is_empty());
    }

    #[test]
    fn test_start_session_repeats_packet() {
        init_logger();
        let channel = ScriptedChannel::new().respond(Frame::basic(
            PacketId::SessionStarted.code(),
            7u32.to_le_bytes().to_vec(),
        ));
        let written = channel.written.clone();
        let config = SessionConfig {
            start_session_attempts: 3,
            ..SessionConfig::default()
        };
        let mut session = Session::new(channel, config);

        assert_eq!(session.start_session().unwrap(), 7);
        assert_eq!(written.borrow().len(), 3);
    }

    #[test]
    fn test_start_session_timeout() {
        let mut h = harness(ScriptedChannel::new());
        assert!(matches!(
            h.session.start_session(),
            Err(GarminError::TransportTimeout)
        ));
    }

    #[test]
    fn test_get_device_capabilities() {
        let mut h = harness(negotiation(ScriptedChannel::new(), FORERUNNER));
        let device = h.session.get_device_capabilities().unwrap();

        assert_eq!(device.product.product_id, 484);
        assert_eq!(
            device.product.description,
            "Forerunner305 Software Version 2.80"
        );
        assert_eq!(
            device.extended_product_data,
            vec!["PREDEFINED_ACTIVITY_PROFILES"]
        );
        assert!(device.capabilities.supports("lap"));
        assert_eq!(device.capabilities.datatype("track.header").unwrap(), 311);

        assert_eq!(h.session.link_type().unwrap(), LinkType::L001);
        assert_eq!(h.session.product().unwrap().software_version, 280);
        assert_eq!(h.session.extended_product_data().len(), 1);

        let written = h.written.borrow();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].protocol_tag(), 20);
        assert_eq!(written[0].packet_id(), 0xFE);
    }

    #[test]
    fn test_command_before_negotiation() {
        let mut h = harness(ScriptedChannel::new());
        assert!(matches!(
            h.session.get_laps(),
            Err(GarminError::Protocol(_))
        ));
        assert!(h.written.borrow().is_empty());
    }

    #[test]
    fn test_get_time() {
        let payload = vec![10, 18, 0xD6, 0x07, 14, 0, 30, 5];
        let mut h = negotiated_with(|c| c.respond(app(PacketId::DateTime, payload)));

        let time = h.session.get_time().unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2006, 10, 18, 14, 30, 5).unwrap());

        let written = h.written.borrow();
        assert_eq!(written[0].packet_id(), 0x0A);
        assert_eq!(command_code(&written[0]), 5);
    }

    #[test]
    fn test_get_position() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(1i32 << 30).to_le_bytes());
        payload.extend_from_slice(&(-(1i32 << 30)).to_le_bytes());
        let mut h = negotiated_with(|c| c.respond(app(PacketId::PositionData, payload)));

        let position = h.session.get_position().unwrap();
        let (latitude, longitude) = position.to_degrees();
        assert!((latitude - 90.0).abs() < 1e-9);
        assert!((longitude + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_get_workout_limits() {
        let mut payload = Vec::new();
        for value in [100u32, 20, 200] {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        let mut h = negotiated_with(|c| c.respond(app(PacketId::WorkoutLimits, payload)));

        let limits = h.session.get_workout_limits().unwrap();
        assert_eq!(limits.max_workouts, 100);
        assert_eq!(limits.max_unscheduled_workouts, 20);
        assert_eq!(limits.max_occurrences, 200);
    }

    #[test]
    fn test_get_track_log() {
        let mut h = negotiated_with(|c| {
            c.respond(records(4))
                .respond(app(PacketId::TrackHeader, 1u16.to_le_bytes().to_vec()))
                .respond(app(PacketId::TrackData, track_point(0)))
                .respond(app(PacketId::TrackData, track_point(86_400)))
                .respond(app(PacketId::TrackHeader, 2u16.to_le_bytes().to_vec()))
                .respond(complete(6))
        });

        let tracks = h.session.get_track_log().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].header, Some(TrackHeader::Index(1)));
        assert_eq!(tracks[0].points.len(), 2);
        assert_eq!(
            tracks[0].points[1].time,
            Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(tracks[0].points[0].heart_rate, 150);
        assert_eq!(tracks[1].header, Some(TrackHeader::Index(2)));
        assert!(tracks[1].points.is_empty());

        assert_eq!(command_code(&h.written.borrow()[0]), 6);
    }

    #[test]
    fn test_get_course_tracks() {
        let mut h = negotiated_with(|c| {
            c.respond(records(2))
                .respond(app(PacketId::CourseTrackHeader, 9u16.to_le_bytes().to_vec()))
                .respond(app(PacketId::CourseTrackData, track_point(10)))
                .respond(complete(564))
        });

        let tracks = h.session.get_course_tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        let header = tracks[0].header.as_ref().unwrap();
        assert_eq!(header.datatype, 311);
        assert_eq!(header.payload, vec![9, 0]);
        assert_eq!(tracks[0].points[0].datatype, 304);
    }

    #[test]
    fn test_missing_capability_sends_nothing() {
        let mut h = negotiated_with(|c| c);
        match h.session.get_runs() {
            Err(GarminError::Capability { capability }) => assert_eq!(capability, "run"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(h.written.borrow().is_empty());
    }

    #[test]
    fn test_unsupported_command_on_link() {
        let channel = negotiation(
            ScriptedChannel::new(),
            &[(b'P', 0), (b'L', 2), (b'A', 906), (b'D', 1015)],
        );
        let mut h = harness(channel);
        h.session.get_device_capabilities().unwrap();

        assert!(matches!(
            h.session.get_laps(),
            Err(GarminError::UnsupportedCommand { link: LinkType::L002, .. })
        ));
    }

    #[test]
    fn test_unexpected_packet_aborts_list() {
        let mut h = negotiated_with(|c| {
            c.respond(records(1))
                .respond(app(PacketId::PositionData, vec![0; 8]))
                .respond(complete(117))
        });

        assert!(matches!(
            h.session.get_laps(),
            Err(GarminError::UnexpectedPacket { actual_id: 0x18, .. })
        ));
    }

    #[test]
    fn test_foreign_record_reported_before_decoding() {
        // No run protocol negotiated, so a RUN payload cannot be decoded
        let mut h = negotiated_with(|c| {
            c.respond(records(1))
                .respond(app(PacketId::Run, vec![0; 4]))
                .respond(complete(117))
        });

        assert!(matches!(
            h.session.get_laps(),
            Err(GarminError::UnexpectedPacket { actual_id: 0x3DE, .. })
        ));
    }

    #[test]
    fn test_get_runs() {
        let mut h = negotiated_as(TRAINING, |c| {
            c.respond(records(1))
                .respond(app(PacketId::Run, run_payload(3)))
                .respond(complete(450))
                .respond(records(2))
                .respond(app(PacketId::Lap, lap_payload(0, 0)))
                .respond(app(PacketId::Lap, lap_payload(1, 86_400)))
                .respond(complete(117))
                .respond(records(2))
                .respond(app(PacketId::TrackHeader, 3u16.to_le_bytes().to_vec()))
                .respond(app(PacketId::TrackData, track_point(30)))
                .respond(complete(6))
        });

        let history = h.session.get_runs().unwrap();
        assert_eq!(command_codes(&h.written), vec![450, 117, 6]);

        assert_eq!(history.runs.len(), 1);
        assert_eq!(history.runs[0].track_index, 3);
        assert_eq!(history.runs[0].last_lap_index, 1);
        assert!(history.runs[0].workout.steps.is_empty());

        assert_eq!(history.laps.len(), 2);
        assert_eq!(history.laps[1].index, 1);
        assert_eq!(
            history.laps[1].start_time,
            Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(history.laps[0].avg_heart_rate, 140);

        assert_eq!(history.tracks.len(), 1);
        assert_eq!(history.tracks[0].header, Some(TrackHeader::Index(3)));
        assert_eq!(history.tracks[0].points.len(), 1);
    }

    #[test]
    fn test_get_runs_aborts_on_lap_timeout() {
        let mut h = negotiated_as(TRAINING, |c| {
            c.respond(records(1))
                .respond(app(PacketId::Run, run_payload(0)))
                .respond(complete(450))
                .respond(records(2))
                .respond(app(PacketId::Lap, lap_payload(0, 0)))
                .fail(GarminError::TransportTimeout)
                // Would answer a track log request that must never be sent
                .respond(records(0))
                .respond(complete(6))
        });

        assert!(matches!(
            h.session.get_runs(),
            Err(GarminError::TransportTimeout)
        ));
        assert_eq!(command_codes(&h.written), vec![450, 117]);
    }

    #[test]
    fn test_get_workouts() {
        let mut occurrence = name_field("INTERVALS");
        occurrence.extend_from_slice(&86_400u32.to_le_bytes());

        let mut h = negotiated_as(TRAINING, |c| {
            c.respond(records(1))
                .respond(app(PacketId::Workout, workout_body(2, "INTERVALS")))
                .respond(complete(451))
                .respond(records(1))
                .respond(app(PacketId::WorkoutOccurrence, occurrence))
                .respond(complete(452))
        });

        let (workouts, occurrences) = h.session.get_workouts().unwrap();
        assert_eq!(command_codes(&h.written), vec![451, 452]);

        assert_eq!(workouts.len(), 1);
        assert_eq!(workouts[0].name, "INTERVALS");
        assert_eq!(workouts[0].valid_step_count, 2);
        assert_eq!(workouts[0].steps.len(), 2);
        assert_eq!(workouts[0].steps[0].custom_name, "WARMUP");

        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].workout_name, "INTERVALS");
        assert_eq!(
            occurrences[0].day,
            Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_frame_error_propagates() {
        let mut raw = app(PacketId::Records, vec![1, 0]).encode();
        raw.push(0xAA);
        let mut h = negotiated_with(|c| c.respond_raw(raw));

        assert!(matches!(h.session.get_laps(), Err(GarminError::Frame(_))));
    }

    #[test]
    fn test_timeout_mid_stream() {
        let mut h = negotiated_with(|c| c.respond(records(2)).fail(GarminError::TransportTimeout));
        assert!(matches!(
            h.session.get_laps(),
            Err(GarminError::TransportTimeout)
        ));
    }

    #[test]
    fn test_power_off_and_abort() {
        let mut h = negotiated_with(|c| c);
        h.session.abort_transfer().unwrap();
        h.session.power_off().unwrap();

        let written = h.written.borrow();
        assert_eq!(command_code(&written[0]), 0);
        assert_eq!(command_code(&written[1]), 8);
    }

    #[test]
    fn test_channel_closed_on_drop() {
        let h = harness(ScriptedChannel::new());
        let closed = h.closed.clone();
        assert_eq!(closed.get(), 0);
        drop(h);
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn test_channel_closed_after_error() {
        let closed = {
            let mut h = negotiated_with(|c| c.respond(records(1)));
            assert!(h.session.get_laps().is_err());
            h.closed.clone()
        };
        assert_eq!(closed.get(), 1);
    }
}
