//! Garmin USB Packet Protocol
//!
//! This library provides a Rust implementation of the Garmin USB packet protocol
//! used by Forerunner-class devices: packet framing, the command catalog,
//! capability negotiation through the protocol array, and decoding of the
//! datatype-versioned records (runs, laps, workouts, track logs, courses).
//!
//! # Modules
//!
//! - `packet`: 12-byte header framing and packet ids
//! - `command`: Command catalog and Command Data encoding
//! - `protocol`: Protocol array parsing and capability lookups
//! - `reader`: Little-endian payload cursor and Garmin epoch time
//! - `records`: Typed records produced by the decoders
//! - `decoder`: Packet id to record decoder registry
//! - `stream`: Consumers that fold a response stream into a result
//! - `transport`: Channel traits implemented by the USB layer
//! - `session`: Session controller driving commands and responses
//! - `types`: Common types and the error definition

pub mod command;
pub mod decoder;
pub mod packet;
pub mod protocol;
pub mod reader;
pub mod records;
pub mod session;
pub mod stream;
pub mod transport;
pub mod types;

pub use command::{Command, CommandDescriptor};
pub use decoder::{FromValue, RecordDecoder, Value};
pub use packet::{Frame, PacketId, APPLICATION_LAYER, HEADER_SIZE, USB_PROTOCOL_LAYER};
pub use protocol::CapabilityManager;
pub use reader::{garmin_time, Cursor, Endian, GARMIN_EPOCH_OFFSET};
pub use records::{
    ActivityProfile, AlmanacEntry, CourseLimits, CourseRecord, CourseTrack, DeviceCapabilities,
    FitnessUserProfile, HeartRateZone, Lap, Position, ProductInfo, QuickWorkout, Run,
    RunHistory, SpeedZone, TrackHeader, TrackLog, TrackPoint, Workout, WorkoutLimits,
    WorkoutOccurrence, WorkoutStep,
};
pub use session::{Session, SessionConfig};
pub use stream::{
    CapabilityNegotiation, Consumer, Group, GroupedList, RecordList, SingleRecord, Step,
};
pub use transport::{Channel, Transport};
pub use types::{GarminError, LinkType, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        // Smoke test to ensure all modules can be imported
        let _ = LinkType::L001;
        let _ = PacketId::ProtocolArray;
        let _ = Command::StartSession.name();
    }

    #[test]
    fn test_negotiate_then_encode() {
        let caps = CapabilityManager::from_triples(&[(b'L', 1), (b'A', 906), (b'D', 1015)])
            .unwrap();
        let frame = Command::TransferLaps
            .encode(caps.link_type().unwrap(), &caps)
            .unwrap();
        let decoded = Frame::decode(&frame.encode()).unwrap();

        assert_eq!(decoded.protocol_tag(), APPLICATION_LAYER);
        assert_eq!(decoded.packet_id(), 0x0A);
        assert_eq!(decoded.payload(), &117u16.to_le_bytes());
    }
}
