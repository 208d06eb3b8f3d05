//! Garmin USB packet framing
//!
//! Every packet exchanged with the device carries a fixed 12 byte little-endian
//! header followed by the payload:
//!
//! ```text
//! +-----+---------+-----------+---------+----------------+---------+
//! | tag | pad (3) | id (u16)  | pad (2) | length (u32)   | payload |
//! +-----+---------+-----------+---------+----------------+---------+
//! ```
//!
//! The tag selects the protocol layer: 0 for the USB protocol layer, 20 for the
//! application layer.

use crate::types::{GarminError, Result};
use std::fmt;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 12;

/// Protocol tag of USB protocol layer packets
pub const USB_PROTOCOL_LAYER: u8 = 0;

/// Protocol tag of application layer packets
pub const APPLICATION_LAYER: u8 = 20;

/// Known packet ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketId {
    DataAvailable = 0x0002,
    StartSession = 0x0005,
    SessionStarted = 0x0006,
    CommandDataL1 = 0x000A,
    CommandDataL2 = 0x000B,
    TransferComplete = 0x000C,
    DateTime = 0x000E,
    PositionData = 0x0018,
    Records = 0x001B,
    AlmanacData = 0x001F,
    TrackData = 0x0022,
    TrackHeader = 0x0063,
    Lap = 0x0095,
    ExtendedProductData = 0x00F8,
    ProtocolArray = 0x00FD,
    ProductRequest = 0x00FE,
    ProductData = 0x00FF,
    Run = 0x03DE,
    Workout = 0x03DF,
    WorkoutOccurrence = 0x03E0,
    FitnessUserProfile = 0x03E1,
    WorkoutLimits = 0x03E5,
    Course = 0x0425,
    CourseLap = 0x0426,
    CoursePoint = 0x0427,
    CourseTrackHeader = 0x0428,
    CourseTrackData = 0x0429,
    CourseLimits = 0x042A,
}

impl PacketId {
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            0x0002 => Some(PacketId::DataAvailable),
            0x0005 => Some(PacketId::StartSession),
            0x0006 => Some(PacketId::SessionStarted),
            0x000A => Some(PacketId::CommandDataL1),
            0x000B => Some(PacketId::CommandDataL2),
            0x000C => Some(PacketId::TransferComplete),
            0x000E => Some(PacketId::DateTime),
            0x0018 => Some(PacketId::PositionData),
            0x001B => Some(PacketId::Records),
            0x001F => Some(PacketId::AlmanacData),
            0x0022 => Some(PacketId::TrackData),
            0x0063 => Some(PacketId::TrackHeader),
            0x0095 => Some(PacketId::Lap),
            0x00F8 => Some(PacketId::ExtendedProductData),
            0x00FD => Some(PacketId::ProtocolArray),
            0x00FE => Some(PacketId::ProductRequest),
            0x00FF => Some(PacketId::ProductData),
            0x03DE => Some(PacketId::Run),
            0x03DF => Some(PacketId::Workout),
            0x03E0 => Some(PacketId::WorkoutOccurrence),
            0x03E1 => Some(PacketId::FitnessUserProfile),
            0x03E5 => Some(PacketId::WorkoutLimits),
            0x0425 => Some(PacketId::Course),
            0x0426 => Some(PacketId::CourseLap),
            0x0427 => Some(PacketId::CoursePoint),
            0x0428 => Some(PacketId::CourseTrackHeader),
            0x0429 => Some(PacketId::CourseTrackData),
            0x042A => Some(PacketId::CourseLimits),
            _ => None,
        }
    }

    /// Get the numeric packet id
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(&self) -> &'static str {
        match self {
            PacketId::DataAvailable => "DATA_AVAILABLE",
            PacketId::StartSession => "START_SESSION",
            PacketId::SessionStarted => "SESSION_STARTED",
            PacketId::CommandDataL1 => "COMMAND_DATA_L1",
            PacketId::CommandDataL2 => "COMMAND_DATA_L2",
            PacketId::TransferComplete => "TRANSFER_COMPLETE",
            PacketId::DateTime => "DATE_TIME",
            PacketId::PositionData => "POSITION_DATA",
            PacketId::Records => "RECORDS",
            PacketId::AlmanacData => "ALMANAC_DATA",
            PacketId::TrackData => "TRACK_DATA",
            PacketId::TrackHeader => "TRACK_HEADER",
            PacketId::Lap => "LAP",
            PacketId::ExtendedProductData => "EXTENDED_PRODUCT_DATA",
            PacketId::ProtocolArray => "PROTOCOL_ARRAY",
            PacketId::ProductRequest => "PRODUCT_REQUEST",
            PacketId::ProductData => "PRODUCT_DATA",
            PacketId::Run => "RUN",
            PacketId::Workout => "WORKOUT",
            PacketId::WorkoutOccurrence => "WORKOUT_OCCURRENCE",
            PacketId::FitnessUserProfile => "FITNESS_USER_PROFILE",
            PacketId::WorkoutLimits => "WORKOUT_LIMITS",
            PacketId::Course => "COURSE",
            PacketId::CourseLap => "COURSE_LAP",
            PacketId::CoursePoint => "COURSE_POINT",
            PacketId::CourseTrackHeader => "COURSE_TRACK_HEADER",
            PacketId::CourseTrackData => "COURSE_TRACK_DATA",
            PacketId::CourseLimits => "COURSE_LIMITS",
        }
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded packet: protocol tag, packet id and payload
///
/// Frames are immutable once built. The header length field is always derived
/// from the payload, so an encoded frame can never disagree with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    protocol_tag: u8,
    packet_id: u16,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(protocol_tag: u8, packet_id: u16, payload: Vec<u8>) -> Self {
        Self {
            protocol_tag,
            packet_id,
            payload,
        }
    }

    /// Build a USB protocol layer frame
    pub fn basic(packet_id: u16, payload: Vec<u8>) -> Self {
        Self::new(USB_PROTOCOL_LAYER, packet_id, payload)
    }

    /// Build an application layer frame
    pub fn application(packet_id: u16, payload: Vec<u8>) -> Self {
        Self::new(APPLICATION_LAYER, packet_id, payload)
    }

    pub fn protocol_tag(&self) -> u8 {
        self.protocol_tag
    }

    pub fn packet_id(&self) -> u16 {
        self.packet_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_usb_layer(&self) -> bool {
        self.protocol_tag == USB_PROTOCOL_LAYER
    }

    /// Total encoded length: header plus payload
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode the frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        encode(self.protocol_tag, self.packet_id, &self.payload)
    }

    /// Decode a frame from bytes
    ///
    /// The input must hold exactly one packet: the declared payload length has to
    /// match the number of bytes following the header.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(GarminError::Frame(format!(
                "packet too short: {} bytes",
                data.len()
            )));
        }

        let protocol_tag = data[0];
        let packet_id = u16::from_le_bytes([data[4], data[5]]);
        let declared = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;

        let payload = &data[HEADER_SIZE..];
        if payload.len() != declared {
            return Err(GarminError::Frame(format!(
                "length mismatch: header declares {} bytes, {} present",
                declared,
                payload.len()
            )));
        }

        Ok(Self {
            protocol_tag,
            packet_id,
            payload: payload.to_vec(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layer = if self.is_usb_layer() { "USB" } else { "APP" };
        write!(
            f,
            "<Packet protocol: {}, id: {:04X}, length: {}, payload: {}>",
            layer,
            self.packet_id,
            self.payload.len(),
            hex_dump(&self.payload, 32)
        )
    }
}

/// Encode a packet with an explicit protocol tag
pub fn encode(protocol_tag: u8, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());

    message.push(protocol_tag);
    message.extend_from_slice(&[0u8; 3]);
    message.extend_from_slice(&packet_id.to_le_bytes());
    message.extend_from_slice(&[0u8; 2]);
    message.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    message.extend_from_slice(payload);

    message
}

/// Encode a USB protocol layer packet
pub fn encode_basic(packet_id: u16, payload: &[u8]) -> Vec<u8> {
    encode(USB_PROTOCOL_LAYER, packet_id, payload)
}

/// Encode an application layer packet
pub fn encode_application(packet_id: u16, payload: &[u8]) -> Vec<u8> {
    encode(APPLICATION_LAYER, packet_id, payload)
}

/// Decode a single packet
pub fn decode(data: &[u8]) -> Result<Frame> {
    Frame::decode(data)
}

/// Format bytes as hex for debugging
pub(crate) fn hex_dump(data: &[u8], max_len: usize) -> String {
    let len = data.len().min(max_len);
    let hex: String = data[..len]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max_len {
        format!("{} ... ({} bytes total)", hex, data.len())
    } else {
        hex
    }
}
