//! Common types, enums, and error definitions for the Garmin USB protocol

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for Garmin operations
pub type Result<T> = std::result::Result<T, GarminError>;

/// Error types for Garmin communication
///
/// Every variant aborts the high-level operation that raised it. Nothing is
/// retried internally and partial stream results are discarded.
#[derive(Error, Debug)]
pub enum GarminError {
    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Unexpected packet with id [{actual_id:04X}] ({actual_id}): {context}")]
    UnexpectedPacket { actual_id: u16, context: String },

    #[error("Command {command} not supported on link type {link}")]
    UnsupportedCommand { command: &'static str, link: LinkType },

    #[error("Capability not negotiated: {capability}")]
    Capability { capability: String },

    #[error("Unsupported datatype: D{datatype:03}")]
    UnsupportedDatatype { datatype: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport timed out")]
    TransportTimeout,

    #[error("Transport error: {0}")]
    TransportIo(#[source] io::Error),
}

impl From<io::Error> for GarminError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => GarminError::TransportTimeout,
            _ => GarminError::TransportIo(err),
        }
    }
}

/// Link protocol negotiated through the protocol array (`L001` or `L002`)
///
/// The link type selects which column of the command catalog applies and which
/// packet id carries command data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkType {
    /// Link protocol 1, the basic command set
    L001 = 1,
    /// Link protocol 2, the application command set
    L002 = 2,
}

impl LinkType {
    /// Convert a negotiated link protocol code to a LinkType
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(LinkType::L001),
            2 => Ok(LinkType::L002),
            _ => Err(GarminError::Protocol(format!(
                "Unknown link protocol L{:03}",
                code
            ))),
        }
    }

    /// Column of the command catalog code table for this link
    pub fn index(self) -> usize {
        self as usize - 1
    }

    /// Packet id used to carry command data on this link
    pub fn command_packet_id(self) -> u16 {
        match self {
            LinkType::L001 => 0x0A,
            LinkType::L002 => 0x0B,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::L001 => write!(f, "L001"),
            LinkType::L002 => write!(f, "L002"),
        }
    }
}
