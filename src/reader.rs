//! Binary cursor over a packet payload
//!
//! Reads advance monotonically; reading past the end of the payload is a
//! protocol error rather than a panic.

use crate::records::Position;
use crate::types::{GarminError, Result};
use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and the Garmin epoch (1989-12-31T00:00:00Z)
pub const GARMIN_EPOCH_OFFSET: i64 = 631_065_600;

/// Byte order used for multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Convert seconds since the Garmin epoch to a UTC timestamp
pub fn garmin_time(seconds: u32) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(GARMIN_EPOCH_OFFSET + seconds as i64, 0).ok_or_else(|| {
        GarminError::Protocol(format!("Timestamp out of range: {}", seconds))
    })
}

pub struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    /// Create a little-endian cursor, the device byte order
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_endian(data, Endian::Little)
    }

    pub fn with_endian(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            index: 0,
            endian,
        }
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn is_eof(&self) -> bool {
        self.index >= self.data.len()
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.read_bytes(count).map(|_| ())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(GarminError::Protocol(format!(
                "Payload truncated: need {} bytes at offset {}, have {}",
                count,
                self.index,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.index..self.index + count];
        self.index += count;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        if self.endian == Endian::Big {
            array.reverse();
        }
        // Stored little-endian from here on
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_array().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_array().map(f32::from_le_bytes)
    }

    /// Read a fixed-width string field, cut at the first NUL
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read a NUL terminated string
    ///
    /// A missing terminator consumes the rest of the payload.
    pub fn read_string(&mut self) -> Result<String> {
        let rest = &self.data[self.index..];
        let (end, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(pos) => (pos, pos + 1),
            None => (rest.len(), rest.len()),
        };
        let value = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.index += consumed;
        Ok(value)
    }

    /// Read NUL terminated strings until the payload is exhausted
    pub fn read_strings(&mut self) -> Result<Vec<String>> {
        let mut strings = Vec::new();
        while !self.is_eof() {
            strings.push(self.read_string()?);
        }
        Ok(strings)
    }

    /// Read a 32-bit Garmin epoch timestamp
    pub fn read_time(&mut self) -> Result<DateTime<Utc>> {
        garmin_time(self.read_u32()?)
    }

    /// Read a latitude/longitude pair of semicircles
    pub fn read_position(&mut self) -> Result<Position> {
        let latitude = self.read_i32()?;
        let longitude = self.read_i32()?;
        Ok(Position {
            latitude,
            longitude,
        })
    }
}
