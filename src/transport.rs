//! Byte transport consumed by the session
//!
//! Device discovery and endpoint claiming live outside this crate. An
//! implementation hands the session an exclusive [`Channel`] that moves whole
//! frames in both directions.

use crate::types::Result;
use std::time::Duration;

/// An exclusively claimed, half-duplex channel to one device
pub trait Channel {
    /// Write one encoded frame
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Read one encoded frame of at most `max_len` bytes
    ///
    /// Fails with `TransportTimeout` when nothing arrives within `timeout`.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Release the channel. Calling it more than once has no effect.
    fn close(&mut self);
}

/// Source of channels, usually a USB device handle
pub trait Transport {
    type Channel: Channel;

    fn open(&mut self) -> Result<Self::Channel>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).write(data, timeout)
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(max_len, timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
