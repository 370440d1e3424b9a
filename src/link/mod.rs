//! Byte-level access to the target.
//!
//! The bootloader engine is polymorphic over anything that can move bytes
//! and toggle the two control lines, so boards that route RESET and BOOT0
//! through GPIO instead of modem-control signals only need their own
//! [`ByteLink`] implementation.

use std::time::Duration;

use crate::error::Result;

pub use self::serial::{LinkConfig, Parity, SerialLink};

#[cfg(test)]
pub(crate) mod mock;
mod serial;

/// A serial-like connection to the target plus the RESET/BOOT0 lines.
///
/// Callers use logical semantics throughout: `set_reset(true)` holds the
/// target in reset and `set_boot0(true)` requests a system-memory boot,
/// whatever the electrical polarity or pin assignment.
pub trait ByteLink {
    /// Fill `buf` completely or fail. A read that starves past the
    /// configured deadline is [`crate::Error::Timeout`]; partially
    /// received bytes are discarded, never returned short.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Discard anything already buffered from the target.
    fn flush_input(&mut self) -> Result<()>;

    fn set_reset(&mut self, active: bool) -> Result<()>;

    fn set_boot0(&mut self, active: bool) -> Result<()>;

    fn read_timeout(&self) -> Duration;

    /// Per-read deadline. Commands that erase flash raise it temporarily.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;
}
