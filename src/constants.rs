/// Largest payload a single Read Memory or Write Memory frame can carry.
pub const MAX_TRANSFER_SIZE: usize = 256;

/// Autobaud byte; the bootloader measures the host baud rate from it.
pub const SYNC: u8 = 0x7F;

pub const ACK: u8 = 0x79;
pub const NACK: u8 = 0x1F;

/// Value of erased flash, used to pad short writes to a full word.
pub const ERASED_BYTE: u8 = 0xFF;

/// Most pages a legacy erase (one-byte indices) can address.
pub const LEGACY_ERASE_MAX_PAGES: usize = 255;

/// Most pages an extended erase (two-byte indices) can address.
pub const EXTENDED_ERASE_MAX_PAGES: usize = 65535;
