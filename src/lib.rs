//! Host-side driver for the STM32 system-memory UART bootloader.
//!
//! Implements the USART protocol of ST AN3155 (and the AN4872 BlueNRG
//! variant), entered by holding BOOT0 through a reset per AN2606.

pub mod bootloader;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod link;
pub mod protocol;

pub use self::bootloader::{Bootloader, DeviceInfo, EraseDialect, Timings};
pub use self::device::{Catalog, Family};
pub use self::error::{Error, Result};
pub use self::flashing::{Flashing, Progress};
pub use self::link::{ByteLink, LinkConfig, Parity, SerialLink};
pub use self::protocol::{Command, CommandSet};
