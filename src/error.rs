//! Error kinds shared by the link, protocol and flashing layers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The operating system reported a serial port failure.
    #[error("serial link failure: {0}")]
    Link(String),

    /// A read ran past its deadline. Partial data is discarded.
    #[error("timed out waiting for data from the target")]
    Timeout,

    /// The target replied NACK (0x1F).
    #[error("target replied NACK")]
    Nack,

    /// The target replied with a byte that is neither ACK nor NACK.
    #[error("unexpected reply from target: expected {expected:#04x}, got {got:#04x}")]
    Protocol { expected: u8, got: u8 },

    /// The target never answered the autobaud byte.
    #[error("could not activate the bootloader; check BOOT0 and RESET wiring")]
    BootloaderActivation,

    /// The target or the catalog cannot honor the requested operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Family-gated introspection was requested for a family the catalog
    /// does not know.
    #[error("unknown device family: {0}")]
    UnknownFamily(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Read-back comparison failed at `offset`.
    #[error(
        "verification mismatch at offset {offset:#x}: expected {expected:#04x}, read {actual:#04x}"
    )]
    Mismatch {
        offset: usize,
        expected: u8,
        actual: u8,
    },

    /// The caller flagged cancellation between transfer chunks.
    #[error("operation cancelled")]
    Cancelled,

    #[error("device catalog: {0}")]
    Catalog(#[from] serde_yaml::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Error::Timeout
        } else {
            Error::Link(err.to_string())
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Link(err.to_string())
    }
}
