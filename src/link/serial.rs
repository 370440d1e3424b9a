//! Serial port implementation of [`ByteLink`].

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};

use crate::error::Result;

use super::ByteLink;

const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial bit parity. STM32 bootloaders speak 8E1, BlueNRG parts 8N1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    Even,
    None,
}

/// How the port is opened and how the control lines map onto the target
/// pins. Fixed once the link is opened.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    /// RESET is active-low on ST parts; set for inverting level shifters.
    pub reset_active_high: bool,
    /// BOOT0 is active-high on ST parts; set for inverting level shifters.
    pub boot0_active_low: bool,
    /// Drive RESET from RTS and BOOT0 from DTR instead of the reverse.
    pub swap_rts_dtr: bool,
    pub read_timeout: Duration,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        LinkConfig {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Even,
            reset_active_high: false,
            boot0_active_low: false,
            swap_rts_dtr: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    config: LinkConfig,
    read_timeout: Duration,
}

impl SerialLink {
    /// Open the configured port at 8 data bits, 1 stop bit, no flow
    /// control. The port closes again when the link is dropped.
    pub fn open(config: LinkConfig) -> Result<Self> {
        let parity = match config.parity {
            Parity::Even => serialport::Parity::Even,
            Parity::None => serialport::Parity::None,
        };
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(parity)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()?;
        log::debug!(
            "opened {} at {} baud, parity {:?}",
            config.port,
            config.baud_rate,
            config.parity
        );
        let read_timeout = config.read_timeout;
        Ok(SerialLink {
            port,
            config,
            read_timeout,
        })
    }

    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn drive_reset_line(&mut self, level: bool) -> Result<()> {
        if self.config.swap_rts_dtr {
            self.port.write_request_to_send(level)?;
        } else {
            self.port.write_data_terminal_ready(level)?;
        }
        Ok(())
    }

    fn drive_boot0_line(&mut self, level: bool) -> Result<()> {
        if self.config.swap_rts_dtr {
            self.port.write_data_terminal_ready(level)?;
        } else {
            self.port.write_request_to_send(level)?;
        }
        Ok(())
    }
}

impl ByteLink for SerialLink {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_reset(&mut self, active: bool) -> Result<()> {
        // An asserted modem-control line already outputs a low voltage,
        // which matches the active-low RESET pin, so the logical level
        // passes straight through unless the adapter inverts it.
        let level = if self.config.reset_active_high {
            !active
        } else {
            active
        };
        self.drive_reset_line(level)
    }

    fn set_boot0(&mut self, active: bool) -> Result<()> {
        // BOOT0 is active-high, so the modem-control inversion has to be
        // undone here.
        let level = if self.config.boot0_active_low {
            active
        } else {
            !active
        };
        self.drive_boot0_line(level)
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }
}
