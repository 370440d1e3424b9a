//! The bootloader protocol engine.
//!
//! Owns a [`ByteLink`] for the duration of a session and implements the
//! activation sequence plus every command of the AN3155/AN4872 UART
//! dialect. Multi-frame transfers are layered on top in
//! [`crate::flashing`].

use std::thread::sleep;
use std::time::Duration;

use crate::constants::{
    ACK, ERASED_BYTE, EXTENDED_ERASE_MAX_PAGES, LEGACY_ERASE_MAX_PAGES, MAX_TRANSFER_SIZE, SYNC,
};
use crate::device::Family;
use crate::error::{Error, Result};
use crate::link::ByteLink;
use crate::protocol::{encode_address, with_checksum, xor_checksum, Command, Reply};

/// Pulse widths and settle times around target resets.
///
/// The defaults suit real hardware; the mass-erase settle in particular
/// covers the implicit full-chip erase a readout unprotect performs.
#[derive(Debug, Clone)]
pub struct Timings {
    /// How long RESET stays asserted when pulsed.
    pub reset_pulse: Duration,
    /// Wait after releasing RESET before the ROM is responsive.
    pub startup_settle: Duration,
    /// Wait after a command that restarts the bootloader.
    pub restart_settle: Duration,
    /// Wait after readout unprotect, which also mass-erases the flash.
    pub mass_erase_settle: Duration,
    /// Read deadline while waiting for an erase to acknowledge.
    pub erase_ack_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            reset_pulse: Duration::from_millis(100),
            startup_settle: Duration::from_millis(500),
            restart_settle: Duration::from_millis(100),
            mass_erase_settle: Duration::from_secs(20),
            erase_ack_timeout: Duration::from_secs(30),
        }
    }
}

/// What the handshake learned about the connected part.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Bootloader protocol version, BCD major.minor.
    pub protocol_version: Option<u8>,
    /// The two option bytes from Get Version (read protection status).
    pub option_bytes: Option<(u8, u8)>,
    /// Product id; 12-bit for STM32, three bytes for BlueNRG.
    pub product_id: Option<u32>,
    /// Opcodes advertised by Get.
    pub commands: crate::protocol::CommandSet,
}

impl DeviceInfo {
    pub fn version_string(&self) -> Option<String> {
        self.protocol_version
            .map(|v| format!("{}.{}", v >> 4, v & 0xF))
    }
}

/// Which flavor of the erase command the target takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseDialect {
    /// Opcode 0x43, one-byte page indices, at most 255 pages.
    Legacy,
    /// Opcode 0x44, two-byte page indices.
    Extended,
}

const SYNC_ATTEMPTS: usize = 2;

pub struct Bootloader<L: ByteLink> {
    link: L,
    family: Option<Family>,
    info: DeviceInfo,
    timings: Timings,
}

impl<L: ByteLink> Bootloader<L> {
    pub fn new(link: L) -> Self {
        Bootloader {
            link,
            family: None,
            info: DeviceInfo::default(),
            timings: Timings::default(),
        }
    }

    pub fn with_family(mut self, family: Option<Family>) -> Self {
        self.family = family;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn family(&self) -> Option<&Family> {
        self.family.as_ref()
    }

    pub fn set_family(&mut self, family: Option<Family>) {
        self.family = family;
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    /// Reset into system memory and run the autobaud handshake.
    ///
    /// A NACK also counts as contact: it is what the bootloader answers
    /// when it was already activated and mid-command.
    pub fn reset_from_system_memory(&mut self) -> Result<()> {
        self.link.set_boot0(true)?;
        self.pulse_reset()?;
        // Discard boot noise; some USB bridges keep stale bytes around.
        self.link.flush_input()?;

        for attempt in 0..SYNC_ATTEMPTS {
            if attempt > 0 {
                log::warn!("bootloader activation timed out, retrying");
            }
            match self.synchronize() {
                Ok(()) => return Ok(()),
                Err(Error::Timeout) | Err(Error::Protocol { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(Error::BootloaderActivation)
    }

    /// Reset into user flash. No reply is expected.
    pub fn reset_from_flash(&mut self) -> Result<()> {
        self.link.set_boot0(false)?;
        self.pulse_reset()
    }

    fn pulse_reset(&mut self) -> Result<()> {
        self.link.set_reset(true)?;
        sleep(self.timings.reset_pulse);
        self.link.set_reset(false)?;
        sleep(self.timings.startup_settle);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.link.write_all(&[SYNC])?;
        match Reply::classify(self.read_byte()?) {
            Reply::Ack | Reply::Nack => Ok(()),
            Reply::Unexpected(got) => Err(Error::Protocol { expected: ACK, got }),
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = 0u8;
        self.link.read_exact(std::slice::from_mut(&mut byte))?;
        Ok(byte)
    }

    fn read_ack(&mut self) -> Result<()> {
        match Reply::classify(self.read_byte()?) {
            Reply::Ack => Ok(()),
            Reply::Nack => Err(Error::Nack),
            Reply::Unexpected(got) => Err(Error::Protocol { expected: ACK, got }),
        }
    }

    fn write_and_ack(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("=> {}", hex::encode(data));
        self.link.write_all(data)?;
        self.read_ack()
    }

    fn command(&mut self, command: Command) -> Result<()> {
        log::debug!("command {}", command);
        self.write_and_ack(&command.frame())
    }

    /// Get (0x00): bootloader version and the supported opcode list.
    pub fn get(&mut self) -> Result<u8> {
        self.command(Command::Get)?;
        let count = self.read_byte()? as usize;
        let version = self.read_byte()?;
        let mut opcodes = vec![0u8; count];
        self.link.read_exact(&mut opcodes)?;
        self.read_ack()?;

        self.info.protocol_version = Some(version);
        self.info.commands = opcodes.iter().copied().collect();
        log::debug!(
            "bootloader version {:#04x}, supported commands [{}]",
            version,
            hex::encode(&opcodes)
        );
        Ok(version)
    }

    /// Get Version & Read Protection Status (0x01).
    pub fn get_version(&mut self) -> Result<(u8, u8, u8)> {
        self.command(Command::GetVersion)?;
        let mut data = [0u8; 3];
        self.link.read_exact(&mut data)?;
        self.read_ack()?;

        self.info.protocol_version = Some(data[0]);
        self.info.option_bytes = Some((data[1], data[2]));
        Ok((data[0], data[1], data[2]))
    }

    /// Get ID (0x02): the product id. STM32 parts answer two bytes
    /// forming a 12-bit id; BlueNRG parts answer three (metal fix, mask
    /// set, die id).
    pub fn get_id(&mut self) -> Result<u32> {
        self.command(Command::GetId)?;
        let count = self.read_byte()? as usize;
        let mut id_bytes = vec![0u8; count + 1];
        self.link.read_exact(&mut id_bytes)?;
        self.read_ack()?;

        let id = id_bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        self.info.product_id = Some(id);
        Ok(id)
    }

    /// Read Memory (0x11), one frame of 1..=256 bytes.
    pub fn read_memory(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        let length = out.len();
        if length == 0 || length > MAX_TRANSFER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "read length {length} outside 1..=256"
            )));
        }
        // A frame must stay inside one 64 KiB segment.
        if (address as usize & 0xFFFF) + length > 0x1_0000 {
            return Err(Error::InvalidArgument(format!(
                "read of {length} bytes at {address:#010x} crosses a 64 KiB boundary"
            )));
        }
        self.command(Command::ReadMemory)?;
        self.write_and_ack(&encode_address(address))?;
        self.write_and_ack(&with_checksum(&[(length - 1) as u8]))?;
        self.link.read_exact(out)?;
        Ok(())
    }

    /// Write Memory (0x31), one frame of at most 256 bytes. Short frames
    /// are padded to a full word with the erased-flash value, which only
    /// touches cells an erase just left at 0xFF.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > MAX_TRANSFER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "write length {} exceeds 256",
                data.len()
            )));
        }
        self.command(Command::WriteMemory)?;
        self.write_and_ack(&encode_address(address))?;

        let mut padded = data.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(ERASED_BYTE);
        }
        let mut frame = Vec::with_capacity(padded.len() + 2);
        frame.push((padded.len() - 1) as u8);
        frame.extend_from_slice(&padded);
        frame.push(xor_checksum(&frame));
        self.write_and_ack(&frame)
    }

    /// Go (0x21): leave the bootloader through the vector table at
    /// `address`.
    pub fn go(&mut self, address: u32) -> Result<()> {
        self.command(Command::Go)?;
        self.write_and_ack(&encode_address(address))
    }

    /// Which erase command the connected part takes, per the opcode list
    /// Get advertised. Without a Get the legacy dialect is assumed.
    pub fn erase_dialect(&self) -> EraseDialect {
        if self.info.commands.supports(Command::ExtendedErase) {
            EraseDialect::Extended
        } else {
            EraseDialect::Legacy
        }
    }

    /// Erase the whole user flash with the dialect's sentinel form.
    pub fn mass_erase(&mut self) -> Result<()> {
        match self.erase_dialect() {
            EraseDialect::Legacy => {
                self.command(Command::Erase)?;
                self.write_erase_payload(&[0xFF, 0x00])
            }
            EraseDialect::Extended => {
                self.command(Command::ExtendedErase)?;
                self.write_erase_payload(&[0xFF, 0xFF, 0x00])
            }
        }
    }

    /// Erase the given zero-based pages (sectors, on sector-mapped
    /// parts). The page list is validated against the dialect's index
    /// width before anything goes on the wire.
    pub fn erase_pages(&mut self, pages: &[u32]) -> Result<()> {
        if pages.is_empty() {
            return Err(Error::InvalidArgument("page list is empty".into()));
        }
        let mut distinct = pages.to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != pages.len() {
            log::warn!("page list contains duplicate indices");
        }
        match self.erase_dialect() {
            EraseDialect::Legacy => self.erase_pages_legacy(pages),
            EraseDialect::Extended => self.erase_pages_extended(pages),
        }
    }

    fn erase_pages_legacy(&mut self, pages: &[u32]) -> Result<()> {
        if pages.len() > LEGACY_ERASE_MAX_PAGES {
            return Err(Error::UnsupportedOperation(format!(
                "legacy erase addresses at most {LEGACY_ERASE_MAX_PAGES} pages, got {}",
                pages.len()
            )));
        }
        let mut payload = Vec::with_capacity(pages.len() + 2);
        payload.push((pages.len() - 1) as u8);
        for &page in pages {
            let index = u8::try_from(page).map_err(|_| {
                Error::UnsupportedOperation(format!(
                    "page index {page} does not fit the legacy one-byte erase"
                ))
            })?;
            payload.push(index);
        }
        payload.push(xor_checksum(&payload));

        self.command(Command::Erase)?;
        self.write_erase_payload(&payload)
    }

    fn erase_pages_extended(&mut self, pages: &[u32]) -> Result<()> {
        if pages.len() > EXTENDED_ERASE_MAX_PAGES {
            return Err(Error::UnsupportedOperation(format!(
                "extended erase addresses at most {EXTENDED_ERASE_MAX_PAGES} pages, got {}",
                pages.len()
            )));
        }
        let mut payload = Vec::with_capacity(2 * pages.len() + 3);
        payload.extend_from_slice(&((pages.len() - 1) as u16).to_be_bytes());
        for &page in pages {
            let index = u16::try_from(page).map_err(|_| {
                Error::UnsupportedOperation(format!(
                    "page index {page} does not fit the extended two-byte erase"
                ))
            })?;
            payload.extend_from_slice(&index.to_be_bytes());
        }
        payload.push(xor_checksum(&payload));

        self.command(Command::ExtendedErase)?;
        self.write_erase_payload(&payload)
    }

    /// Erasing can take tens of seconds, so the ACK wait runs under a
    /// raised read deadline.
    fn write_erase_payload(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("=> {}", hex::encode(payload));
        self.link.write_all(payload)?;
        let saved = self.link.read_timeout();
        self.link.set_read_timeout(self.timings.erase_ack_timeout)?;
        let result = self.read_ack();
        self.link.set_read_timeout(saved)?;
        result
    }

    /// Write Protect (0x63) for the given sectors. The bootloader resets
    /// afterwards; the engine re-activates before returning.
    pub fn write_protect(&mut self, sectors: &[u32]) -> Result<()> {
        if sectors.is_empty() {
            return Err(Error::InvalidArgument("sector list is empty".into()));
        }
        if sectors.len() > LEGACY_ERASE_MAX_PAGES {
            return Err(Error::UnsupportedOperation(format!(
                "write protect addresses at most {LEGACY_ERASE_MAX_PAGES} sectors, got {}",
                sectors.len()
            )));
        }
        let mut payload = Vec::with_capacity(sectors.len() + 2);
        payload.push((sectors.len() - 1) as u8);
        for &sector in sectors {
            let index = u8::try_from(sector).map_err(|_| {
                Error::UnsupportedOperation(format!(
                    "sector index {sector} does not fit a one-byte field"
                ))
            })?;
            payload.push(index);
        }
        payload.push(xor_checksum(&payload));

        self.command(Command::WriteProtect)?;
        self.write_and_ack(&payload)?;
        self.restart_after(Command::WriteProtect)
    }

    /// Write Unprotect (0x73). Resets the bootloader.
    pub fn write_unprotect(&mut self) -> Result<()> {
        self.command(Command::WriteUnprotect)?;
        self.read_ack()?;
        self.restart_after(Command::WriteUnprotect)
    }

    /// Readout Protect (0x82). Resets the bootloader.
    pub fn readout_protect(&mut self) -> Result<()> {
        self.command(Command::ReadoutProtect)?;
        self.read_ack()?;
        self.restart_after(Command::ReadoutProtect)
    }

    /// Readout Unprotect (0x92). Mass-erases the flash as a side effect,
    /// then resets the bootloader.
    pub fn readout_unprotect(&mut self) -> Result<()> {
        self.command(Command::ReadoutUnprotect)?;
        self.read_ack()?;
        self.restart_after(Command::ReadoutUnprotect)
    }

    /// Protection commands restart the target; nothing else may go on the
    /// wire until the autobaud handshake has run again, so it runs here
    /// rather than being left to callers.
    fn restart_after(&mut self, command: Command) -> Result<()> {
        debug_assert!(command.resets_target());
        let settle = if command == Command::ReadoutUnprotect {
            self.timings.mass_erase_settle
        } else {
            self.timings.restart_settle
        };
        log::debug!("{command} restarts the bootloader, re-activating");
        sleep(settle);
        self.reset_from_system_memory()
    }

    fn known_family(&self) -> Result<&Family> {
        self.family
            .as_ref()
            .ok_or_else(|| Error::UnknownFamily("none specified".into()))
    }

    /// Flash size in bytes, read from the family's size register.
    pub fn get_flash_size_bytes(&mut self) -> Result<u32> {
        let family = self.known_family()?;
        let tag = family.tag.clone();
        let address = family.flash_size_address.ok_or_else(|| {
            Error::UnsupportedOperation(format!("no flash size register known for family {tag}"))
        })?;
        let mut raw = [0u8; 2];
        self.read_memory(address, &mut raw)?;
        Ok(u32::from(u16::from_le_bytes(raw)) * 1024)
    }

    /// The 96-bit unique device id, or `None` on parts that have none.
    pub fn get_uid(&mut self) -> Result<Option<[u8; 12]>> {
        let family = self.known_family()?;
        let Some(address) = family.uid_address else {
            return Ok(None);
        };
        let mut uid = [0u8; 12];
        self.read_memory(address, &mut uid)?;
        Ok(Some(uid))
    }

    /// Size and UID in a single block read.
    ///
    /// F4 and L0 bootloaders have been seen to NACK the short register
    /// reads that `get_flash_size_bytes`/`get_uid` issue; fetching the
    /// whole block containing both registers works on every part.
    pub fn get_flash_size_and_uid(&mut self) -> Result<(u32, [u8; 12])> {
        let family = self.known_family()?;
        let tag = family.tag.clone();
        let transfer = family.transfer_size;
        let uid_address = family.uid_address.ok_or_else(|| {
            Error::UnsupportedOperation(format!("no UID register known for family {tag}"))
        })?;
        let size_address = family.flash_size_address.ok_or_else(|| {
            Error::UnsupportedOperation(format!("no flash size register known for family {tag}"))
        })?;

        let block_start = uid_address & 0xFFFF_FF00;
        let uid_offset = (uid_address - block_start) as usize;
        let size_offset = size_address.checked_sub(block_start).map(|o| o as usize);
        let size_offset = match size_offset {
            Some(offset) if offset + 2 <= transfer && uid_offset + 12 <= transfer => offset,
            _ => {
                return Err(Error::UnsupportedOperation(format!(
                    "family {tag} registers do not share a readable block"
                )))
            }
        };

        let mut block = vec![0u8; transfer];
        self.read_memory(block_start, &mut block)?;

        let mut uid = [0u8; 12];
        uid.copy_from_slice(&block[uid_offset..uid_offset + 12]);
        let size = u16::from_le_bytes([block[size_offset], block[size_offset + 1]]);
        Ok((u32::from(size) * 1024, uid))
    }

    /// UID in the word-swapped grouping ST tools print.
    pub fn format_uid(uid: &[u8; 12]) -> String {
        const GROUPS: [&[usize]; 4] = [&[1, 0], &[3, 2], &[7, 6, 5, 4], &[11, 10, 9, 8]];
        GROUPS
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|&i| format!("{:02X}", uid[i]))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Catalog;
    use crate::link::mock::MockLink;

    fn fast_timings() -> Timings {
        Timings {
            reset_pulse: Duration::from_millis(1),
            startup_settle: Duration::from_millis(1),
            restart_settle: Duration::from_millis(1),
            mass_erase_settle: Duration::from_millis(1),
            erase_ack_timeout: Duration::from_millis(50),
        }
    }

    fn boot(link: MockLink) -> Bootloader<MockLink> {
        Bootloader::new(link).with_timings(fast_timings())
    }

    fn boot_with_family(link: MockLink, tag: &str) -> Bootloader<MockLink> {
        let family = Catalog::load().unwrap().family_by_tag(tag).cloned();
        boot(link).with_family(family)
    }

    /// Reach into the engine's link to inspect recorded traffic.
    fn written(boot: &Bootloader<MockLink>) -> &[u8] {
        &boot.link.written
    }

    #[test]
    fn activation_sends_sync_after_reset_pulse() {
        let mut link = MockLink::new();
        link.queue_ack();
        let mut boot = boot(link);
        boot.reset_from_system_memory().unwrap();

        assert_eq!(written(&boot), &[SYNC]);
        assert_eq!(boot.link.boot0_states, vec![true]);
        assert_eq!(boot.link.reset_states, vec![true, false]);
        assert_eq!(boot.link.flushes, 1);
    }

    #[test]
    fn activation_accepts_nack_reply() {
        let mut link = MockLink::new();
        link.queue(&[crate::constants::NACK]);
        boot(link).reset_from_system_memory().unwrap();
    }

    #[test]
    fn activation_retries_once_then_fails() {
        let link = MockLink::new(); // silent target
        let mut boot = boot(link);
        let err = boot.reset_from_system_memory().unwrap_err();
        assert!(matches!(err, Error::BootloaderActivation));
        // One sync byte per attempt.
        assert_eq!(written(&boot), &[SYNC, SYNC]);
    }

    #[test]
    fn activation_then_get_id() {
        let mut link = MockLink::new();
        link.queue_ack(); // sync
        link.queue_ack(); // Get ID command
        link.queue(&[0x01, 0x04, 0x40]); // count, id bytes
        link.queue_ack();
        let mut boot = boot(link);
        boot.reset_from_system_memory().unwrap();
        assert_eq!(boot.get_id().unwrap(), 0x440);
        assert_eq!(written(&boot), &[SYNC, 0x02, 0xFD]);
        assert_eq!(boot.info().product_id, Some(0x440));
    }

    #[test]
    fn get_learns_version_and_command_set() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue(&[0x0B, 0x31]); // 11 opcodes follow, version 3.1
        link.queue(&[
            0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x44, 0x63, 0x73, 0x82, 0x92,
        ]);
        link.queue_ack();
        let mut boot = boot(link);
        assert_eq!(boot.get().unwrap(), 0x31);
        assert_eq!(boot.info().version_string().as_deref(), Some("3.1"));
        assert!(boot.info().commands.supports(Command::ExtendedErase));
        assert!(!boot.info().commands.supports(Command::Erase));
        assert_eq!(boot.erase_dialect(), EraseDialect::Extended);
    }

    #[test]
    fn get_version_reports_option_bytes() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue(&[0x22, 0x01, 0x02]);
        link.queue_ack();
        let mut boot = boot(link);
        assert_eq!(boot.get_version().unwrap(), (0x22, 0x01, 0x02));
        assert_eq!(boot.info().option_bytes, Some((0x01, 0x02)));
    }

    #[test]
    fn read_memory_wire_sequence() {
        let mut link = MockLink::new();
        link.queue_ack(); // command
        link.queue_ack(); // address
        link.queue_ack(); // length
        link.queue(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut boot = boot(link);
        let mut out = [0u8; 4];
        boot.read_memory(0x0800_0000, &mut out).unwrap();
        assert_eq!(out, [0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(
            written(&boot),
            &[
                0x11, 0xEE, // command frame
                0x08, 0x00, 0x00, 0x00, 0x08, // address + checksum
                0x03, 0xFC, // length-1 + complement
            ]
        );
    }

    #[test]
    fn read_memory_rejects_boundary_crossing() {
        let mut boot = boot(MockLink::new());
        let mut out = [0u8; 0x40];
        let err = boot.read_memory(0x0800_FFF0, &mut out).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(written(&boot).is_empty());
    }

    #[test]
    fn read_memory_rejects_oversized_frame() {
        let mut boot = boot(MockLink::new());
        let mut out = [0u8; 257];
        assert!(matches!(
            boot.read_memory(0, &mut out),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn write_memory_pads_to_full_word() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.write_memory(0x0800_0000, &[0xAA, 0xBB, 0xCC]).unwrap();
        let checksum: u8 = 0x03 ^ 0xAA ^ 0xBB ^ 0xCC ^ 0xFF;
        assert_eq!(
            written(&boot),
            &[
                0x31, 0xCE,
                0x08, 0x00, 0x00, 0x00, 0x08,
                0x03, 0xAA, 0xBB, 0xCC, 0xFF, checksum,
            ]
        );
    }

    #[test]
    fn write_memory_empty_is_a_no_op() {
        let mut boot = boot(MockLink::new());
        boot.write_memory(0x0800_0000, &[]).unwrap();
        assert!(written(&boot).is_empty());
    }

    #[test]
    fn go_sends_address_frame() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.go(0x0800_0000).unwrap();
        assert_eq!(written(&boot), &[0x21, 0xDE, 0x08, 0x00, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn legacy_page_erase_wire_sequence() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.erase_pages(&[0, 2, 5]).unwrap();
        assert_eq!(written(&boot), &[0x43, 0xBC, 0x02, 0x00, 0x02, 0x05, 0x05]);
    }

    #[test]
    fn legacy_mass_erase_sentinel() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.mass_erase().unwrap();
        assert_eq!(written(&boot), &[0x43, 0xBC, 0xFF, 0x00]);
    }

    #[test]
    fn extended_mass_erase_sentinel() {
        let mut link = MockLink::new();
        link.queue_ack(); // get
        link.queue(&[0x03, 0x31, 0x11, 0x31, 0x44]);
        link.queue_ack();
        link.queue_ack(); // erase command
        link.queue_ack(); // erase payload
        let mut boot = boot(link);
        boot.get().unwrap();
        boot.mass_erase().unwrap();
        let tail = &written(&boot)[2..];
        assert_eq!(tail, &[0x44, 0xBB, 0xFF, 0xFF, 0x00]);
    }

    #[test]
    fn extended_page_erase_uses_two_byte_indices() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue(&[0x01, 0x31, 0x44]);
        link.queue_ack();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.get().unwrap();
        boot.erase_pages(&[0x11, 0x12, 0x13, 0x14]).unwrap();
        let tail = &written(&boot)[2..];
        let checksum: u8 = 0x03 ^ 0x11 ^ 0x12 ^ 0x13 ^ 0x14;
        assert_eq!(
            tail,
            &[
                0x44, 0xBB, // command frame
                0x00, 0x03, // page count - 1, big-endian
                0x00, 0x11, 0x00, 0x12, 0x00, 0x13, 0x00, 0x14, checksum,
            ]
        );
    }

    #[test]
    fn legacy_erase_rejects_wide_indices() {
        let mut boot = boot(MockLink::new());
        assert!(matches!(
            boot.erase_pages(&[3, 300]),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(written(&boot).is_empty());
    }

    #[test]
    fn legacy_erase_rejects_too_many_pages() {
        let mut boot = boot(MockLink::new());
        let pages: Vec<u32> = (0..256).collect();
        assert!(matches!(
            boot.erase_pages(&pages),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn empty_page_list_is_invalid() {
        let mut boot = boot(MockLink::new());
        assert!(matches!(
            boot.erase_pages(&[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn nack_surfaces_as_error() {
        let mut link = MockLink::new();
        link.queue(&[crate::constants::NACK]);
        let mut boot = boot(link);
        assert!(matches!(boot.get(), Err(Error::Nack)));
    }

    #[test]
    fn garbage_reply_reports_expected_and_got() {
        let mut link = MockLink::new();
        link.queue(&[0x42]);
        let mut boot = boot(link);
        match boot.get() {
            Err(Error::Protocol { expected, got }) => {
                assert_eq!(expected, ACK);
                assert_eq!(got, 0x42);
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn readout_unprotect_reactivates_before_next_command() {
        let mut link = MockLink::new();
        link.queue_ack(); // command ack
        link.queue_ack(); // second ack
        link.queue_ack(); // sync ack after the self-reset
        let mut boot = boot(link);
        boot.readout_unprotect().unwrap();

        // The only byte after the command frame is the autobaud byte.
        assert_eq!(written(&boot), &[0x92, 0x6D, SYNC]);
        assert!(boot.link.replies_exhausted());
    }

    #[test]
    fn write_protect_sends_sectors_then_reactivates() {
        let mut link = MockLink::new();
        link.queue_ack(); // command
        link.queue_ack(); // sector list
        link.queue_ack(); // sync after self-reset
        let mut boot = boot(link);
        boot.write_protect(&[2, 5, 9]).unwrap();
        assert_eq!(
            written(&boot),
            &[0x63, 0x9C, 0x02, 0x02, 0x05, 0x09, 0x0C, SYNC]
        );
    }

    #[test]
    fn write_unprotect_reads_two_acks_then_reactivates() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        link.queue_ack();
        let mut boot = boot(link);
        boot.write_unprotect().unwrap();
        assert_eq!(written(&boot), &[0x73, 0x8C, SYNC]);
    }

    #[test]
    fn flash_size_reads_family_register() {
        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        link.queue_ack();
        link.queue(&[0x80, 0x00]); // 128 KiB, little-endian
        let mut boot = boot_with_family(link, "F1");
        assert_eq!(boot.get_flash_size_bytes().unwrap(), 128 * 1024);
        // Address frame carries the F1 size register.
        assert_eq!(
            &written(&boot)[2..7],
            &[0x1F, 0xFF, 0xF7, 0xE0, 0x1F ^ 0xFF ^ 0xF7 ^ 0xE0]
        );
    }

    #[test]
    fn uid_is_none_on_parts_without_one() {
        let mut boot = boot_with_family(MockLink::new(), "F0");
        assert_eq!(boot.get_uid().unwrap(), None);
        assert!(written(&boot).is_empty());
    }

    #[test]
    fn introspection_without_family_is_an_error() {
        let mut boot = boot(MockLink::new());
        assert!(matches!(
            boot.get_flash_size_bytes(),
            Err(Error::UnknownFamily(_))
        ));
        assert!(matches!(boot.get_uid(), Err(Error::UnknownFamily(_))));
    }

    #[test]
    fn combined_size_and_uid_reads_one_block() {
        let catalog = Catalog::load().unwrap();
        let family = catalog.family_by_tag("L0").unwrap();
        let uid_offset = (family.uid_address.unwrap() & 0xFF) as usize;
        let size_offset = (family.flash_size_address.unwrap() & 0xFF) as usize;

        let mut block = vec![0u8; family.transfer_size];
        block[uid_offset..uid_offset + 12].copy_from_slice(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
        ]);
        block[size_offset] = 0x40; // 64 KiB
        block[size_offset + 1] = 0x00;

        let mut link = MockLink::new();
        link.queue_ack();
        link.queue_ack();
        link.queue_ack();
        link.queue(&block);
        let mut boot = boot_with_family(link, "L0");
        let (size, uid) = boot.get_flash_size_and_uid().unwrap();
        assert_eq!(size, 64 * 1024);
        assert_eq!(uid[0], 0x01);
        assert_eq!(uid[11], 0x0C);
    }

    #[test]
    fn uid_formatting_matches_st_grouping() {
        let uid = [
            0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0x01, 0x12, 0x34, 0x56, 0x78,
        ];
        assert_eq!(
            Bootloader::<MockLink>::format_uid(&uid),
            "3412-7856-01DEBC9A-78563412"
        );
    }
}
