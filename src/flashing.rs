//! Multi-frame transfers on top of the protocol engine.
//!
//! Splits arbitrary-length reads and writes into protocol-sized frames,
//! drives erase, produces verification read-backs and reports progress to
//! an observer callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::MAX_TRANSFER_SIZE;
use crate::error::{Error, Result};
use crate::link::ByteLink;
use crate::Bootloader;

/// Handed to the progress observer once per protocol frame.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub bytes_done: usize,
    pub bytes_total: usize,
}

/// Chunked transfer driver. Owns the protocol engine (and through it the
/// link) for its lifetime; the port closes when this is dropped.
pub struct Flashing<L: ByteLink> {
    boot: Bootloader<L>,
    transfer_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<L: ByteLink> Flashing<L> {
    pub fn new(boot: Bootloader<L>) -> Self {
        let transfer_size = boot
            .family()
            .map(|f| f.transfer_size)
            .unwrap_or(MAX_TRANSFER_SIZE);
        Flashing {
            boot,
            transfer_size,
            cancel: None,
        }
    }

    /// Install a flag a signal handler may set; transfers stop at the
    /// next chunk boundary once it reads true. The device is left
    /// mid-operation, so callers should erase before retrying.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn bootloader(&mut self) -> &mut Bootloader<L> {
        &mut self.boot
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Length of the frame starting at `address`: capped by the family
    /// transfer size and clipped so no frame crosses a 64 KiB segment.
    fn chunk_len(&self, address: u32, remaining: usize) -> usize {
        let to_segment_end = 0x1_0000 - (address as usize & 0xFFFF);
        remaining.min(self.transfer_size).min(to_segment_end)
    }

    /// Read `length` bytes starting at `address`.
    ///
    /// Fails fast: any chunk error discards everything read so far.
    pub fn read_memory_data(
        &mut self,
        address: u32,
        length: usize,
        mut progress: impl FnMut(Progress),
    ) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(length);
        let mut offset = 0usize;
        log::debug!("reading {length} bytes at {address:#010x}");
        while offset < length {
            self.check_cancelled()?;
            let chunk_address = address + offset as u32;
            let chunk_len = self.chunk_len(chunk_address, length - offset);
            let start = data.len();
            data.resize(start + chunk_len, 0);
            self.boot
                .read_memory(chunk_address, &mut data[start..])?;
            offset += chunk_len;
            progress(Progress {
                bytes_done: offset,
                bytes_total: length,
            });
        }
        Ok(data)
    }

    /// Write `data` starting at `address`. The address must sit on a
    /// word boundary; the engine pads a short final frame with 0xFF.
    pub fn write_memory_data(
        &mut self,
        address: u32,
        data: &[u8],
        mut progress: impl FnMut(Progress),
    ) -> Result<()> {
        if address % 4 != 0 {
            return Err(Error::InvalidArgument(format!(
                "write address {address:#010x} is not word-aligned"
            )));
        }
        let mut offset = 0usize;
        log::debug!("writing {} bytes at {address:#010x}", data.len());
        while offset < data.len() {
            self.check_cancelled()?;
            let chunk_address = address + offset as u32;
            let chunk_len = self.chunk_len(chunk_address, data.len() - offset);
            self.boot
                .write_memory(chunk_address, &data[offset..offset + chunk_len])?;
            offset += chunk_len;
            progress(Progress {
                bytes_done: offset,
                bytes_total: data.len(),
            });
        }
        Ok(())
    }

    /// Erase the given pages, or the whole flash when `pages` is `None`.
    ///
    /// L0 parts get no working mass-erase command, so a full erase there
    /// expands into erasing every page individually.
    pub fn erase_memory(&mut self, pages: Option<&[u32]>) -> Result<()> {
        match pages {
            Some([]) => Err(Error::InvalidArgument("page list is empty".into())),
            Some(pages) => self.boot.erase_pages(pages),
            None => {
                if let Some(pages) = self.l0_full_erase_pages()? {
                    self.boot.erase_pages(&pages)
                } else {
                    self.boot.mass_erase()
                }
            }
        }
    }

    fn l0_full_erase_pages(&mut self) -> Result<Option<Vec<u32>>> {
        let Some(family) = self.boot.family() else {
            return Ok(None);
        };
        if family.tag != "L0" {
            return Ok(None);
        }
        let Some(page_size) = family.flash_page_size else {
            return Ok(None);
        };
        let flash_size = self.boot.get_flash_size_bytes()?;
        let page_count = flash_size / page_size;
        Ok(Some((0..page_count).collect()))
    }

    /// Read back `expected.len()` bytes and compare.
    pub fn verify(
        &mut self,
        address: u32,
        expected: &[u8],
        progress: impl FnMut(Progress),
    ) -> Result<()> {
        let actual = self.read_memory_data(address, expected.len(), progress)?;
        for (offset, (&want, &got)) in expected.iter().zip(actual.iter()).enumerate() {
            if want != got {
                return Err(Error::Mismatch {
                    offset,
                    expected: want,
                    actual: got,
                });
            }
        }
        Ok(())
    }

    /// Page indices covering `[start, end)`, both page-aligned.
    ///
    /// Refuses families without a uniform page size (F2/F4/F7/H7 use
    /// variable sectors) instead of inventing a layout.
    pub fn pages_from_range(&self, start: u32, end: u32) -> Result<Vec<u32>> {
        let family = self.boot.family().ok_or_else(|| {
            Error::UnknownFamily("a family is needed to turn addresses into pages".into())
        })?;
        let page_size = family.flash_page_size.ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "family {} has variable-size sectors; pass explicit pages",
                family.tag
            ))
        })?;
        if start % page_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "erase start {start:#010x} is not on a {page_size}-byte page boundary"
            )));
        }
        if end % page_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "erase end {end:#010x} is not on a {page_size}-byte page boundary"
            )));
        }
        Ok((start / page_size..end / page_size).collect())
    }
}
