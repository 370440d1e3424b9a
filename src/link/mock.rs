//! Scripted in-memory link for protocol tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::constants::ACK;
use crate::error::{Error, Result};

use super::ByteLink;

/// Records everything the engine writes and replays a scripted reply
/// stream. An exhausted reply stream reads as a timeout, which is exactly
/// what a silent target looks like.
#[derive(Debug, Default)]
pub struct MockLink {
    replies: VecDeque<u8>,
    pub written: Vec<u8>,
    pub reset_states: Vec<bool>,
    pub boot0_states: Vec<bool>,
    pub flushes: usize,
    timeout: Duration,
}

impl MockLink {
    pub fn new() -> Self {
        MockLink {
            timeout: Duration::from_millis(50),
            ..MockLink::default()
        }
    }

    pub fn queue(&mut self, bytes: &[u8]) {
        self.replies.extend(bytes);
    }

    pub fn queue_ack(&mut self) {
        self.replies.push_back(ACK);
    }

    pub fn replies_exhausted(&self) -> bool {
        self.replies.is_empty()
    }
}

impl ByteLink for MockLink {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.replies.len() < buf.len() {
            // Partial data stays discarded, like a real starved read.
            self.replies.clear();
            return Err(Error::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = self.replies.pop_front().unwrap();
        }
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        // Boot noise is not scripted, so there is nothing to drop here;
        // only the fact that a flush happened is interesting.
        self.flushes += 1;
        Ok(())
    }

    fn set_reset(&mut self, active: bool) -> Result<()> {
        self.reset_states.push(active);
        Ok(())
    }

    fn set_boot0(&mut self, active: bool) -> Result<()> {
        self.boot0_states.push(active);
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
