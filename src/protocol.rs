//! Wire-level building blocks of the STM32 USART bootloader protocol.
//!
//! Every frame is a payload followed by an XOR checksum; single-byte
//! payloads carry their own complement instead. Nothing in this module
//! interprets payload semantics, it only produces and checks the bytes.

use std::fmt;

use crate::constants::{ACK, NACK};

/// Bootloader command opcodes, per ST AN3155 and AN4872.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Bootloader version plus the list of supported opcodes.
    Get = 0x00,
    /// Bootloader version and the read protection option bytes.
    GetVersion = 0x01,
    /// 12-bit product id (three bytes on BlueNRG parts).
    GetId = 0x02,
    /// Up to 256 bytes from an arbitrary address.
    ReadMemory = 0x11,
    /// Jump to user code through the vector table at an address.
    Go = 0x21,
    /// Up to 256 bytes to RAM or flash.
    WriteMemory = 0x31,
    /// Page erase with one-byte page indices.
    Erase = 0x43,
    /// Page erase with two-byte page indices, v3.0+ bootloaders.
    ExtendedErase = 0x44,
    WriteProtect = 0x63,
    WriteUnprotect = 0x73,
    ReadoutProtect = 0x82,
    ReadoutUnprotect = 0x92,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// The two-byte frame that introduces a command: opcode plus complement.
    pub const fn frame(self) -> [u8; 2] {
        [self as u8, (self as u8) ^ 0xFF]
    }

    /// True for commands after which the bootloader resets itself, forcing
    /// the host to redo the autobaud handshake.
    pub const fn resets_target(self) -> bool {
        matches!(
            self,
            Command::WriteProtect
                | Command::WriteUnprotect
                | Command::ReadoutProtect
                | Command::ReadoutUnprotect
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.opcode())
    }
}

/// XOR-fold of a byte slice, the protocol's only checksum.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Payload with its checksum byte appended. A single byte is protected by
/// its complement rather than a fold (which would be the byte itself).
pub fn with_checksum(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(match payload {
        [single] => single ^ 0xFF,
        _ => xor_checksum(payload),
    });
    frame
}

/// Address as it travels on the wire: four big-endian bytes plus checksum.
pub fn encode_address(address: u32) -> [u8; 5] {
    let bytes = address.to_be_bytes();
    [
        bytes[0],
        bytes[1],
        bytes[2],
        bytes[3],
        xor_checksum(&bytes),
    ]
}

/// Outcome of a single reply byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack,
    Unexpected(u8),
}

impl Reply {
    pub fn classify(byte: u8) -> Self {
        match byte {
            ACK => Reply::Ack,
            NACK => Reply::Nack,
            other => Reply::Unexpected(other),
        }
    }
}

/// Set of opcodes advertised by the Get command, indexed 0..=255.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandSet([u64; 4]);

impl CommandSet {
    pub const fn new() -> Self {
        CommandSet([0; 4])
    }

    pub fn insert(&mut self, opcode: u8) {
        self.0[opcode as usize / 64] |= 1 << (opcode % 64);
    }

    pub fn contains(&self, opcode: u8) -> bool {
        self.0[opcode as usize / 64] & (1 << (opcode % 64)) != 0
    }

    pub fn supports(&self, command: Command) -> bool {
        self.contains(command.opcode())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; 4]
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u16..=255).map(|op| op as u8).filter(|&op| self.contains(op))
    }
}

impl FromIterator<u8> for CommandSet {
    fn from_iter<I: IntoIterator<Item = u8>>(opcodes: I) -> Self {
        let mut set = CommandSet::new();
        for opcode in opcodes {
            set.insert(opcode);
        }
        set
    }
}
