//! Control-plane wire format
//!
//! # TCP Protocol Specification
//!
//! Every control message, in both directions, is a length-prefixed frame:
//!
//! ```text
//! ┌───────────────────┬─────────────┬────────────────────┐
//! │ Length (2 bytes)  │ Cmd (1 byte)│ Payload (variable) │
//! │ Little-endian u16 │ Command code│ Command-specific   │
//! └───────────────────┴─────────────┴────────────────────┘
//! ```
//!
//! ## Framing
//!
//! - **Length field**: payload byte count only; a frame occupies
//!   `HDR_SZ + length` bytes on the wire
//! - **Byte order**: little-endian throughout
//! - **Maximum frame size**: `MSG_BUF_SIZE` (64 KiB); larger frames are a
//!   protocol violation and terminate the session
//!
//! There is no sync word and no checksum; TCP provides ordering and
//! integrity, the length prefix provides delimiting.

use crate::error::{Error, Result};

/// Frame header size: u16 length + u8 command code.
pub const HDR_SZ: usize = 3;

/// Acquisition transfer unit and control-session transmit buffer size.
pub const BUF_SIZE: usize = 64 * 1024;

/// Reassembly buffer size. Holds at least one maximal frame.
pub const MSG_BUF_SIZE: usize = 64 * 1024;

/// ControllerMessage header size: ctrl u8 + addr u16 + len u16.
pub const CTRL_MSG_HDR_SZ: usize = 5;

/// Command codes shared with the remote client.
///
/// The numeric values are the wire contract; they must match the client's
/// header and never change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Read the scope serial number (11-byte reply)
    Serial = 13,
    /// Read the PIC firmware version (4-byte LE reply)
    PicFwVersion = 14,
    /// Flush the scope data pipe (no reply)
    Flush = 15,
    /// Flash the FPGA bitstream carried in the payload (1-byte 0xFF ack)
    FlashFpga = 16,
    /// Orderly client disconnect (no reply, session ends)
    Disconnect = 17,
    /// Inline acquisition data read of a requested length
    Data = 18,
    /// Start the bulk data session; reply carries the data port (u16 LE)
    DataPort = 19,
    /// Inline acquisition read, retried until non-empty
    Acquisition = 20,
    /// Write a controller register (no reply)
    Set = 21,
    /// Read a controller register (echoed header + register bytes)
    Get = 22,
}

impl Command {
    /// Decode a command code from the wire. `None` for unknown codes.
    pub fn from_u8(value: u8) -> Option<Command> {
        match value {
            13 => Some(Command::Serial),
            14 => Some(Command::PicFwVersion),
            15 => Some(Command::Flush),
            16 => Some(Command::FlashFpga),
            17 => Some(Command::Disconnect),
            18 => Some(Command::Data),
            19 => Some(Command::DataPort),
            20 => Some(Command::Acquisition),
            21 => Some(Command::Set),
            22 => Some(Command::Get),
            _ => None,
        }
    }
}

/// One decoded control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command code. Kept raw so unknown codes can be logged.
    pub cmd: u8,
    /// Command-specific payload.
    pub payload: Vec<u8>,
}

/// Append an encoded frame to `out`.
pub fn encode_frame(cmd: Command, payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.push(cmd as u8);
    out.extend_from_slice(payload);
}

/// Nested payload of `SET`/`GET`: a register access on one of the scope's
/// controllers.
///
/// Wire layout: ctrl (u8), addr (u16 LE), len (u16 LE), then `len` data
/// bytes on `SET`. `GET` requests carry the header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerMessage {
    pub ctrl: u8,
    pub addr: u16,
    pub len: u16,
}

impl ControllerMessage {
    /// Split a frame payload into the register header and the trailing
    /// data bytes.
    pub fn parse(payload: &[u8]) -> Result<(ControllerMessage, &[u8])> {
        if payload.len() < CTRL_MSG_HDR_SZ {
            return Err(Error::Protocol(format!(
                "controller message truncated: {} bytes",
                payload.len()
            )));
        }
        let msg = ControllerMessage {
            ctrl: payload[0],
            addr: u16::from_le_bytes([payload[1], payload[2]]),
            len: u16::from_le_bytes([payload[3], payload[4]]),
        };
        Ok((msg, &payload[CTRL_MSG_HDR_SZ..]))
    }

    /// Append the 5-byte header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.ctrl);
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
    }
}
