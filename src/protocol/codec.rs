//! Frame reassembly across `recv` boundaries.
//!
//! The control socket delivers an arbitrary byte stream; frames may span
//! reads or arrive several per read. The buffer accumulates bytes at its
//! tail, hands out complete frames from its head, and compacts the
//! unconsumed remainder back to offset zero so a partial frame is always
//! contiguous before the next read.

use super::message::{Frame, HDR_SZ, MSG_BUF_SIZE};
use crate::error::{Error, Result};

/// Fixed-capacity reassembly buffer for control frames.
pub struct FrameBuffer {
    buf: Vec<u8>,
    len: usize,
    offset: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer {
            buf: vec![0u8; MSG_BUF_SIZE],
            len: 0,
            offset: 0,
        }
    }

    /// Writable tail. `recv` directly into this slice, then call
    /// [`advance`](Self::advance) with the byte count.
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Record `n` bytes appended to the tail by the caller.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.buf.len());
        self.len += n;
    }

    /// Extract the next complete frame, if any.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A frame whose total
    /// on-wire size exceeds the buffer capacity can never complete and is
    /// a protocol violation.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let avail = self.len - self.offset;
        if avail < HDR_SZ {
            return Ok(None);
        }
        let length =
            u16::from_le_bytes([self.buf[self.offset], self.buf[self.offset + 1]]) as usize;
        if HDR_SZ + length > self.buf.len() {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds the {} byte reassembly buffer",
                HDR_SZ + length,
                self.buf.len()
            )));
        }
        if avail < HDR_SZ + length {
            return Ok(None);
        }
        let cmd = self.buf[self.offset + 2];
        let start = self.offset + HDR_SZ;
        let payload = self.buf[start..start + length].to_vec();
        self.offset += HDR_SZ + length;
        Ok(Some(Frame { cmd, payload }))
    }

    /// Move the unconsumed tail back to the start of the buffer.
    ///
    /// Required after draining frames: a partial frame left mid-buffer
    /// would otherwise starve the writable tail.
    pub fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        self.buf.copy_within(self.offset..self.len, 0);
        self.len -= self.offset;
        self.offset = 0;
    }

    /// Unconsumed byte count.
    pub fn pending(&self) -> usize {
        self.len - self.offset
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
