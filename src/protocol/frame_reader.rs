//! Byte-stream to frame scanner
//!
//! Turns the raw serial byte stream into validated [`Frame`]s. The scanner
//! is a pure state machine over an internal buffer so it can be driven by
//! any reader and tested without I/O.
//!
//! Synchronization: the adapter emits periodic broadcasts, so scanning for
//! the first checksum-valid frame is enough to find a frame boundary. Any
//! marker or checksum violation afterwards drops the buffer and forces a
//! full re-sync.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::protocol::codec::{checksum, hex, Frame};
use crate::protocol::constants::{FRAME_MARKER, SYNC_MIN_BYTES};

/// Resync state machine over the inbound byte stream.
#[derive(Debug)]
pub struct FrameScanner {
    buf: BytesMut,
    synchronized: bool,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            synchronized: false,
        }
    }

    /// True once a frame boundary has been found.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Feed received bytes, returning every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            if !self.synchronized && !self.try_sync() {
                break;
            }
            match self.next_frame() {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }

    /// Scan for a frame boundary. Returns true once synchronized.
    fn try_sync(&mut self) -> bool {
        while !self.buf.is_empty() && self.buf[0] == 0x00 {
            self.buf.advance(1);
        }

        // A version broadcast plus checksum is 9 bytes; anything shorter
        // cannot be validated yet.
        while self.buf.len() >= SYNC_MIN_BYTES {
            // A length below 2 cannot hold the marker and command bytes it
            // is defined to count.
            let length = self.buf[0] as usize;
            if self.buf[1] != FRAME_MARKER || length < 2 {
                self.buf.advance(1);
            } else if self.buf.len() < length + 2 {
                self.buf.advance(1);
            } else if checksum(&self.buf[..length + 1]) == self.buf[length + 1] {
                debug!(buffer = %hex(&self.buf), "synchronized to frame boundary");
                self.synchronized = true;
                return true;
            } else {
                self.buf.advance(1);
            }
        }
        false
    }

    /// Extract the next complete frame, or None if more bytes are needed.
    /// Marker or checksum violations reset to the unsynchronized state.
    fn next_frame(&mut self) -> Option<Frame> {
        if self.buf.len() < 3 {
            return None;
        }

        if self.buf[1] != FRAME_MARKER {
            warn!(
                "received 0x{:02x} instead of 0xff marker, trigger re-sync",
                self.buf[1]
            );
            self.reset();
            return None;
        }

        let length = self.buf[0] as usize;
        if length < 2 {
            warn!("invalid length field {length}, trigger re-sync");
            self.reset();
            return None;
        }
        if self.buf.len() < length + 2 {
            return None;
        }

        let expected = self.buf[length + 1];
        let computed = checksum(&self.buf[..length + 1]);
        if computed != expected {
            warn!(
                "checksum mismatch, got 0x{computed:02x}, expected 0x{expected:02x}, trigger re-sync"
            );
            self.reset();
            return None;
        }

        let frame = Frame::from_validated(self.buf[..length + 1].to_vec());
        self.buf.advance(length + 2);
        Some(frame)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.synchronized = false;
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
