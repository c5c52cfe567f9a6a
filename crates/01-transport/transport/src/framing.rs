//! Conversion between byte frames and flit sequences.
//!
//! Frames leave an endpoint as little-endian 8-byte flits. Every flit but the
//! last carries all eight lanes; the last one carries `len % 8` lanes (or all
//! eight when the frame length is a multiple of eight) and is zero padded.

use crate::flit::{Flit, FULL_LANES};

/// Lane mask of the final flit for a frame of `len` bytes.
pub fn tail_mask(len: usize) -> u8 {
    match len % 8 {
        0 => FULL_LANES,
        rem => (1u8 << rem) - 1,
    }
}

/// Splits `frame` into flits. An empty frame produces no flits.
pub fn chunk_frame(frame: &[u8]) -> impl Iterator<Item = Flit> + '_ {
    let count = frame.len().div_ceil(8);
    let mask = tail_mask(frame.len());
    frame.chunks(8).enumerate().map(move |(idx, chunk)| {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        let last = idx + 1 == count;
        Flit::new(
            u64::from_le_bytes(word),
            last,
            if last { mask } else { FULL_LANES },
        )
    })
}

/// Accumulates flits until a `last` flit completes a frame.
#[derive(Default, Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    flits: usize,
}

impl FrameAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the valid lanes of `flit`; returns the frame when `flit.last` is set.
    pub fn push(&mut self, flit: Flit) -> Option<Vec<u8>> {
        flit.extend_bytes(&mut self.buf);
        self.flits += 1;
        if flit.last {
            self.flits = 0;
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Bytes gathered for the frame in progress.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Flits gathered for the frame in progress.
    pub fn pending_flits(&self) -> usize {
        self.flits
    }

    /// Drops a partially assembled frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.flits = 0;
    }
}
