//! 22-bit modular sequence numbers.

use std::fmt;

const BITS: u32 = 22;
const MODULUS: u32 = 1 << BITS;
const HALF: u32 = MODULUS / 2;

/// Frame sequence number carried in the OmniXtend header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u32);

impl SeqNum {
    /// Largest representable value; used as "nothing received yet".
    pub const MAX: SeqNum = SeqNum(MODULUS - 1);

    /// Wraps `raw` into the sequence space.
    pub const fn new(raw: u32) -> Self {
        Self(raw & (MODULUS - 1))
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// The following sequence number.
    pub const fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    pub fn incr(&mut self) {
        *self = self.next();
    }

    /// True when `self` is `other` or lies less than half the space after it.
    pub fn is_at_or_after(self, other: SeqNum) -> bool {
        self.0.wrapping_sub(other.0) & (MODULUS - 1) < HALF
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
