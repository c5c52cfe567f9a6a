//! The flit record moved through every queue in the workspace.

/// Lane mask with every byte of the payload valid.
pub const FULL_LANES: u8 = 0xFF;

/// Fixed-width link unit: a 64-bit payload, a final-flit marker and a byte-lane mask.
///
/// Bit `i` of `lane_mask` marks byte `i` of `value.to_le_bytes()` as valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Flit {
    /// Payload bits.
    pub value: u64,
    /// Marks the final flit of a frame.
    pub last: bool,
    /// Valid byte lanes, least significant lane first.
    pub lane_mask: u8,
}

impl Flit {
    /// Creates a flit from its three fields.
    pub const fn new(value: u64, last: bool, lane_mask: u8) -> Self {
        Self {
            value,
            last,
            lane_mask,
        }
    }

    /// Number of valid byte lanes.
    pub fn valid_lanes(&self) -> u32 {
        self.lane_mask.count_ones()
    }

    /// Appends the valid lanes of this flit to `out`, lowest lane first.
    pub fn extend_bytes(&self, out: &mut Vec<u8>) {
        let bytes = self.value.to_le_bytes();
        if self.lane_mask == FULL_LANES {
            out.extend_from_slice(&bytes);
            return;
        }
        for (lane, byte) in bytes.iter().enumerate() {
            if self.lane_mask & (1 << lane) != 0 {
                out.push(*byte);
            }
        }
    }

    /// Packs `last` and `lane_mask` into the slot metadata word.
    pub(crate) fn meta(&self) -> u16 {
        (u16::from(self.last) << 8) | u16::from(self.lane_mask)
    }

    pub(crate) fn from_parts(value: u64, meta: u16) -> Self {
        Self {
            value,
            last: meta & 0x100 != 0,
            lane_mask: meta as u8,
        }
    }
}

/// A flit tagged with the logical stream it travelled on.
///
/// Plain channels use `()` as the stream; multiplexed transports carry an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tagged<S> {
    /// Logical stream the flit belongs to.
    pub stream: S,
    /// The flit itself.
    pub flit: Flit,
}
