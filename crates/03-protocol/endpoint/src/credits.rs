//! Per-channel flow-control credits.
//!
//! One credit allows one TileLink word on a channel. `send` holds what the peer
//! granted us; `owed` holds what we still have to grant the peer. Every frame
//! carries at most one grant, encoded as a channel and a power-of-two exponent.

use crate::tilelink::Channel;

/// Largest exponent the 5-bit credit field can carry.
const MAX_GRANT_EXP: u32 = 31;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credits {
    send: [u64; 5],
    owed: [u64; 5],
}

impl Credits {
    pub fn new(initial_send: u64, initial_owed: u64) -> Self {
        Self {
            send: [initial_send; 5],
            owed: [initial_owed; 5],
        }
    }

    pub fn available(&self, chan: Channel) -> u64 {
        self.send[chan.index()]
    }

    pub fn owed(&self, chan: Channel) -> u64 {
        self.owed[chan.index()]
    }

    /// Spends `words` send credits if enough are available.
    pub fn try_consume(&mut self, chan: Channel, words: usize) -> bool {
        let slot = &mut self.send[chan.index()];
        match slot.checked_sub(words as u64) {
            Some(rest) => {
                *slot = rest;
                true
            }
            None => false,
        }
    }

    /// Applies a grant received from the peer.
    pub fn grant_received(&mut self, chan: Channel, exp: u8) {
        let amount = 1u64 << u32::from(exp).min(MAX_GRANT_EXP);
        let slot = &mut self.send[chan.index()];
        *slot = slot.saturating_add(amount);
    }

    /// Records that the peer used `words` of our buffer space, to be returned later.
    pub fn owe(&mut self, chan: Channel, words: usize) {
        let slot = &mut self.owed[chan.index()];
        *slot = slot.saturating_add(words as u64);
    }

    pub fn any_owed(&self) -> bool {
        self.owed.iter().any(|owed| *owed > 0)
    }

    /// Takes the largest power-of-two grant from the channel owed the most.
    ///
    /// Ties go to the earliest channel.
    pub fn take_grant(&mut self) -> Option<(Channel, u8)> {
        let (idx, owed) = self
            .owed
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, owed)| *owed > 0)
            .fold(None, |best: Option<(usize, u64)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            })?;
        let exp = (u64::BITS - 1 - owed.leading_zeros()).min(MAX_GRANT_EXP);
        self.owed[idx] -= 1 << exp;
        Some((Channel::ALL[idx], exp as u8))
    }
}
