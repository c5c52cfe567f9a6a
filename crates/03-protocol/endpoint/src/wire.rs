//! Ethernet and OmniXtend framing.
//!
//! ```text
//! | dst mac (6) | src mac (6) | ethertype 0xAAAA (2) | ox header (8) |
//! | TileLink words ... | zero padding | message-start mask (8) |
//! ```
//! All multi-byte fields are big-endian. Frames are padded so that the total
//! length, mask included, is at least [`MIN_FRAME_LEN`].

use std::fmt;

use thiserror::Error;

use crate::sequence::SeqNum;

pub const ETHERTYPE_OMNIXTEND: u16 = 0xAAAA;
pub const ETH_HEADER_LEN: usize = 14;
pub const FRAME_HEADER_LEN: usize = ETH_HEADER_LEN + 8;
pub const MASK_LEN: usize = 8;
pub const MIN_FRAME_LEN: usize = 70;
pub const MAX_FRAME_LEN: usize = 9000;
/// The message-start mask has one bit per TileLink word.
pub const MAX_FRAME_WORDS: usize = 64;

/// 48-bit Ethernet address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    /// Locally administered address `02:00:00:00:00:<id>` of a simulated endpoint.
    pub const fn for_endpoint(id: u8) -> Self {
        MacAddr([0x02, 0, 0, 0, 0, id])
    }

    /// True when a frame sent to `self` is meant for `local`.
    pub fn reaches(self, local: MacAddr) -> bool {
        self == local || self == MacAddr::BROADCAST
    }

    pub(crate) fn read(bytes: &[u8]) -> Option<Self> {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(bytes.get(..6)?);
        Some(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Normal = 0,
    AckOnly = 1,
    OpenConnection = 2,
    CloseConnection = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, FrameError> {
        Ok(match raw {
            0 => MessageType::Normal,
            1 => MessageType::AckOnly,
            2 => MessageType::OpenConnection,
            3 => MessageType::CloseConnection,
            other => return Err(FrameError::MessageType(other)),
        })
    }
}

/// The 64-bit OmniXtend header.
///
/// Layout from the most significant bit: `vc:3 msg_type:4 res:3 seq:22
/// seq_ack:22 ack:1 res:1 chan:3 credit:5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OxHeader {
    pub vc: u8,
    pub msg_type: MessageType,
    pub seq: SeqNum,
    pub seq_ack: SeqNum,
    pub ack: bool,
    pub chan: u8,
    pub credit: u8,
}

impl OxHeader {
    pub fn encode(&self) -> u64 {
        (u64::from(self.vc & 0x7) << 61)
            | (u64::from(self.msg_type as u8 & 0xF) << 57)
            | (u64::from(self.seq.get()) << 32)
            | (u64::from(self.seq_ack.get()) << 10)
            | (u64::from(self.ack) << 9)
            | (u64::from(self.chan & 0x7) << 5)
            | u64::from(self.credit & 0x1F)
    }

    pub fn decode(raw: u64) -> Result<Self, FrameError> {
        Ok(Self {
            vc: (raw >> 61) as u8 & 0x7,
            msg_type: MessageType::try_from((raw >> 57) as u8 & 0xF)?,
            seq: SeqNum::new((raw >> 32) as u32),
            seq_ack: SeqNum::new((raw >> 10) as u32),
            ack: (raw >> 9) & 1 == 1,
            chan: (raw >> 5) as u8 & 0x7,
            credit: raw as u8 & 0x1F,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than headers plus mask")]
    Runt(usize),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversized(usize),
    #[error("unexpected ethertype {0:#06x}")]
    EtherType(u16),
    #[error("unknown OmniXtend message type {0}")]
    MessageType(u8),
    #[error("payload of {0} bytes is not word aligned")]
    Misaligned(usize),
}

/// Borrowed view of a received frame.
#[derive(Debug)]
pub struct Frame<'a> {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub header: OxHeader,
    /// TileLink words plus padding, mask excluded.
    pub payload: &'a [u8],
    pub mask: u64,
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(word)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    let len = bytes.len();
    if len < FRAME_HEADER_LEN + MASK_LEN {
        return Err(FrameError::Runt(len));
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len));
    }
    let ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
    if ethertype != ETHERTYPE_OMNIXTEND {
        return Err(FrameError::EtherType(ethertype));
    }
    let payload = &bytes[FRAME_HEADER_LEN..len - MASK_LEN];
    if payload.len() % 8 != 0 {
        return Err(FrameError::Misaligned(payload.len()));
    }
    Ok(Frame {
        dst: MacAddr::read(bytes).unwrap_or_default(),
        src: MacAddr::read(&bytes[6..]).unwrap_or_default(),
        header: OxHeader::decode(u64_at(bytes, ETH_HEADER_LEN))?,
        payload,
        mask: u64_at(bytes, len - MASK_LEN),
    })
}

/// Builds a frame from already encoded TileLink messages.
///
/// Every message must be a whole number of words and the total must fit the
/// mask window; callers size their batches with [`MAX_FRAME_WORDS`].
pub fn encode_frame(
    dst: MacAddr,
    src: MacAddr,
    header: &OxHeader,
    messages: &[Vec<u8>],
) -> Vec<u8> {
    let payload_len: usize = messages.iter().map(Vec::len).sum();
    let mut frame =
        Vec::with_capacity((FRAME_HEADER_LEN + payload_len + MASK_LEN).max(MIN_FRAME_LEN));
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ETHERTYPE_OMNIXTEND.to_be_bytes());
    frame.extend_from_slice(&header.encode().to_be_bytes());

    let mut mask = 0u64;
    let mut word = 0usize;
    for message in messages {
        debug_assert_eq!(message.len() % 8, 0);
        debug_assert!(word < MAX_FRAME_WORDS);
        mask |= 1 << word;
        word += message.len() / 8;
        frame.extend_from_slice(message);
    }
    let padded = MIN_FRAME_LEN.saturating_sub(MASK_LEN);
    if frame.len() < padded {
        frame.resize(padded, 0);
    }
    frame.extend_from_slice(&mask.to_be_bytes());
    frame
}

/// Rewrites the acknowledgement fields of an encoded frame in place.
pub fn rewrite_ack(frame: &mut [u8], seq_ack: SeqNum, ack: bool) -> Result<(), FrameError> {
    let mut header = decode_frame(frame)?.header;
    header.seq_ack = seq_ack;
    header.ack = ack;
    frame[ETH_HEADER_LEN..FRAME_HEADER_LEN].copy_from_slice(&header.encode().to_be_bytes());
    Ok(())
}
