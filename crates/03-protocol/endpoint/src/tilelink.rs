//! TileLink messages carried inside OmniXtend frames.
//!
//! Each message starts with a big-endian header word. Channels A to D use
//! `chan:3 @60 opcode:3 @57 param:4 @52 size:4 @48 domain:8 @40 err:2 @38
//! source:26 @0`; channel E only carries `chan` and a 26-bit sink. Request
//! addresses follow as one big-endian word, data words follow after that.
//! `PutPartialData` interleaves a byte mask word ahead of every 64 data bytes.

use smallvec::SmallVec;
use thiserror::Error;

/// Largest transfer a single message may carry; it must fit one frame's mask window.
pub const MAX_TRANSFER: usize = 256;

const SOURCE_MASK: u64 = (1 << 26) - 1;

pub mod opcode {
    pub const PUT_FULL_DATA: u8 = 0;
    pub const PUT_PARTIAL_DATA: u8 = 1;
    pub const GET: u8 = 4;
    pub const ACCESS_ACK: u8 = 0;
    pub const ACCESS_ACK_DATA: u8 = 1;
}

const ERR_DENIED: u8 = 0b10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Channel {
    A = 1,
    B = 2,
    C = 3,
    D = 4,
    E = 5,
}

impl Channel {
    pub const ALL: [Channel; 5] = [Channel::A, Channel::B, Channel::C, Channel::D, Channel::E];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw).checked_sub(1)?).copied()
    }

    /// Zero-based position, used to index per-channel tables.
    pub fn index(self) -> usize {
        self as usize - 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlHeader {
    pub chan: Channel,
    pub opcode: u8,
    pub param: u8,
    pub size: u8,
    pub domain: u8,
    pub err: u8,
    pub source: u32,
}

impl TlHeader {
    fn new(chan: Channel, opcode: u8, size: u8, source: u32) -> Self {
        Self {
            chan,
            opcode,
            param: 0,
            size,
            domain: 0,
            err: 0,
            source,
        }
    }

    pub fn encode(&self) -> u64 {
        if self.chan == Channel::E {
            return (u64::from(self.chan as u8) << 60) | (u64::from(self.source) & SOURCE_MASK);
        }
        (u64::from(self.chan as u8 & 0x7) << 60)
            | (u64::from(self.opcode & 0x7) << 57)
            | (u64::from(self.param & 0xF) << 52)
            | (u64::from(self.size & 0xF) << 48)
            | (u64::from(self.domain) << 40)
            | (u64::from(self.err & 0x3) << 38)
            | (u64::from(self.source) & SOURCE_MASK)
    }

    pub fn decode(raw: u64) -> Result<Self, TlError> {
        let chan_raw = (raw >> 60) as u8 & 0x7;
        let chan = Channel::from_raw(chan_raw).ok_or(TlError::Channel(chan_raw))?;
        if chan == Channel::E {
            return Ok(Self::new(chan, 0, 0, (raw & SOURCE_MASK) as u32));
        }
        Ok(Self {
            chan,
            opcode: (raw >> 57) as u8 & 0x7,
            param: (raw >> 52) as u8 & 0xF,
            size: (raw >> 48) as u8 & 0xF,
            domain: (raw >> 40) as u8,
            err: (raw >> 38) as u8 & 0x3,
            source: (raw & SOURCE_MASK) as u32,
        })
    }

    pub fn denied(&self) -> bool {
        self.err & ERR_DENIED != 0
    }

    fn transfer_len(&self) -> usize {
        1usize << self.size
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlError {
    #[error("invalid TileLink channel {0}")]
    Channel(u8),
    #[error("message at word {word} runs past the end of the frame")]
    Truncated { word: usize },
}

/// The TileLink subset the endpoint speaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlMessage {
    Get {
        source: u32,
        address: u64,
        size: u8,
    },
    PutFullData {
        source: u32,
        address: u64,
        data: Vec<u8>,
    },
    /// Writes only the bytes whose bit is set; `mask` holds one word per 64
    /// bytes of `data`, bit `i` covering byte `i` of that group.
    PutPartialData {
        source: u32,
        address: u64,
        data: Vec<u8>,
        mask: Vec<u64>,
    },
    AccessAck {
        source: u32,
        denied: bool,
    },
    AccessAckData {
        source: u32,
        denied: bool,
        data: Vec<u8>,
    },
    /// Any other message; only its header is kept.
    Unsupported { header: TlHeader },
}

fn data_words(len: usize) -> usize {
    len.div_ceil(8).max(1)
}

fn mask_words(len: usize) -> usize {
    len.div_ceil(64).max(1)
}

/// Byte mask selecting the first `valid` bytes of a `len`-byte transfer.
pub fn prefix_mask(valid: usize, len: usize) -> Vec<u64> {
    (0..mask_words(len))
        .map(|group| match valid.saturating_sub(group * 64) {
            0 => 0,
            n if n >= 64 => u64::MAX,
            n => (1 << n) - 1,
        })
        .collect()
}

/// Size exponent of a power-of-two transfer length.
pub fn size_of_len(len: usize) -> u8 {
    len.trailing_zeros() as u8
}

impl TlMessage {
    pub fn channel(&self) -> Channel {
        match self {
            TlMessage::Get { .. }
            | TlMessage::PutFullData { .. }
            | TlMessage::PutPartialData { .. } => Channel::A,
            TlMessage::AccessAck { .. } | TlMessage::AccessAckData { .. } => Channel::D,
            TlMessage::Unsupported { header } => header.chan,
        }
    }

    pub fn source(&self) -> u32 {
        match self {
            TlMessage::Get { source, .. }
            | TlMessage::PutFullData { source, .. }
            | TlMessage::PutPartialData { source, .. }
            | TlMessage::AccessAck { source, .. }
            | TlMessage::AccessAckData { source, .. } => *source,
            TlMessage::Unsupported { header } => header.source,
        }
    }

    /// Encoded length in words, which is also its credit cost.
    pub fn words(&self) -> usize {
        match self {
            TlMessage::Get { .. } => 2,
            TlMessage::PutFullData { data, .. } => 2 + data_words(data.len()),
            TlMessage::PutPartialData { data, .. } => {
                2 + mask_words(data.len()) + data_words(data.len())
            }
            TlMessage::AccessAck { .. } | TlMessage::Unsupported { .. } => 1,
            TlMessage::AccessAckData { data, .. } => 1 + data_words(data.len()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words() * 8);
        match self {
            TlMessage::Get {
                source,
                address,
                size,
            } => {
                let header = TlHeader::new(Channel::A, opcode::GET, *size, *source);
                push_word(&mut out, header.encode());
                push_word(&mut out, *address);
            }
            TlMessage::PutFullData {
                source,
                address,
                data,
            } => {
                let size = size_of_len(data.len());
                let header = TlHeader::new(Channel::A, opcode::PUT_FULL_DATA, size, *source);
                push_word(&mut out, header.encode());
                push_word(&mut out, *address);
                push_data(&mut out, data);
            }
            TlMessage::PutPartialData {
                source,
                address,
                data,
                mask,
            } => {
                let size = size_of_len(data.len());
                let header = TlHeader::new(Channel::A, opcode::PUT_PARTIAL_DATA, size, *source);
                push_word(&mut out, header.encode());
                push_word(&mut out, *address);
                for (group, chunk) in data.chunks(64).enumerate() {
                    push_word(&mut out, mask.get(group).copied().unwrap_or(0));
                    push_data(&mut out, chunk);
                }
            }
            TlMessage::AccessAck { source, denied } => {
                let mut header = TlHeader::new(Channel::D, opcode::ACCESS_ACK, 0, *source);
                if *denied {
                    header.err = ERR_DENIED;
                }
                push_word(&mut out, header.encode());
            }
            TlMessage::AccessAckData {
                source,
                denied,
                data,
            } => {
                let size = size_of_len(data.len());
                let mut header = TlHeader::new(Channel::D, opcode::ACCESS_ACK_DATA, size, *source);
                if *denied {
                    header.err = ERR_DENIED;
                }
                push_word(&mut out, header.encode());
                push_data(&mut out, data);
            }
            TlMessage::Unsupported { header } => push_word(&mut out, header.encode()),
        }
        out
    }

    /// Decodes the message starting at `word` of `payload`, returning it with its length in words.
    pub fn decode(payload: &[u8], word: usize) -> Result<(TlMessage, usize), TlError> {
        let read = |at: usize| -> Result<u64, TlError> {
            let start = at * 8;
            payload
                .get(start..start + 8)
                .map(|bytes| {
                    let mut w = [0u8; 8];
                    w.copy_from_slice(bytes);
                    u64::from_be_bytes(w)
                })
                .ok_or(TlError::Truncated { word })
        };
        let data_at = |from: usize, len: usize| -> Result<Vec<u8>, TlError> {
            let start = from * 8;
            payload
                .get(start..start + data_words(len) * 8)
                .map(|bytes| bytes[..len].to_vec())
                .ok_or(TlError::Truncated { word })
        };

        let header = TlHeader::decode(read(word)?)?;
        let message = match (header.chan, header.opcode) {
            (Channel::A, opcode::GET) => TlMessage::Get {
                source: header.source,
                address: read(word + 1)?,
                size: header.size,
            },
            (Channel::A, opcode::PUT_FULL_DATA) => TlMessage::PutFullData {
                source: header.source,
                address: read(word + 1)?,
                data: data_at(word + 2, header.transfer_len())?,
            },
            (Channel::A, opcode::PUT_PARTIAL_DATA) => {
                let len = header.transfer_len();
                let mut data = Vec::with_capacity(len);
                let mut mask = Vec::with_capacity(mask_words(len));
                let mut at = word + 2;
                for group in 0..mask_words(len) {
                    mask.push(read(at)?);
                    let chunk = (len - group * 64).min(64);
                    data.extend(data_at(at + 1, chunk)?);
                    at += 1 + data_words(chunk);
                }
                TlMessage::PutPartialData {
                    source: header.source,
                    address: read(word + 1)?,
                    data,
                    mask,
                }
            }
            (Channel::D, opcode::ACCESS_ACK) => TlMessage::AccessAck {
                source: header.source,
                denied: header.denied(),
            },
            (Channel::D, opcode::ACCESS_ACK_DATA) => TlMessage::AccessAckData {
                source: header.source,
                denied: header.denied(),
                data: data_at(word + 1, header.transfer_len())?,
            },
            _ => TlMessage::Unsupported { header },
        };
        let words = message.words();
        Ok((message, words))
    }
}

fn push_word(out: &mut Vec<u8>, word: u64) {
    out.extend_from_slice(&word.to_be_bytes());
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
    let padded = data_words(data.len()) * 8;
    out.resize(out.len() + padded - data.len(), 0);
}

/// Decodes every message whose start word is flagged in `mask`.
///
/// Words without a mask bit are data or padding and are skipped.
pub fn decode_messages(payload: &[u8], mask: u64) -> Result<SmallVec<[TlMessage; 4]>, TlError> {
    let words = payload.len() / 8;
    let mut messages = SmallVec::new();
    let mut bits = mask;
    while bits != 0 {
        let word = bits.trailing_zeros() as usize;
        bits &= bits - 1;
        if word >= words {
            return Err(TlError::Truncated { word });
        }
        let (message, _) = TlMessage::decode(payload, word)?;
        messages.push(message);
    }
    Ok(messages)
}
