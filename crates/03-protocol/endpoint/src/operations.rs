//! Requester-side bookkeeping for memory operations sent to the peer.
//!
//! Requests wait in submission order until a TileLink source id is free, then
//! stay in flight until the matching channel D response arrives. Source ids are
//! handed out lowest first so a run is a pure function of its inputs.

use std::collections::{BTreeMap, VecDeque};

use log::warn;
use thiserror::Error;

use crate::tilelink::{prefix_mask, size_of_len, TlMessage, MAX_TRANSFER};

/// Source ids available for outstanding requests.
pub const MAX_IN_FLIGHT: u32 = 255;

/// Identifies one submitted request and its completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Read64 { address: u64 },
    Write64 { address: u64, data: u64 },
    Read { address: u64, len: usize },
    Write { address: u64, data: Vec<u8> },
    /// Writes `data` as-is; the transfer is padded to a power of two and the
    /// padding is masked off.
    WritePartial { address: u64, data: Vec<u8> },
}

impl Request {
    /// Bytes moved by the request.
    pub fn transfer_len(&self) -> usize {
        match self {
            Request::Read64 { .. } | Request::Write64 { .. } => 8,
            Request::Read { len, .. } => *len,
            Request::Write { data, .. } | Request::WritePartial { data, .. } => data.len(),
        }
    }

    /// True when a single message can carry the request.
    pub fn is_valid(&self) -> bool {
        match self {
            Request::WritePartial { data, .. } => is_valid_partial_len(data.len()),
            other => is_valid_transfer_len(other.transfer_len()),
        }
    }

    fn message(&self, source: u32) -> TlMessage {
        match self {
            Request::Read64 { address } => TlMessage::Get {
                source,
                address: *address,
                size: 3,
            },
            Request::Write64 { address, data } => TlMessage::PutFullData {
                source,
                address: *address,
                data: data.to_le_bytes().to_vec(),
            },
            Request::Read { address, len } => TlMessage::Get {
                source,
                address: *address,
                size: size_of_len(*len),
            },
            Request::Write { address, data } => TlMessage::PutFullData {
                source,
                address: *address,
                data: data.clone(),
            },
            Request::WritePartial { address, data } => {
                let len = data.len().next_power_of_two().max(8);
                let mut padded = data.clone();
                padded.resize(len, 0);
                TlMessage::PutPartialData {
                    source,
                    address: *address,
                    data: padded,
                    mask: prefix_mask(data.len(), len),
                }
            }
        }
    }
}

/// True for power-of-two lengths a single message can carry.
pub fn is_valid_transfer_len(len: usize) -> bool {
    len.is_power_of_two() && (8..=MAX_TRANSFER).contains(&len)
}

/// True for partial write lengths, which need not be powers of two.
pub fn is_valid_partial_len(len: usize) -> bool {
    (1..=MAX_TRANSFER).contains(&len)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Data64(u64),
    Data(Vec<u8>),
    Written,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("the peer denied the access")]
    Denied,
    #[error("the connection closed before the operation completed")]
    ConnectionClosed,
    #[error("the peer answered with a mismatched response")]
    UnexpectedResponse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub ticket: Ticket,
    pub outcome: Result<Response, OperationError>,
}

#[derive(Debug, Default)]
pub struct Operations {
    waiting: VecDeque<(Ticket, Request)>,
    in_flight: BTreeMap<u32, (Ticket, Request)>,
}

impl Operations {
    pub fn submit(&mut self, ticket: Ticket, request: Request) {
        self.waiting.push_back((ticket, request));
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.in_flight.is_empty()
    }

    fn free_source(&self) -> Option<u32> {
        (1..=MAX_IN_FLIGHT).find(|source| !self.in_flight.contains_key(source))
    }

    /// Encodes the oldest waiting request if a source id is free and `admit`
    /// accepts the message. The request then counts as in flight.
    pub fn next_message(&mut self, admit: impl FnOnce(&TlMessage) -> bool) -> Option<TlMessage> {
        let source = self.free_source()?;
        let (_, request) = self.waiting.front()?;
        let message = request.message(source);
        if !admit(&message) {
            return None;
        }
        let entry = self.waiting.pop_front()?;
        self.in_flight.insert(source, entry);
        Some(message)
    }

    /// Matches a channel D response to its request.
    ///
    /// Returns `None` for responses nobody is waiting on.
    pub fn complete(&mut self, response: &TlMessage) -> Option<Completion> {
        let Some((ticket, request)) = self.in_flight.remove(&response.source()) else {
            warn!(
                "dropping response for unknown source {}",
                response.source()
            );
            return None;
        };
        let outcome = match (response, &request) {
            (TlMessage::AccessAck { denied: true, .. }, _)
            | (TlMessage::AccessAckData { denied: true, .. }, _) => Err(OperationError::Denied),
            (
                TlMessage::AccessAck { .. },
                Request::Write64 { .. } | Request::Write { .. } | Request::WritePartial { .. },
            ) => Ok(Response::Written),
            (TlMessage::AccessAckData { data, .. }, Request::Read64 { .. }) => {
                let mut word = [0u8; 8];
                match data.get(..8) {
                    Some(bytes) => {
                        word.copy_from_slice(bytes);
                        Ok(Response::Data64(u64::from_le_bytes(word)))
                    }
                    None => Err(OperationError::UnexpectedResponse),
                }
            }
            (TlMessage::AccessAckData { data, .. }, Request::Read { len, .. })
                if data.len() == *len =>
            {
                Ok(Response::Data(data.clone()))
            }
            _ => Err(OperationError::UnexpectedResponse),
        };
        Some(Completion { ticket, outcome })
    }

    /// Fails every waiting and in-flight request, oldest ticket first.
    pub fn fail_all(&mut self, error: OperationError) -> Vec<Completion> {
        let mut tickets: Vec<Ticket> = self
            .in_flight
            .values()
            .map(|(ticket, _)| *ticket)
            .chain(self.waiting.iter().map(|(ticket, _)| *ticket))
            .collect();
        tickets.sort();
        self.in_flight.clear();
        self.waiting.clear();
        tickets
            .into_iter()
            .map(|ticket| Completion {
                ticket,
                outcome: Err(error),
            })
            .collect()
    }
}
