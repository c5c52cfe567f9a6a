//! Connection management state machine.
//!
//! The host opens with an `OpenConnection` frame and closes with a
//! `CloseConnection` exchange; the peer that did not start the close answers
//! once its own traffic has drained. Compatibility mode has no handshake: the
//! link is active as soon as it is connected and can never be closed.

use thiserror::Error;

use crate::wire::MessageType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Enabled = 1,
    Opened = 2,
    Active = 3,
    ClosedByHost = 4,
    ClosedByHostIndicated = 5,
    ClosedByClient = 6,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connect requested while {0:?}")]
    NotIdle(ConnectionState),
    #[error("close requested while {0:?}")]
    NotActive(ConnectionState),
    #[error("compatibility mode links cannot be closed")]
    CompatMode,
}

impl ConnectionState {
    pub fn from_register(raw: u64) -> Option<Self> {
        use ConnectionState::*;
        [
            Idle,
            Enabled,
            Opened,
            Active,
            ClosedByHost,
            ClosedByHostIndicated,
            ClosedByClient,
        ]
        .get(usize::try_from(raw).ok()?)
        .copied()
    }

    pub fn connect(self, compat: bool) -> Result<Self, ConnectionError> {
        match self {
            ConnectionState::Idle if compat => Ok(ConnectionState::Active),
            ConnectionState::Idle => Ok(ConnectionState::Enabled),
            other => Err(ConnectionError::NotIdle(other)),
        }
    }

    pub fn close(self, compat: bool) -> Result<Self, ConnectionError> {
        match self {
            _ if compat => Err(ConnectionError::CompatMode),
            ConnectionState::Active => Ok(ConnectionState::ClosedByHost),
            other => Err(ConnectionError::NotActive(other)),
        }
    }

    /// Management message the next frame must carry, with the state after it is sent.
    ///
    /// `drained` reports whether nothing remains to be sent or acknowledged.
    pub fn due_on_send(self, drained: bool) -> Option<(MessageType, Self)> {
        match self {
            ConnectionState::Enabled => {
                Some((MessageType::OpenConnection, ConnectionState::Opened))
            }
            ConnectionState::ClosedByHost if drained => Some((
                MessageType::CloseConnection,
                ConnectionState::ClosedByHostIndicated,
            )),
            ConnectionState::ClosedByClient if drained => {
                Some((MessageType::CloseConnection, ConnectionState::Idle))
            }
            _ => None,
        }
    }

    /// State after an in-order frame of type `msg_type` arrives.
    pub fn on_receive(self, msg_type: MessageType, compat: bool) -> Self {
        if compat {
            return self;
        }
        match (self, msg_type) {
            (ConnectionState::Idle, MessageType::OpenConnection) => ConnectionState::Active,
            (ConnectionState::Idle, _) => ConnectionState::Idle,
            (ConnectionState::ClosedByHostIndicated, MessageType::CloseConnection) => {
                ConnectionState::Idle
            }
            (_, MessageType::CloseConnection) => ConnectionState::ClosedByClient,
            (ConnectionState::Opened, _) => ConnectionState::Active,
            (state, _) => state,
        }
    }

    /// Whether frames may carry TileLink messages in this state.
    pub fn carries_messages(self) -> bool {
        matches!(
            self,
            ConnectionState::Active | ConnectionState::ClosedByHost | ConnectionState::ClosedByClient
        )
    }

    /// Whether queued requests may still be issued.
    pub fn issues_requests(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::ClosedByHost)
    }

    pub fn is_closing(self) -> bool {
        matches!(
            self,
            ConnectionState::ClosedByHost
                | ConnectionState::ClosedByHostIndicated
                | ConnectionState::ClosedByClient
        )
    }
}
