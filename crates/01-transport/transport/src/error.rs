//! Error surface of the flit transport crate.
//!
//! Only construction can fail: queue operations report fullness and emptiness
//! through their return values instead.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by transport constructors.
pub enum TransportError {
    /// Requested ring capacity lies outside the supported range.
    InvalidCapacity {
        requested: usize,
        minimum: usize,
        maximum: usize,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidCapacity {
                requested,
                minimum,
                maximum,
            } => {
                write!(
                    f,
                    "flit ring capacity {requested} must be between {minimum} and {maximum}"
                )
            }
        }
    }
}

impl std::error::Error for TransportError {}
