//! Simulated OmniXtend link endpoint.
//!
//! * [`Endpoint`] – caller handle: flit I/O, operations, thread control.
//! * [`EndpointCore`] – the tick engine the handle or its worker drives.
//! * [`wire`] / [`tilelink`] – Ethernet framing and the TileLink subset.
//! * [`registers`] – debug register file, change events and printing.

mod config;
mod connection;
mod credits;
mod engine;
mod error;
mod handle;
mod memory;
mod operations;
pub mod registers;
mod sequence;
pub mod tilelink;
pub mod wire;

pub use config::{EndpointConfig, DEFAULT_SEND_CREDITS};
pub use connection::{ConnectionError, ConnectionState};
pub use credits::Credits;
pub use engine::EndpointCore;
pub use error::{EndpointError, EndpointResult};
pub use handle::{Endpoint, ThreadState};
pub use memory::SparseMemory;
pub use operations::{
    is_valid_partial_len, is_valid_transfer_len, Completion, OperationError, Request, Response,
    Ticket, MAX_IN_FLIGHT,
};
pub use registers::{
    format_register, print_register, Register, RegisterEvent, RegisterName, RegisterNameError,
    RegisterSnapshot,
};
pub use sequence::SeqNum;
pub use wire::MacAddr;
