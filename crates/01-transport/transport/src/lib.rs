//! Flit transport primitives shared by the simulated endpoint and the socket.
//!
//! * [`Flit`] – the 64-bit link unit with its last marker and byte-lane mask.
//! * [`flit_ring`] – bounded lock-free single-producer/single-consumer queue.
//! * [`FrameAssembler`] / [`chunk_frame`] – lane-mask framing between flits and bytes.
//! * [`FlitSink`] / [`FlitSource`] / [`relay`] – the push/pull contract both sides expose.
//! * [`TransportError`] – construction failures.

mod channel;
mod error;
mod flit;
mod flit_ring;
mod framing;

pub use channel::{relay, FlitSink, FlitSource};
pub use error::{TransportError, TransportResult};
pub use flit::{Flit, Tagged, FULL_LANES};
pub use flit_ring::{
    flit_ring, FlitConsumer, FlitProducer, FlitPush, MAX_RING_CAPACITY, MIN_RING_CAPACITY,
};
pub use framing::{chunk_frame, tail_mask, FrameAssembler};
