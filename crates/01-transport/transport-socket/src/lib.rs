//! Transport-facing flit endpoint.
//!
//! A [`Socket`] speaks the same push/pull flit contract as a simulated
//! endpoint, but its other side is a datagram [`Link`]. Every frame travels as
//! one datagram prefixed with a stream byte, so several logical flit streams can
//! share one transport; pulled flits are tagged with that [`StreamId`].
//!
//! The socket owns no thread. It only moves data inside `push_flit` and
//! `next_flit`, and it reports transport failure by flipping [`Socket::active`]
//! to false for good.

mod error;
mod link;
mod options;

use std::collections::VecDeque;

use log::{debug, trace, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use transport::{chunk_frame, Flit, FlitSink, FlitSource, FrameAssembler, Tagged};

pub use error::{SocketError, SocketResult};
pub use link::{Link, MemoryLink, UdpLink};
pub use options::{SocketOptions, DEFAULT_DATAGRAM_SIZE};

/// Logical stream a frame travelled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub u8);

/// Counters describing socket traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketMetrics {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub send_dropped: u64,
    pub receive_dropped: u64,
    pub malformed: u64,
}

/// Flit endpoint over a datagram link.
pub struct Socket {
    link: Box<dyn Link>,
    options: SocketOptions,
    assembler: FrameAssembler,
    inbound: VecDeque<Flit>,
    inbound_stream: StreamId,
    rng: StdRng,
    active: bool,
    metrics: SocketMetrics,
}

impl Socket {
    /// Builds a UDP socket from the raw option blob.
    pub fn new(options: &[u8]) -> SocketResult<Self> {
        let options = SocketOptions::parse(options)?;
        let bind = options
            .bind
            .ok_or_else(|| SocketError::Options("--bind is required".into()))?;
        let peer = options
            .peer
            .ok_or_else(|| SocketError::Options("--peer is required".into()))?;
        let link = UdpLink::open(bind, peer, options.read_buffer_size)?;
        debug!("socket bound to {bind}, peer {peer}");
        Self::with_link(Box::new(link), options)
    }

    /// Builds a socket over an existing link.
    pub fn with_link(link: Box<dyn Link>, options: SocketOptions) -> SocketResult<Self> {
        options.validate()?;
        Ok(Self {
            link,
            rng: StdRng::seed_from_u64(options.seed),
            options,
            assembler: FrameAssembler::new(),
            inbound: VecDeque::new(),
            inbound_stream: StreamId::default(),
            active: true,
            metrics: SocketMetrics::default(),
        })
    }

    /// Creates two sockets joined by an in-memory link.
    pub fn memory_pair(a: SocketOptions, b: SocketOptions) -> SocketResult<(Socket, Socket)> {
        let (link_a, link_b) = MemoryLink::pair();
        Ok((
            Self::with_link(Box::new(link_a), a)?,
            Self::with_link(Box::new(link_b), b)?,
        ))
    }

    /// False once the link failed or the socket was closed. Never flips back.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Traffic counters.
    pub fn metrics(&self) -> SocketMetrics {
        self.metrics
    }

    /// Stream id stamped on outgoing frames.
    pub fn stream(&self) -> StreamId {
        StreamId(self.options.stream)
    }

    /// Adds one flit to the outgoing frame; sends the frame on `last`.
    pub fn push_flit(&mut self, flit: Flit) {
        if !self.active {
            trace!("dropping flit pushed into inactive socket");
            return;
        }
        let Some(frame) = self.assembler.push(flit) else {
            return;
        };
        if !self.rng.gen_bool(self.options.reliability_send) {
            self.metrics.send_dropped += 1;
            trace!("unreliable send dropped a {} byte frame", frame.len());
            return;
        }
        let mut datagram = Vec::with_capacity(frame.len() + 1);
        datagram.push(self.options.stream);
        datagram.extend_from_slice(&frame);
        match self.link.send(&datagram) {
            Ok(()) => self.metrics.frames_sent += 1,
            Err(err) => self.fail(SocketError::Io(err)),
        }
    }

    /// Returns the next received flit with its stream, or `None` if nothing is ready.
    pub fn next_flit(&mut self) -> Option<(StreamId, Flit)> {
        if !self.active {
            return None;
        }
        if self.inbound.is_empty() && !self.receive_frame() {
            return None;
        }
        self.inbound
            .pop_front()
            .map(|flit| (self.inbound_stream, flit))
    }

    /// Closes the link. The socket stays inactive afterwards.
    pub fn close(&mut self) {
        if self.active {
            debug!("closing socket");
        }
        self.active = false;
        self.inbound.clear();
        self.assembler.reset();
        self.link.close();
    }

    /// Closes the link and releases all buffered flits.
    pub fn destroy(mut self) {
        self.close();
    }

    fn receive_frame(&mut self) -> bool {
        loop {
            let datagram = match self.link.try_recv() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return false,
                Err(err) => {
                    self.fail(SocketError::Io(err));
                    return false;
                }
            };
            let Some((&stream, frame)) = datagram.split_first() else {
                self.metrics.malformed += 1;
                continue;
            };
            if frame.is_empty() {
                self.metrics.malformed += 1;
                continue;
            }
            if !self.rng.gen_bool(self.options.reliability_receive) {
                self.metrics.receive_dropped += 1;
                trace!("unreliable receive dropped a {} byte frame", frame.len());
                continue;
            }
            self.metrics.frames_received += 1;
            self.inbound_stream = StreamId(stream);
            self.inbound.extend(chunk_frame(frame));
            return true;
        }
    }

    fn fail(&mut self, err: SocketError) {
        warn!("socket transport failed: {err}");
        self.close();
    }
}

impl FlitSink for Socket {
    fn push_flit(&mut self, flit: Flit) {
        Socket::push_flit(self, flit);
    }
}

impl FlitSource for Socket {
    type Stream = StreamId;

    fn next_flit(&mut self) -> Option<Tagged<StreamId>> {
        Socket::next_flit(self).map(|(stream, flit)| Tagged { stream, flit })
    }
}
