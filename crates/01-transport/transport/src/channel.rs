//! Push/pull contract shared by endpoints and sockets.
//!
//! An endpoint is a plain channel (`Stream = ()`); a socket multiplexes several
//! logical streams over one transport and tags every flit it yields. [`relay`]
//! moves flits between any source and sink, which is how a simulated endpoint is
//! wired to a real transport.

use crate::flit::{Flit, Tagged};

/// Something flits can be pushed into without blocking.
pub trait FlitSink {
    /// Accepts one flit. Never fails from the caller's point of view.
    fn push_flit(&mut self, flit: Flit);
}

/// Something flits can be pulled from without blocking.
pub trait FlitSource {
    /// Stream identifier attached to every yielded flit.
    type Stream: Copy;

    /// Returns the next flit, or `None` when nothing is available right now.
    fn next_flit(&mut self) -> Option<Tagged<Self::Stream>>;
}

/// Moves up to `budget` flits from `source` into `sink`, returning how many moved.
pub fn relay<S, K>(source: &mut S, sink: &mut K, budget: usize) -> usize
where
    S: FlitSource + ?Sized,
    K: FlitSink + ?Sized,
{
    let mut moved = 0;
    while moved < budget {
        match source.next_flit() {
            Some(tagged) => {
                sink.push_flit(tagged.flit);
                moved += 1;
            }
            None => break,
        }
    }
    moved
}

impl FlitSink for Vec<Flit> {
    fn push_flit(&mut self, flit: Flit) {
        self.push(flit);
    }
}

impl FlitSource for std::collections::VecDeque<Flit> {
    type Stream = ();

    fn next_flit(&mut self) -> Option<Tagged<()>> {
        self.pop_front().map(|flit| Tagged { stream: (), flit })
    }
}
