//! Datagram links a [`crate::Socket`] can run over.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// A non-blocking, message-oriented transport.
pub trait Link: Send {
    /// Sends one datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Returns the next datagram, `Ok(None)` when nothing is waiting. A datagram
    /// that could not be read whole comes back empty.
    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Releases the underlying transport. Further calls fail.
    fn close(&mut self);
}

/// UDP link between two fixed addresses.
pub struct UdpLink {
    socket: Option<UdpSocket>,
    buf: Vec<u8>,
}

impl UdpLink {
    /// Binds `bind`, connects to `peer` and switches to non-blocking mode.
    pub fn open(bind: SocketAddr, peer: SocketAddr, max_datagram: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: Some(socket),
            buf: vec![0; max_datagram + 1],
        })
    }

    /// Address the link is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "udp link closed"))
    }
}

/// A peer that is not listening yet shows up as ICMP refusals; that is not fatal.
fn transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted
    )
}

impl Link for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        match self.socket()?.send(datagram) {
            Ok(_) => Ok(()),
            Err(err) if transient(&err) => {
                log::debug!("udp send dropped: {err}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "udp link closed"))?;
        match socket.recv(&mut self.buf) {
            Ok(len) if len == self.buf.len() => {
                log::warn!("udp datagram exceeds {} bytes, discarding it", len - 1);
                Ok(Some(Vec::new()))
            }
            Ok(len) => Ok(Some(self.buf[..len].to_vec())),
            Err(err) if transient(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

/// In-process link backed by a pair of channels.
///
/// Dropping or closing one end makes the other end fail once its queued
/// datagrams are drained.
pub struct MemoryLink {
    ends: Option<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>,
}

impl MemoryLink {
    /// Creates two connected ends.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (
            MemoryLink {
                ends: Some((a_tx, a_rx)),
            },
            MemoryLink {
                ends: Some((b_tx, b_rx)),
            },
        )
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "memory link closed")
    }
}

impl Link for MemoryLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let (tx, _) = self.ends.as_ref().ok_or_else(Self::closed)?;
        tx.send(datagram.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory link peer gone"))
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let (_, rx) = self.ends.as_ref().ok_or_else(Self::closed)?;
        match rx.try_recv() {
            Ok(datagram) => Ok(Some(datagram)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "memory link peer gone",
            )),
        }
    }

    fn close(&mut self) {
        self.ends = None;
    }
}
