//! Caller-facing endpoint handle.
//!
//! The handle keeps the caller's ends of every queue. The [`EndpointCore`]
//! itself lives in exactly one place at a time:
//!
//! ```text
//! Idle(core) --start_thread--> Running --can_destroy_thread--> Stopped
//!     ^                                                           |
//!     +--------------------- destroy_thread ---------------------+
//! ```
//! Manual ticks need the core in the handle, so they are refused while a
//! worker owns it.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{info, warn};
use runtime_native::{ExecutionThread, RunState, StoppedThread};
use smallvec::SmallVec;
use transport::{
    flit_ring, Flit, FlitConsumer, FlitProducer, FlitPush, FlitSink, FlitSource, Tagged,
};

use crate::config::EndpointConfig;
use crate::connection::ConnectionState;
use crate::engine::{Command, CoreChannels, EndpointCore};
use crate::error::{EndpointError, EndpointResult};
use crate::operations::{Completion, Request, Ticket};
use crate::registers::{Register, RegisterEvent, RegisterSnapshot};

enum ThreadSlot {
    Idle(Box<EndpointCore>),
    Running(ExecutionThread<EndpointCore>),
    Stopped(StoppedThread<EndpointCore>),
    /// The worker panicked; the core is gone.
    Lost,
}

/// Observable execution-thread state of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
    Lost,
}

/// A simulated OmniXtend endpoint.
pub struct Endpoint {
    config: EndpointConfig,
    ingress: FlitProducer,
    backlog: VecDeque<Flit>,
    egress: FlitConsumer,
    commands: Sender<Command>,
    completions: Receiver<Completion>,
    events: Receiver<RegisterEvent>,
    registers: Arc<ArcSwap<RegisterSnapshot>>,
    next_ticket: u64,
    slot: ThreadSlot,
}

impl Endpoint {
    /// Endpoint with the default configuration for `id`.
    pub fn new(id: u8, compat_mode: bool) -> EndpointResult<Self> {
        Self::with_config(EndpointConfig::new(id, compat_mode))
    }

    /// Validates `config` and builds the endpoint with its core parked in the handle.
    pub fn with_config(config: EndpointConfig) -> EndpointResult<Self> {
        config.validate()?;
        let (ingress, core_ingress) = flit_ring(config.ingress_capacity)?;
        let (core_egress, egress) = flit_ring(config.egress_capacity)?;
        let (commands, command_rx) = unbounded();
        let (completion_tx, completions) = unbounded();
        let (event_tx, events) = bounded(config.event_capacity);
        let registers = Arc::new(ArcSwap::from_pointee(RegisterSnapshot::default()));
        let core = EndpointCore::new(
            config.clone(),
            CoreChannels {
                ingress: core_ingress,
                egress: core_egress,
                commands: command_rx,
                completions: completion_tx,
                events: event_tx,
                snapshot: Arc::clone(&registers),
            },
        );
        info!(
            "endpoint {} created (compat: {}, mac {})",
            config.id, config.compat_mode, config.local_mac
        );
        Ok(Self {
            config,
            ingress,
            backlog: VecDeque::new(),
            egress,
            commands,
            completions,
            events,
            registers,
            next_ticket: 0,
            slot: ThreadSlot::Idle(Box::new(core)),
        })
    }

    /// Configuration the endpoint was built with.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Queues a flit for the core. Never fails: when the ring is full the flit
    /// waits in a local backlog that drains ahead of later flits.
    pub fn push_flit(&mut self, flit: Flit) {
        self.drain_backlog();
        if !self.backlog.is_empty() || self.ingress.push(flit) == FlitPush::WouldBlock {
            self.backlog.push_back(flit);
        }
    }

    /// Next egress flit, if any.
    pub fn next_flit(&mut self) -> Option<Flit> {
        self.drain_backlog();
        self.egress.pop()
    }

    /// Flits parked because the ingress ring was full.
    pub fn backlogged(&self) -> usize {
        self.backlog.len()
    }

    fn drain_backlog(&mut self) {
        while let Some(flit) = self.backlog.front().copied() {
            if self.ingress.push(flit) == FlitPush::WouldBlock {
                break;
            }
            self.backlog.pop_front();
        }
    }

    /// Runs one tick on the calling thread.
    pub fn tick(&mut self) -> EndpointResult<usize> {
        self.drain_backlog();
        let moved = match &mut self.slot {
            ThreadSlot::Idle(core) => core.tick(),
            ThreadSlot::Running(_) => return Err(EndpointError::ThreadRunning),
            ThreadSlot::Stopped(_) => return Err(EndpointError::ThreadNotRejoined),
            ThreadSlot::Lost => return Err(EndpointError::ThreadPanicked),
        };
        self.drain_backlog();
        Ok(moved)
    }

    fn send(&self, command: Command) -> EndpointResult<()> {
        self.commands
            .send(command)
            .map_err(|_| EndpointError::ThreadPanicked)
    }

    /// Starts the connection handshake on the next tick.
    pub fn connect(&mut self) -> EndpointResult<()> {
        self.send(Command::Connect)
    }

    /// Starts an orderly close on the next tick.
    pub fn close(&mut self) -> EndpointResult<()> {
        if self.config.compat_mode {
            return Err(EndpointError::CompatMode);
        }
        self.send(Command::Close)
    }

    /// Queues `request` for the next tick and returns its ticket.
    pub fn submit(&mut self, request: Request) -> EndpointResult<Ticket> {
        if !request.is_valid() {
            let len = request.transfer_len();
            return Err(match request {
                Request::WritePartial { .. } => EndpointError::InvalidPartialLength(len),
                _ => EndpointError::InvalidLength(len),
            });
        }
        let ticket = Ticket(self.next_ticket);
        self.send(Command::Submit { ticket, request })?;
        self.next_ticket += 1;
        Ok(ticket)
    }

    /// Reads one little-endian word from the peer.
    pub fn read_64(&mut self, address: u64) -> EndpointResult<Ticket> {
        self.submit(Request::Read64 { address })
    }

    /// Writes one little-endian word to the peer.
    pub fn write_64(&mut self, address: u64, data: u64) -> EndpointResult<Ticket> {
        self.submit(Request::Write64 { address, data })
    }

    /// Reads `len` bytes; `len` must be a power of two from 8 to 256.
    pub fn read(&mut self, address: u64, len: usize) -> EndpointResult<Ticket> {
        self.submit(Request::Read { address, len })
    }

    /// Writes a power-of-two block of 8 to 256 bytes.
    pub fn write(&mut self, address: u64, data: &[u8]) -> EndpointResult<Ticket> {
        self.submit(Request::Write {
            address,
            data: data.to_vec(),
        })
    }

    /// Writes 1 to 256 bytes of any length, leaving the rest of the block untouched.
    pub fn write_partial(&mut self, address: u64, data: &[u8]) -> EndpointResult<Ticket> {
        self.submit(Request::WritePartial {
            address,
            data: data.to_vec(),
        })
    }

    /// Oldest finished operation, if any.
    pub fn poll_completion(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Up to `max` pending register events, oldest first.
    pub fn drain_events(&self, max: usize) -> SmallVec<[RegisterEvent; 8]> {
        self.events.try_iter().take(max).collect()
    }

    /// Register file as of the last completed tick.
    pub fn registers(&self) -> Arc<RegisterSnapshot> {
        self.registers.load_full()
    }

    /// Connection state as of the last completed tick.
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_register(self.registers().get(Register::ConnectionState))
            .unwrap_or(ConnectionState::Idle)
    }

    /// Moves the core onto a background worker. A no-op when already running.
    pub fn start_thread(&mut self) -> EndpointResult<()> {
        let slot = std::mem::replace(&mut self.slot, ThreadSlot::Lost);
        let core = match slot {
            ThreadSlot::Idle(core) => core,
            ThreadSlot::Running(worker) => {
                self.slot = ThreadSlot::Running(worker);
                return Ok(());
            }
            ThreadSlot::Stopped(stopped) => Box::new(self.rejoin(stopped)?),
            ThreadSlot::Lost => return Err(EndpointError::ThreadPanicked),
        };
        let cadence = self.config.tick_cadence;
        self.slot = ThreadSlot::Running(ExecutionThread::start(*core, cadence)?);
        Ok(())
    }

    /// Asks the worker to stop at its next tick boundary. Returns immediately.
    pub fn stop_thread(&self) {
        if let ThreadSlot::Running(worker) = &self.slot {
            worker.stop();
        }
    }

    /// Where the core currently lives.
    pub fn thread_state(&self) -> ThreadState {
        match &self.slot {
            ThreadSlot::Idle(_) => ThreadState::NotStarted,
            ThreadSlot::Running(worker) => match worker.state() {
                RunState::Running => ThreadState::Running,
                RunState::StopRequested => ThreadState::StopRequested,
                RunState::Stopped => ThreadState::Stopped,
            },
            ThreadSlot::Stopped(_) => ThreadState::Stopped,
            ThreadSlot::Lost => ThreadState::Lost,
        }
    }

    /// Non-blocking poll; true once no worker can touch the core any more.
    pub fn can_destroy_thread(&mut self) -> bool {
        let slot = std::mem::replace(&mut self.slot, ThreadSlot::Lost);
        self.slot = match slot {
            ThreadSlot::Running(worker) => match worker.try_stopped() {
                Ok(stopped) => ThreadSlot::Stopped(stopped),
                Err(worker) => ThreadSlot::Running(worker),
            },
            other => other,
        };
        !matches!(self.slot, ThreadSlot::Running(_))
    }

    /// Reclaims the core from a worker observed stopped by
    /// [`Endpoint::can_destroy_thread`]. A no-op when no worker was started.
    pub fn destroy_thread(&mut self) -> EndpointResult<()> {
        let slot = std::mem::replace(&mut self.slot, ThreadSlot::Lost);
        match slot {
            ThreadSlot::Stopped(stopped) => {
                let core = self.rejoin(stopped)?;
                self.slot = ThreadSlot::Idle(Box::new(core));
                Ok(())
            }
            ThreadSlot::Running(worker) => {
                self.slot = ThreadSlot::Running(worker);
                Err(EndpointError::ThreadNotStopped)
            }
            ThreadSlot::Idle(core) => {
                self.slot = ThreadSlot::Idle(core);
                Ok(())
            }
            ThreadSlot::Lost => Err(EndpointError::ThreadPanicked),
        }
    }

    fn rejoin(&mut self, stopped: StoppedThread<EndpointCore>) -> EndpointResult<EndpointCore> {
        let ticks = stopped.ticks();
        match stopped.join() {
            Ok(core) => {
                info!("endpoint {}: worker ran {ticks} ticks", self.config.id);
                Ok(core)
            }
            Err(err) => {
                warn!("endpoint {}: {err}", self.config.id);
                Err(EndpointError::ThreadPanicked)
            }
        }
    }

    /// Releases the endpoint. Refused, handing the endpoint back, while a
    /// worker may still be ticking it.
    pub fn destroy(mut self) -> Result<(), Endpoint> {
        if matches!(self.slot, ThreadSlot::Running(_)) && !self.can_destroy_thread() {
            return Err(self);
        }
        if let ThreadSlot::Stopped(stopped) =
            std::mem::replace(&mut self.slot, ThreadSlot::Lost)
        {
            if let Err(err) = self.rejoin(stopped) {
                warn!("endpoint {}: released without its core: {err}", self.config.id);
            }
        }
        info!("endpoint {} destroyed", self.config.id);
        Ok(())
    }
}

impl FlitSink for Endpoint {
    fn push_flit(&mut self, flit: Flit) {
        Endpoint::push_flit(self, flit);
    }
}

impl FlitSource for Endpoint {
    type Stream = ();

    fn next_flit(&mut self) -> Option<Tagged<()>> {
        Endpoint::next_flit(self).map(|flit| Tagged { stream: (), flit })
    }
}
