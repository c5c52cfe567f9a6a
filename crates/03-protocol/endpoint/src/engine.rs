//! The tick engine: one deterministic protocol step per call.
//!
//! A tick drains caller commands, receives at most one frame, decides whether a
//! frame goes out, flushes staged egress flits and publishes the register file.
//! All timers count ticks; nothing here reads the wall clock.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, trace, warn};
use runtime_native::TickEngine;
use smallvec::SmallVec;
use transport::{chunk_frame, Flit, FlitConsumer, FlitProducer, FlitPush, FrameAssembler};

use crate::config::EndpointConfig;
use crate::connection::ConnectionState;
use crate::credits::Credits;
use crate::memory::SparseMemory;
use crate::operations::{Completion, OperationError, Operations, Request, Ticket};
use crate::registers::{Register, RegisterEvent, RegisterFile, RegisterSnapshot};
use crate::sequence::SeqNum;
use crate::tilelink::{decode_messages, Channel, TlMessage, MAX_TRANSFER};
use crate::wire::{
    decode_frame, encode_frame, rewrite_ack, MacAddr, MessageType, OxHeader, FRAME_HEADER_LEN,
    MASK_LEN, MAX_FRAME_WORDS,
};

/// Requests from the handle, applied at the start of the next tick.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Close,
    Submit { ticket: Ticket, request: Request },
}

/// Everything the core shares with its handle.
pub(crate) struct CoreChannels {
    pub ingress: FlitConsumer,
    pub egress: FlitProducer,
    pub commands: Receiver<Command>,
    pub completions: Sender<Completion>,
    pub events: Sender<RegisterEvent>,
    pub snapshot: Arc<ArcSwap<RegisterSnapshot>>,
}

struct Unacked {
    seq: SeqNum,
    sent_at: u64,
    frame: Vec<u8>,
}

/// Sequence, acknowledgement and credit state of one link. Replaced wholesale
/// when the connection returns to idle.
struct LinkState {
    next_tx: SeqNum,
    next_rx: SeqNum,
    they_acked: SeqNum,
    ack_owed_since: Option<u64>,
    nak_owed: bool,
    /// `next_rx` at the time the last NAK was scheduled; one NAK per gap.
    nak_sent_for: Option<SeqNum>,
    resend_scheduled: bool,
    last_rx_tick: u64,
    last_tx_tick: u64,
    last_resend_tick: u64,
    unacked: VecDeque<Unacked>,
    credits: Credits,
}

impl LinkState {
    fn new(config: &EndpointConfig, now: u64) -> Self {
        Self {
            next_tx: SeqNum::new(0),
            next_rx: SeqNum::new(0),
            they_acked: SeqNum::MAX,
            ack_owed_since: None,
            nak_owed: false,
            nak_sent_for: None,
            resend_scheduled: false,
            last_rx_tick: now,
            last_tx_tick: now,
            last_resend_tick: now,
            unacked: VecDeque::new(),
            credits: Credits::new(config.send_credits(), config.initial_receive_credits),
        }
    }

    /// Sequence number of the last frame received in order.
    fn last_rx(&self) -> SeqNum {
        SeqNum::new(self.next_rx.get().wrapping_sub(1))
    }

    fn owe_ack(&mut self, now: u64) {
        self.ack_owed_since.get_or_insert(now);
    }

    fn frame_sent(&mut self, now: u64) {
        self.ack_owed_since = None;
        self.nak_owed = false;
        self.last_tx_tick = now;
    }

    fn acknowledged(&mut self, seq_ack: SeqNum) {
        if seq_ack.is_at_or_after(self.they_acked) {
            self.they_acked = seq_ack;
        }
        while self
            .unacked
            .front()
            .is_some_and(|entry| self.they_acked.is_at_or_after(entry.seq))
        {
            self.unacked.pop_front();
        }
    }
}

/// Endpoint state advanced by [`EndpointCore::tick`].
///
/// Owned either by the [`crate::Endpoint`] handle or by its execution thread,
/// never both.
pub struct EndpointCore {
    config: EndpointConfig,
    ticks: u64,
    state: ConnectionState,
    link: LinkState,
    ops: Operations,
    outbox: VecDeque<TlMessage>,
    memory: SparseMemory,
    regs: RegisterFile,
    assembler: FrameAssembler,
    staged: VecDeque<Flit>,
    resend_queue: VecDeque<Vec<u8>>,
    io: CoreChannels,
}

impl EndpointCore {
    pub(crate) fn new(config: EndpointConfig, io: CoreChannels) -> Self {
        let link = LinkState::new(&config, 0);
        Self {
            config,
            ticks: 0,
            state: ConnectionState::Idle,
            link,
            ops: Operations::default(),
            outbox: VecDeque::new(),
            memory: SparseMemory::default(),
            regs: RegisterFile::default(),
            assembler: FrameAssembler::new(),
            staged: VecDeque::new(),
            resend_queue: VecDeque::new(),
            io,
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.memory
    }

    /// Advances the endpoint one step and returns the number of flits moved.
    pub fn tick(&mut self) -> usize {
        self.ticks += 1;
        self.drain_commands();
        let (frame, pulled) = self.pull_frame();
        if let Some(frame) = frame {
            self.receive(&frame);
        }
        self.send();
        let flushed = self.flush();
        self.publish();
        pulled + flushed
    }

    fn id(&self) -> u8 {
        self.config.id
    }

    fn enter(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        debug!("endpoint {}: {:?} -> {:?}", self.id(), self.state, next);
        self.state = next;
        if next == ConnectionState::Idle {
            self.reset_link();
        }
    }

    /// Forgets all link state. A frame already staged still goes out.
    fn reset_link(&mut self) {
        self.link = LinkState::new(&self.config, self.ticks);
        self.outbox.clear();
        self.resend_queue.clear();
        for completion in self.ops.fail_all(OperationError::ConnectionClosed) {
            self.complete(completion);
        }
    }

    fn complete(&mut self, completion: Completion) {
        self.regs.incr(Register::OpsCompleted);
        let _ = self.io.completions.send(completion);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.io.commands.try_recv() {
            let compat = self.config.compat_mode;
            match command {
                Command::Connect => match self.state.connect(compat) {
                    Ok(next) => self.enter(next),
                    Err(err) => warn!("endpoint {}: {err}", self.id()),
                },
                Command::Close => match self.state.close(compat) {
                    Ok(next) => self.enter(next),
                    Err(err) => warn!("endpoint {}: {err}", self.id()),
                },
                Command::Submit { ticket, request } => {
                    if self.state.is_closing() {
                        self.complete(Completion {
                            ticket,
                            outcome: Err(OperationError::ConnectionClosed),
                        });
                    } else {
                        self.ops.submit(ticket, request);
                    }
                }
            }
        }
    }

    fn pull_frame(&mut self) -> (Option<Vec<u8>>, usize) {
        let mut pulled = 0;
        while let Some(flit) = self.io.ingress.pop() {
            pulled += 1;
            if let Some(frame) = self.assembler.push(flit) {
                return (Some(frame), pulled);
            }
        }
        (None, pulled)
    }

    fn receive(&mut self, bytes: &[u8]) {
        if bytes.len() < FRAME_HEADER_LEN + MASK_LEN {
            warn!("endpoint {}: dropping {}-byte runt frame", self.id(), bytes.len());
            self.regs.incr(Register::RxMalformed);
            return;
        }
        if !MacAddr::read(bytes).is_some_and(|dst| dst.reaches(self.config.local_mac)) {
            trace!("endpoint {}: frame for another station", self.id());
            self.regs.incr(Register::RxForeign);
            return;
        }
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("endpoint {}: dropping frame: {err}", self.id());
                self.regs.incr(Register::RxMalformed);
                return;
            }
        };
        self.regs.incr(Register::FramesRx);
        let header = frame.header;
        trace!("endpoint {}: rx {:?}", self.id(), header);

        if self.state == ConnectionState::Idle && header.msg_type != MessageType::OpenConnection {
            self.regs.incr(Register::RxIgnored);
            return;
        }

        let expected = self.link.next_rx;
        if header.seq != expected {
            if header.seq.is_at_or_after(expected) {
                self.regs.incr(Register::RxOutOfOrder);
                if self.link.nak_sent_for != Some(expected) {
                    debug!(
                        "endpoint {}: gap, expected {expected} got {}",
                        self.id(),
                        header.seq
                    );
                    self.link.nak_owed = true;
                    self.link.nak_sent_for = Some(expected);
                }
            } else {
                self.regs.incr(Register::RxDuplicate);
                self.link.owe_ack(self.ticks);
            }
            return;
        }

        let messages: SmallVec<[TlMessage; 4]> = if header.msg_type == MessageType::AckOnly {
            SmallVec::new()
        } else {
            match decode_messages(frame.payload, frame.mask) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!("endpoint {}: dropping frame {}: {err}", self.id(), header.seq);
                    self.regs.incr(Register::RxMalformed);
                    return;
                }
            }
        };

        self.link.last_rx_tick = self.ticks;
        self.link.acknowledged(header.seq_ack);
        if !header.ack {
            debug!("endpoint {}: NAK through {}", self.id(), header.seq_ack);
            self.regs.incr(Register::NaksRx);
            self.link.resend_scheduled = true;
        }
        if header.msg_type == MessageType::AckOnly {
            return;
        }

        if let Some(chan) = Channel::from_raw(header.chan) {
            self.link.credits.grant_received(chan, header.credit);
        }
        self.link.next_rx.incr();
        self.link.nak_sent_for = None;
        self.link.owe_ack(self.ticks);

        let next = self.state.on_receive(header.msg_type, self.config.compat_mode);
        self.enter(next);
        if self.state == ConnectionState::Idle {
            return;
        }
        for message in messages {
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: TlMessage) {
        self.link.credits.owe(message.channel(), message.words());
        match message {
            TlMessage::Get {
                source,
                address,
                size,
            } => {
                let len = 1usize << size;
                if len > MAX_TRANSFER {
                    self.regs.incr(Register::TlUnsupported);
                    self.outbox.push_back(TlMessage::AccessAck {
                        source,
                        denied: true,
                    });
                    return;
                }
                self.outbox.push_back(TlMessage::AccessAckData {
                    source,
                    denied: false,
                    data: self.memory.read(address, len),
                });
            }
            TlMessage::PutFullData {
                source,
                address,
                data,
            } => {
                self.memory.write(address, &data);
                self.outbox.push_back(TlMessage::AccessAck {
                    source,
                    denied: false,
                });
            }
            TlMessage::PutPartialData {
                source,
                address,
                data,
                mask,
            } => {
                let stored = self.memory.write_masked(address, &data, &mask);
                trace!("endpoint {}: partial put stored {stored} bytes", self.id());
                self.outbox.push_back(TlMessage::AccessAck {
                    source,
                    denied: false,
                });
            }
            TlMessage::AccessAck { .. } | TlMessage::AccessAckData { .. } => {
                if let Some(completion) = self.ops.complete(&message) {
                    self.complete(completion);
                }
            }
            TlMessage::Unsupported { header } => {
                debug!("endpoint {}: unsupported message {:?}", self.id(), header);
                self.regs.incr(Register::TlUnsupported);
                if header.chan == Channel::A {
                    self.outbox.push_back(TlMessage::AccessAck {
                        source: header.source,
                        denied: true,
                    });
                }
            }
        }
    }

    fn send(&mut self) {
        if !self.staged.is_empty() || self.state == ConnectionState::Idle {
            return;
        }
        if self.resend_queue.is_empty() {
            self.take_resend();
        }
        if let Some(frame) = self.resend_queue.pop_front() {
            self.stage_resend(frame);
            return;
        }
        let messages = self.collect_messages();
        self.poll_frame(messages);
    }

    /// Queues every unacknowledged frame after a NAK or a resend timeout.
    fn take_resend(&mut self) {
        let link = &mut self.link;
        let Some(oldest) = link.unacked.front() else {
            link.resend_scheduled = false;
            return;
        };
        let quiet_since = link
            .last_rx_tick
            .max(link.last_resend_tick)
            .max(oldest.sent_at);
        let timed_out = self.ticks - quiet_since >= self.config.resend_timeout_ticks;
        if !link.resend_scheduled && !timed_out {
            return;
        }
        link.resend_scheduled = false;
        link.last_resend_tick = self.ticks;
        let count = link.unacked.len();
        debug!(
            "endpoint {}: resending {count} frame(s) from {}",
            self.config.id, oldest.seq
        );
        self.regs.add(Register::Resends, count as u64);
        self.resend_queue
            .extend(link.unacked.iter().map(|entry| entry.frame.clone()));
    }

    fn stage_resend(&mut self, mut frame: Vec<u8>) {
        let ack = !self.link.nak_owed;
        if let Err(err) = rewrite_ack(&mut frame, self.link.last_rx(), ack) {
            warn!("endpoint {}: cannot resend frame: {err}", self.id());
            return;
        }
        if !ack {
            self.regs.incr(Register::NaksTx);
        }
        self.link.frame_sent(self.ticks);
        self.stage(&frame);
    }

    fn collect_messages(&mut self) -> Vec<Vec<u8>> {
        let mut encoded = Vec::new();
        if !self.state.carries_messages() {
            return encoded;
        }
        let mut words = 0;
        while let Some(message) = self.outbox.front() {
            let cost = message.words();
            if words + cost > MAX_FRAME_WORDS
                || !self.link.credits.try_consume(message.channel(), cost)
            {
                break;
            }
            words += cost;
            if let Some(message) = self.outbox.pop_front() {
                encoded.push(message.encode());
            }
        }
        if self.state.issues_requests() {
            loop {
                let credits = &mut self.link.credits;
                let used = words;
                let next = self.ops.next_message(|message| {
                    used + message.words() <= MAX_FRAME_WORDS
                        && credits.try_consume(message.channel(), message.words())
                });
                match next {
                    Some(message) => {
                        words += message.words();
                        encoded.push(message.encode());
                    }
                    None => break,
                }
            }
        }
        encoded
    }

    /// Decides what kind of frame, if any, leaves this tick.
    fn poll_frame(&mut self, messages: Vec<Vec<u8>>) {
        let drained = messages.is_empty()
            && self.outbox.is_empty()
            && self.link.unacked.is_empty()
            && (self.state != ConnectionState::ClosedByHost || self.ops.is_idle());
        let due = self.state.due_on_send(drained);
        let grants = self.state.carries_messages() && self.link.credits.any_owed();

        if due.is_some() || !messages.is_empty() || grants {
            let msg_type = due.map_or(MessageType::Normal, |(msg_type, _)| msg_type);
            let (chan, credit) = self
                .link
                .credits
                .take_grant()
                .map_or((0, 0), |(chan, exp)| (chan as u8, exp));
            let header = OxHeader {
                vc: 0,
                msg_type,
                seq: self.link.next_tx,
                seq_ack: self.link.last_rx(),
                ack: !self.link.nak_owed,
                chan,
                credit,
            };
            let frame = encode_frame(self.config.peer_mac, self.config.local_mac, &header, &messages);
            self.link.next_tx.incr();
            self.link.unacked.push_back(Unacked {
                seq: header.seq,
                sent_at: self.ticks,
                frame: frame.clone(),
            });
            self.finish_frame(&header, &frame);
            if let Some((_, next)) = due {
                self.enter(next);
            }
            return;
        }

        let ack_due = self
            .link
            .ack_owed_since
            .is_some_and(|since| self.ticks - since >= self.config.ack_timeout_ticks);
        let heartbeat_due = self
            .config
            .heartbeat_ticks
            .is_some_and(|every| self.ticks - self.link.last_tx_tick >= every);
        if self.link.nak_owed || ack_due || heartbeat_due {
            let header = OxHeader {
                vc: 0,
                msg_type: MessageType::AckOnly,
                seq: self.link.next_tx,
                seq_ack: self.link.last_rx(),
                ack: !self.link.nak_owed,
                chan: 0,
                credit: 0,
            };
            let frame = encode_frame(self.config.peer_mac, self.config.local_mac, &header, &[]);
            self.finish_frame(&header, &frame);
        }
    }

    fn finish_frame(&mut self, header: &OxHeader, frame: &[u8]) {
        trace!("endpoint {}: tx {:?}", self.id(), header);
        if !header.ack {
            self.regs.incr(Register::NaksTx);
        }
        self.link.frame_sent(self.ticks);
        self.stage(frame);
    }

    fn stage(&mut self, frame: &[u8]) {
        self.regs.incr(Register::FramesTx);
        self.staged.extend(chunk_frame(frame));
    }

    fn flush(&mut self) -> usize {
        let mut moved = 0;
        while let Some(flit) = self.staged.front().copied() {
            if self.io.egress.push(flit) == FlitPush::WouldBlock {
                break;
            }
            self.staged.pop_front();
            moved += 1;
        }
        moved
    }

    fn publish(&mut self) {
        self.regs.set(Register::Ticks, self.ticks);
        self.regs.set(Register::ConnectionState, self.state as u64);
        self.regs.set(Register::TxSeq, u64::from(self.link.next_tx.get()));
        self.regs.set(Register::RxSeq, u64::from(self.link.next_rx.get()));
        self.regs.set(Register::TheyAcked, u64::from(self.link.they_acked.get()));
        for event in self.regs.take_changes(self.ticks) {
            match self.io.events.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => self.regs.incr(Register::EventsDropped),
            }
        }
        self.io
            .snapshot
            .store(Arc::new(self.regs.snapshot(self.ticks)));
    }
}

impl TickEngine for EndpointCore {
    fn tick(&mut self) -> usize {
        EndpointCore::tick(self)
    }

    fn name(&self) -> &'static str {
        "ox-endpoint"
    }
}
