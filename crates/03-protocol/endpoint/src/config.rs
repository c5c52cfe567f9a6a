//! Endpoint construction parameters.

use std::time::Duration;

use transport::{MAX_RING_CAPACITY, MIN_RING_CAPACITY};

use crate::error::{EndpointError, EndpointResult};
use crate::wire::MacAddr;

/// Send credits per channel a normal-mode endpoint assumes the peer granted.
pub const DEFAULT_SEND_CREDITS: u64 = 128;

/// Everything an [`crate::Endpoint`] is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint number, also the last byte of the default local MAC.
    pub id: u8,
    /// Older link variant without connection management or initial credits.
    pub compat_mode: bool,
    pub local_mac: MacAddr,
    /// Destination of every frame sent; broadcast unless configured.
    pub peer_mac: MacAddr,
    /// Flit ring sizes, rounded up to powers of two.
    pub ingress_capacity: usize,
    pub egress_capacity: usize,
    /// Ticks an owed acknowledgement may wait for a frame to ride on.
    pub ack_timeout_ticks: u64,
    /// Ticks without in-order traffic before unacknowledged frames are resent.
    pub resend_timeout_ticks: u64,
    /// Idle ticks after which an ACK-only frame is sent as keep-alive.
    pub heartbeat_ticks: Option<u64>,
    /// Credits per channel owed to the peer once the link is up.
    pub initial_receive_credits: u64,
    /// Register events buffered before new ones are dropped.
    pub event_capacity: usize,
    /// Sleep between ticks of the execution thread.
    pub tick_cadence: Duration,
}

impl EndpointConfig {
    /// Defaults for endpoint `id`.
    pub fn new(id: u8, compat_mode: bool) -> Self {
        Self {
            id,
            compat_mode,
            local_mac: MacAddr::for_endpoint(id),
            peer_mac: MacAddr::BROADCAST,
            ingress_capacity: 4096,
            egress_capacity: 4096,
            ack_timeout_ticks: 8,
            resend_timeout_ticks: 256,
            heartbeat_ticks: Some(10_000),
            initial_receive_credits: 1 << 28,
            event_capacity: 1024,
            tick_cadence: Duration::from_micros(100),
        }
    }

    /// Overrides both addresses.
    pub fn with_macs(mut self, local: MacAddr, peer: MacAddr) -> Self {
        self.local_mac = local;
        self.peer_mac = peer;
        self
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.tick_cadence = cadence;
        self
    }

    /// Sets the ack and resend timeouts, in ticks.
    pub fn with_timeouts(mut self, ack: u64, resend: u64) -> Self {
        self.ack_timeout_ticks = ack;
        self.resend_timeout_ticks = resend;
        self
    }

    /// Credits per channel assumed granted before the peer says otherwise.
    pub fn send_credits(&self) -> u64 {
        if self.compat_mode {
            0
        } else {
            DEFAULT_SEND_CREDITS
        }
    }

    /// Rejects configurations the core cannot run with.
    pub fn validate(&self) -> EndpointResult<()> {
        let ring = MIN_RING_CAPACITY..=MAX_RING_CAPACITY;
        if !ring.contains(&self.ingress_capacity) || !ring.contains(&self.egress_capacity) {
            return Err(EndpointError::Config(format!(
                "ring capacities must lie in {MIN_RING_CAPACITY}..={MAX_RING_CAPACITY}"
            )));
        }
        if self.ack_timeout_ticks == 0 {
            return Err(EndpointError::Config("ack timeout must be non-zero".into()));
        }
        if self.resend_timeout_ticks <= self.ack_timeout_ticks {
            return Err(EndpointError::Config(
                "resend timeout must exceed the ack timeout".into(),
            ));
        }
        if self.heartbeat_ticks == Some(0) {
            return Err(EndpointError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(EndpointError::Config("event capacity must be non-zero".into()));
        }
        if self.local_mac == self.peer_mac {
            return Err(EndpointError::Config(format!(
                "local and peer MAC are both {}",
                self.local_mac
            )));
        }
        Ok(())
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(0, false)
    }
}
