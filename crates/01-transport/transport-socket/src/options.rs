//! Socket configuration parsed from the opaque option blob.
//!
//! The blob is UTF-8 text in command-line form, for example
//! `--bind 127.0.0.1:7000 --peer 127.0.0.1:7001 --stream 2`.

use std::net::SocketAddr;

use clap::Parser;

use crate::error::{SocketError, SocketResult};

/// Largest Ethernet jumbo frame plus the stream byte, rounded up.
pub const DEFAULT_DATAGRAM_SIZE: usize = 9216;

/// Options accepted by [`crate::Socket::new`].
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "socket", disable_help_flag = true)]
pub struct SocketOptions {
    /// Local UDP address to bind.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Remote UDP address datagrams are sent to.
    #[arg(long)]
    pub peer: Option<SocketAddr>,
    /// Stream id stamped on outgoing frames.
    #[arg(long, default_value_t = 0)]
    pub stream: u8,
    /// Probability that an outgoing frame is actually sent.
    #[arg(long, default_value_t = 1.0)]
    pub reliability_send: f64,
    /// Probability that an incoming frame is accepted.
    #[arg(long, default_value_t = 1.0)]
    pub reliability_receive: f64,
    /// Seed for the reliability draws.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Largest datagram accepted from the link.
    #[arg(long, default_value_t = DEFAULT_DATAGRAM_SIZE)]
    pub read_buffer_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind: None,
            peer: None,
            stream: 0,
            reliability_send: 1.0,
            reliability_receive: 1.0,
            seed: 0,
            read_buffer_size: DEFAULT_DATAGRAM_SIZE,
        }
    }
}

impl SocketOptions {
    /// Parses the raw option blob.
    pub fn parse(blob: &[u8]) -> SocketResult<Self> {
        let text = std::str::from_utf8(blob)?;
        let args = std::iter::once("socket").chain(text.split_whitespace());
        let options = SocketOptions::try_parse_from(args)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks value ranges clap cannot express.
    pub fn validate(&self) -> SocketResult<()> {
        for (name, p) in [
            ("reliability-send", self.reliability_send),
            ("reliability-receive", self.reliability_receive),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SocketError::Options(format!(
                    "--{name} must lie in [0, 1], got {p}"
                )));
            }
        }
        if self.read_buffer_size < 2 {
            return Err(SocketError::Options(
                "--read-buffer-size must hold at least one frame byte".into(),
            ));
        }
        Ok(())
    }
}
