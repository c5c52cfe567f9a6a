//! Shared harness: manual relays between endpoints and frame capture.

use std::time::{Duration, Instant};

use endpoint::{Completion, Endpoint, EndpointConfig, MacAddr};
use transport::{relay, Flit, FrameAssembler};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Endpoints that address each other directly instead of by broadcast.
pub fn paired(id: u8, peer: u8, compat: bool) -> Endpoint {
    let config = EndpointConfig::new(id, compat)
        .with_macs(MacAddr::for_endpoint(id), MacAddr::for_endpoint(peer));
    Endpoint::with_config(config).expect("endpoint")
}

/// Ticks both endpoints `ticks` times, moving every egress flit across.
pub fn pump(a: &mut Endpoint, b: &mut Endpoint, ticks: usize) {
    for _ in 0..ticks {
        a.tick().expect("tick a");
        b.tick().expect("tick b");
        relay(a, b, usize::MAX);
        relay(b, a, usize::MAX);
    }
}

/// Pumps until `a` reports a completion.
pub fn complete(a: &mut Endpoint, b: &mut Endpoint) -> Completion {
    for _ in 0..500 {
        if let Some(done) = a.poll_completion() {
            return done;
        }
        pump(a, b, 1);
    }
    panic!("operation did not complete");
}

/// Pulls every queued egress flit.
pub fn drain(endpoint: &mut Endpoint) -> Vec<Flit> {
    std::iter::from_fn(|| endpoint.next_flit()).collect()
}

/// Reassembles flits into whole frames.
pub fn frames(flits: &[Flit]) -> Vec<Vec<u8>> {
    let mut assembler = FrameAssembler::new();
    flits.iter().filter_map(|f| assembler.push(*f)).collect()
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::yield_now();
    }
    done()
}
