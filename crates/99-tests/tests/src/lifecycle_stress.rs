//! Start, feed, stop and destroy execution threads many times over.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use endpoint::{Endpoint, EndpointConfig, ThreadState};
use parking_lot::Mutex;
use transport::Flit;

use crate::support::init_logging;

const ROUNDS: usize = 1000;

/// A well-formed open frame addressed to everyone.
fn burst() -> Vec<Flit> {
    let mut opener = Endpoint::new(200, false).expect("opener");
    opener.connect().expect("connect");
    opener.tick().expect("tick");
    std::iter::from_fn(|| opener.next_flit()).collect()
}

fn fast(id: u8, compat: bool) -> Endpoint {
    let config = EndpointConfig::new(id, compat).with_cadence(Duration::from_micros(1));
    Endpoint::with_config(config).expect("endpoint")
}

#[test]
fn start_stop_destroy_repeatedly() {
    init_logging();
    let flits = burst();
    assert!(!flits.is_empty());
    for round in 0..ROUNDS {
        let mut endpoint = fast((round % 200) as u8, round % 2 == 1);
        endpoint.start_thread().expect("start");
        for flit in &flits {
            endpoint.push_flit(*flit);
        }
        endpoint.stop_thread();
        while !endpoint.can_destroy_thread() {
            thread::yield_now();
        }
        assert_eq!(endpoint.thread_state(), ThreadState::Stopped);
        endpoint.destroy_thread().expect("destroy thread");
        assert_eq!(endpoint.thread_state(), ThreadState::NotStarted);
        endpoint.tick().expect("tick after destroy");
        assert!(endpoint.destroy().is_ok(), "round {round}");
    }
}

#[test]
fn concurrent_feeder_does_not_race_shutdown() {
    init_logging();
    let flits = burst();
    for round in 0..ROUNDS / 10 {
        let endpoint = Arc::new(Mutex::new(fast(7, false)));
        endpoint.lock().start_thread().expect("start");
        let feeder = {
            let endpoint = Arc::clone(&endpoint);
            let flits = flits.clone();
            thread::spawn(move || {
                for flit in flits.iter().cycle().take(flits.len() * 8) {
                    endpoint.lock().push_flit(*flit);
                    while endpoint.lock().next_flit().is_some() {}
                }
            })
        };
        if round % 2 == 0 {
            thread::yield_now();
        }
        endpoint.lock().stop_thread();
        while !endpoint.lock().can_destroy_thread() {
            thread::yield_now();
        }
        feeder.join().expect("feeder");
        let mut endpoint = Arc::try_unwrap(endpoint)
            .ok()
            .expect("sole owner")
            .into_inner();
        endpoint.destroy_thread().expect("destroy thread");
        // Flits pushed after the stop are still waiting for a tick.
        endpoint.tick().expect("tick");
        assert!(endpoint.destroy().is_ok());
    }
}

#[test]
fn destroy_is_refused_until_stop_is_observed() {
    init_logging();
    let mut endpoint = fast(9, false);
    endpoint.start_thread().expect("start");
    assert!(!endpoint.can_destroy_thread());
    assert!(endpoint.destroy_thread().is_err());
    assert!(endpoint.tick().is_err());
    let endpoint = match endpoint.destroy() {
        Ok(()) => panic!("destroyed a running endpoint"),
        Err(endpoint) => endpoint,
    };
    endpoint.stop_thread();
    let mut endpoint = endpoint;
    while !endpoint.can_destroy_thread() {
        thread::yield_now();
    }
    assert!(endpoint.destroy().is_ok());
}
