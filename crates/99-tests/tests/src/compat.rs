//! Compatibility mode: no handshake, no close, traffic flows once connected.

use endpoint::wire::{decode_frame, MessageType};
use endpoint::{ConnectionState, EndpointError, Register, Response};

use crate::support::{complete, drain, frames, init_logging, paired, pump};

#[test]
fn connect_activates_without_a_handshake() {
    init_logging();
    let mut a = paired(40, 41, true);
    a.connect().expect("connect");
    a.tick().expect("tick");
    assert_eq!(a.connection_state(), ConnectionState::Active);
    let sent = frames(&drain(&mut a));
    assert!(sent
        .iter()
        .filter_map(|f| decode_frame(f).ok())
        .all(|f| f.header.msg_type != MessageType::OpenConnection));
}

#[test]
fn close_is_refused() {
    init_logging();
    let mut a = paired(42, 43, true);
    a.connect().expect("connect");
    pump(&mut a, &mut paired(43, 42, true), 2);
    assert!(matches!(a.close(), Err(EndpointError::CompatMode)));
    assert_eq!(a.connection_state(), ConnectionState::Active);
}

#[test]
fn traffic_flows_between_compat_endpoints() {
    init_logging();
    let mut a = paired(44, 45, true);
    let mut b = paired(45, 44, true);
    a.connect().expect("connect");
    b.connect().expect("connect");

    let payload: Vec<u8> = (0..128u8).rev().collect();
    a.write(0x8000, &payload).expect("write");
    assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Written));
    a.read(0x8000, 128).expect("read");
    assert_eq!(
        complete(&mut a, &mut b).outcome,
        Ok(Response::Data(payload))
    );

    // Each side serves its own memory; nothing was written to a's.
    b.read_64(0x8000).expect("read back");
    let done = complete(&mut b, &mut a);
    assert_eq!(done.outcome, Ok(Response::Data64(0)));
    assert_eq!(a.registers().get(Register::ConnectionState), 3);
}

#[test]
fn unconnected_peer_ignores_traffic() {
    init_logging();
    let mut a = paired(46, 47, true);
    let mut b = paired(47, 46, true);
    a.connect().expect("connect");
    a.write_64(0, 1).expect("write");
    pump(&mut a, &mut b, 6);
    assert!(b.registers().get(Register::RxIgnored) >= 1);
    assert_eq!(b.registers().get(Register::OpsCompleted), 0);
    assert!(a.poll_completion().is_none());
}
