//! End-to-end links: manual ticking, worker threads and socket transports.

use std::time::Duration;

use endpoint::{
    Completion, ConnectionState, Endpoint, EndpointConfig, Register, Request, Response,
};
use transport::relay;
use transport_socket::{Socket, SocketOptions};

use crate::support::{complete, init_logging, paired, pump, wait_until};

#[test]
fn manual_link_serves_every_transfer_size() {
    init_logging();
    let mut a = paired(50, 51, false);
    let mut b = paired(51, 50, false);
    a.connect().expect("connect");
    pump(&mut a, &mut b, 20);
    assert_eq!(a.connection_state(), ConnectionState::Active);
    assert_eq!(b.connection_state(), ConnectionState::Active);

    for shift in 3..=8 {
        let len = 1usize << shift;
        let address = 0x1_0000 * shift as u64;
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + shift) as u8).collect();
        a.write(address, &data).expect("write");
        assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Written));
        a.read(address, len).expect("read");
        assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Data(data)));
    }
    assert_eq!(a.registers().get(Register::OpsCompleted), 12);
    assert_eq!(a.registers().get(Register::Resends), 0);
}

#[test]
fn partial_writes_leave_surrounding_bytes_alone() {
    init_logging();
    let mut a = paired(58, 59, false);
    let mut b = paired(59, 58, false);
    a.connect().expect("connect");
    pump(&mut a, &mut b, 20);

    a.write(0x2000, &[0xEE; 256]).expect("fill");
    assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Written));
    for (offset, len) in [(0usize, 1usize), (8, 13), (64, 100), (0, 256)] {
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(3) | 1).collect();
        a.write_partial(0x2000 + offset as u64, &data).expect("partial");
        assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Written));

        a.read(0x2000, 256).expect("read back");
        let Ok(Response::Data(block)) = complete(&mut a, &mut b).outcome else {
            panic!("read failed");
        };
        let end = offset + len;
        assert_eq!(&block[offset..end], data.as_slice());
        assert!(block[end..].iter().all(|byte| *byte == 0xEE));
        if offset > 0 {
            assert_eq!(block[offset - 1], 0xEE);
        }
    }
    assert_eq!(b.registers().get(Register::TlUnsupported), 0);
}

#[test]
fn pipelined_requests_complete_in_order() {
    init_logging();
    let mut a = paired(52, 53, false);
    let mut b = paired(53, 52, false);
    a.connect().expect("connect");
    let mut tickets: Vec<_> = (0..64u64)
        .map(|i| a.write_64(i * 8, i).expect("write"))
        .collect();
    tickets.extend((0..64u64).map(|i| a.read_64(i * 8).expect("read")));
    pump(&mut a, &mut b, 400);
    let done: Vec<Completion> = std::iter::from_fn(|| a.poll_completion()).collect();
    assert_eq!(done.len(), 128);
    assert_eq!(done.iter().map(|c| c.ticket).collect::<Vec<_>>(), tickets);
    for (i, completion) in done[64..].iter().enumerate() {
        assert_eq!(completion.outcome, Ok(Response::Data64(i as u64)));
    }
}

#[test]
fn both_sides_issue_requests() {
    init_logging();
    let mut a = paired(54, 55, false);
    let mut b = paired(55, 54, false);
    a.connect().expect("connect");
    pump(&mut a, &mut b, 20);
    a.write_64(0x10, 0xAAAA).expect("a writes");
    b.write_64(0x10, 0xBBBB).expect("b writes");
    pump(&mut a, &mut b, 40);
    a.read_64(0x10).expect("a reads");
    b.read_64(0x10).expect("b reads");
    pump(&mut a, &mut b, 40);
    let last = |e: &mut Endpoint| std::iter::from_fn(|| e.poll_completion()).last();
    assert_eq!(last(&mut a).map(|c| c.outcome), Some(Ok(Response::Data64(0xAAAA))));
    assert_eq!(last(&mut b).map(|c| c.outcome), Some(Ok(Response::Data64(0xBBBB))));
}

#[test]
fn threaded_endpoints_exchange_data() {
    init_logging();
    let mut a = paired(56, 57, false);
    let mut b = paired(57, 56, false);
    a.connect().expect("connect");
    a.start_thread().expect("start a");
    b.start_thread().expect("start b");

    let shuttle = |a: &mut Endpoint, b: &mut Endpoint| {
        relay(a, b, usize::MAX);
        relay(b, a, usize::MAX);
    };
    assert!(wait_until(Duration::from_secs(10), || {
        shuttle(&mut a, &mut b);
        a.connection_state() == ConnectionState::Active
            && b.connection_state() == ConnectionState::Active
    }));

    a.submit(Request::Write {
        address: 0x400,
        data: vec![0x5A; 256],
    })
    .expect("write");
    a.submit(Request::Read {
        address: 0x400,
        len: 256,
    })
    .expect("read");
    let mut done = Vec::new();
    assert!(wait_until(Duration::from_secs(10), || {
        shuttle(&mut a, &mut b);
        done.extend(std::iter::from_fn(|| a.poll_completion()));
        done.len() == 2
    }));
    assert_eq!(done[1].outcome, Ok(Response::Data(vec![0x5A; 256])));

    for endpoint in [&mut a, &mut b] {
        endpoint.stop_thread();
        assert!(wait_until(Duration::from_secs(10), || endpoint
            .can_destroy_thread()));
        endpoint.destroy_thread().expect("reclaim");
        endpoint.tick().expect("manual tick after reclaim");
    }
    assert!(a.destroy().is_ok());
    assert!(b.destroy().is_ok());
}

fn socket_options(stream: u8, reliability: f64, seed: u64) -> SocketOptions {
    SocketOptions {
        stream,
        reliability_send: reliability,
        seed,
        ..SocketOptions::default()
    }
}

/// Ticks both endpoints with their flits crossing a socket pair.
fn pump_sockets(
    a: &mut Endpoint,
    b: &mut Endpoint,
    sockets: &mut (Socket, Socket),
    ticks: usize,
) {
    for _ in 0..ticks {
        a.tick().expect("tick a");
        b.tick().expect("tick b");
        relay(a, &mut sockets.0, usize::MAX);
        relay(b, &mut sockets.1, usize::MAX);
        relay(&mut sockets.1, b, usize::MAX);
        relay(&mut sockets.0, a, usize::MAX);
    }
}

#[test]
fn endpoints_talk_through_memory_sockets() -> anyhow::Result<()> {
    init_logging();
    let mut sockets = Socket::memory_pair(socket_options(1, 1.0, 0), socket_options(2, 1.0, 0))?;
    let mut a = Endpoint::new(60, false)?;
    let mut b = Endpoint::new(61, false)?;
    a.connect()?;
    pump_sockets(&mut a, &mut b, &mut sockets, 20);
    assert_eq!(b.connection_state(), ConnectionState::Active);

    a.write_64(0x40, 0x1234_5678)?;
    a.read_64(0x40)?;
    pump_sockets(&mut a, &mut b, &mut sockets, 40);
    let done: Vec<_> = std::iter::from_fn(|| a.poll_completion()).collect();
    assert_eq!(done.len(), 2);
    assert_eq!(done[1].outcome, Ok(Response::Data64(0x1234_5678)));
    assert!(sockets.0.metrics().frames_sent > 0);
    assert_eq!(sockets.1.metrics().malformed, 0);

    sockets.0.close();
    assert!(!sockets.0.active());
    assert!(sockets.0.next_flit().is_none());
    Ok(())
}

#[test]
fn lossy_socket_is_repaired_by_resends() {
    init_logging();
    let mut sockets =
        Socket::memory_pair(socket_options(1, 0.8, 11), socket_options(2, 0.8, 12))
            .expect("sockets");
    let config = |id| EndpointConfig::new(id, false).with_timeouts(4, 32);
    let mut a = Endpoint::with_config(config(62)).expect("a");
    let mut b = Endpoint::with_config(config(63)).expect("b");
    a.connect().expect("connect");
    let mut tickets: Vec<_> = (0..16u64)
        .map(|i| a.write_64(i * 8, !i).expect("write"))
        .collect();
    tickets.extend((0..16u64).map(|i| a.read_64(i * 8).expect("read")));

    let mut done = Vec::new();
    for _ in 0..200 {
        pump_sockets(&mut a, &mut b, &mut sockets, 50);
        done.extend(std::iter::from_fn(|| a.poll_completion()));
        if done.len() == tickets.len() {
            break;
        }
    }
    assert_eq!(done.len(), tickets.len());
    for (i, completion) in done[16..].iter().enumerate() {
        assert_eq!(completion.outcome, Ok(Response::Data64(!(i as u64))));
    }
    let dropped = sockets.0.metrics().send_dropped + sockets.1.metrics().send_dropped;
    if dropped > 0 {
        let resends = a.registers().get(Register::Resends) + b.registers().get(Register::Resends);
        assert!(resends > 0);
    }
}
