//! The C surface driven the way a foreign caller would.

use std::os::raw::c_char;
use std::ptr;

use sim_abi::{
    can_destroy_execution_thread, destroy_execution_thread, sim_close, sim_connect, sim_destroy,
    sim_last_error_length, sim_last_error_message, sim_new, sim_next_flit, sim_push_flit,
    sim_tick, sim_write_partial, socket_active, socket_destroy, socket_new, socket_next_flit,
    socket_push_flit, start_execution_thread, stop_execution_thread, SimInfo, NO_FLIT, NO_TICKET,
};

use endpoint::Register;

use crate::support::init_logging;

fn last_error() -> String {
    let len = sim_last_error_length();
    let mut buf = vec![0 as c_char; len as usize + 1];
    let written = unsafe { sim_last_error_message(buf.as_mut_ptr(), buf.len() as i32) };
    assert_eq!(written, len);
    buf[..len as usize].iter().map(|b| *b as u8 as char).collect()
}

/// Moves every egress flit of `from` into `to`, returning how many moved.
unsafe fn shuttle(from: *const SimInfo, to: *const SimInfo) -> usize {
    let mut out = [0u64; 3];
    let mut moved = 0;
    while sim_next_flit(&mut out, from) {
        sim_push_flit(to, out[0], out[1] != 0, out[2] as u8);
        moved += 1;
    }
    assert_eq!(out, [NO_FLIT; 3]);
    moved
}

#[test]
fn two_simulators_connect_and_close() {
    init_logging();
    let a = sim_new(70, false);
    let b = sim_new(71, false);
    assert!(!a.is_null() && !b.is_null());
    unsafe {
        assert!(sim_connect(a));
        let mut moved = 0;
        for _ in 0..20 {
            assert!(sim_tick(a));
            assert!(sim_tick(b));
            moved += shuttle(a, b) + shuttle(b, a);
        }
        assert!(moved >= 18);
        assert_eq!((*a).registers().get(Register::ConnectionState), 3);

        assert!(sim_close(a));
        for _ in 0..100 {
            assert!(sim_tick(a));
            assert!(sim_tick(b));
            shuttle(a, b);
            shuttle(b, a);
        }
        assert_eq!((*a).registers().get(Register::ConnectionState), 0);
        assert_eq!((*b).registers().get(Register::ConnectionState), 0);
        assert!(sim_destroy(a));
        assert!(sim_destroy(b));
    }
}

#[test]
fn partial_write_completes_across_simulators() {
    init_logging();
    let a = sim_new(73, false);
    let b = sim_new(74, false);
    let data: Vec<u8> = (1..=21).collect();
    unsafe {
        assert!(sim_connect(a));
        let ticket = sim_write_partial(a, 0x500, data.as_ptr(), data.len());
        assert_ne!(ticket, NO_TICKET);
        for _ in 0..100 {
            assert!(sim_tick(a));
            assert!(sim_tick(b));
            shuttle(a, b);
            shuttle(b, a);
        }
        assert_eq!((*a).registers().get(Register::OpsCompleted), 1);
        assert_eq!((*b).registers().get(Register::TlUnsupported), 0);
        assert!(sim_destroy(a));
        assert!(sim_destroy(b));
    }
}

#[test]
fn compat_simulator_refuses_close() {
    init_logging();
    let sim = sim_new(72, true);
    unsafe {
        assert!(sim_connect(sim));
        assert!(sim_tick(sim));
        assert!(!sim_close(sim));
        assert_eq!(
            last_error(),
            "connection management is unavailable in compatibility mode"
        );
        assert!(sim_tick(sim));
        assert_eq!(sim_last_error_length(), 0);
        assert!(sim_destroy(sim));
    }
}

#[test]
fn error_buffer_contract() {
    init_logging();
    assert!(sim_new(256, false).is_null());
    let len = sim_last_error_length();
    assert!(len > 0);
    let mut short = vec![0x41 as c_char; len as usize - 1];
    assert_eq!(
        unsafe { sim_last_error_message(short.as_mut_ptr(), short.len() as i32) },
        -1
    );
    assert!(short.iter().all(|b| *b as u8 == 0x41));
    let mut exact = vec![0 as c_char; len as usize];
    assert_eq!(
        unsafe { sim_last_error_message(exact.as_mut_ptr(), len) },
        len
    );
    assert_eq!(unsafe { sim_last_error_message(ptr::null_mut(), 0) }, -1);
    assert_eq!(last_error(), "endpoint id 256 does not fit in eight bits");

    let sim = sim_new(1, false);
    assert_eq!(sim_last_error_length(), 0);
    assert_eq!(unsafe { sim_last_error_message(ptr::null_mut(), 0) }, -1);
    let mut spare = [0x41 as c_char; 4];
    assert_eq!(unsafe { sim_last_error_message(spare.as_mut_ptr(), 4) }, 0);
    assert_eq!(spare[0] as u8, 0x41);
    assert!(unsafe { sim_destroy(sim) });
}

#[test]
fn execution_thread_through_the_abi() {
    init_logging();
    let sim = sim_new(73, false);
    unsafe {
        start_execution_thread(sim);
        start_execution_thread(sim);
        assert_eq!(sim_last_error_length(), 0);
        sim_push_flit(sim, 0x1, false, 0xFF);
        sim_push_flit(sim, 0x2, true, 0x0F);
        assert!(!sim_destroy(sim));
        stop_execution_thread(sim);
        while !can_destroy_execution_thread(sim) {
            std::thread::yield_now();
        }
        assert!(destroy_execution_thread(sim));
        assert!(sim_tick(sim));
        assert!(sim_destroy(sim));
    }
}

#[test]
fn udp_sockets_carry_frames() {
    init_logging();
    let probe_a = std::net::UdpSocket::bind("127.0.0.1:0").expect("port a");
    let probe_b = std::net::UdpSocket::bind("127.0.0.1:0").expect("port b");
    let addr_a = probe_a.local_addr().expect("addr a");
    let addr_b = probe_b.local_addr().expect("addr b");
    drop((probe_a, probe_b));

    let opts_a = format!("--bind {addr_a} --peer {addr_b} --stream 4\0");
    let opts_b = format!("--bind {addr_b} --peer {addr_a}\0");
    let a = unsafe { socket_new(opts_a.as_ptr().cast()) };
    let b = unsafe { socket_new(opts_b.as_ptr().cast()) };
    assert!(!a.is_null(), "{}", last_error());
    assert!(!b.is_null(), "{}", last_error());
    unsafe {
        assert!(socket_active(a) && socket_active(b));
        socket_push_flit(a, 0x1122_3344_5566_7788, false, 0xFF);
        socket_push_flit(a, 0x99, true, 0x01);

        let mut out = [0u64; 4];
        let mut received = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while received.len() < 2 && std::time::Instant::now() < deadline {
            if socket_next_flit(&mut out, b) {
                received.push(out);
            } else {
                assert_eq!(out, [NO_FLIT; 4]);
                std::thread::yield_now();
            }
        }
        assert_eq!(
            received,
            vec![[4, 0x1122_3344_5566_7788, 0, 0xFF], [4, 0x99, 1, 0x01]]
        );
        socket_destroy(a);
        socket_destroy(b);
    }
}
