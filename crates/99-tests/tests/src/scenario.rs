//! The reference flit scenario: a short frame pushed into a fresh endpoint.

use endpoint::wire::{
    decode_frame, encode_frame, MessageType, OxHeader, ETHERTYPE_OMNIXTEND, MIN_FRAME_LEN,
};
use endpoint::{
    ConnectionState, Endpoint, EndpointConfig, MacAddr, Register, Request, Response, SeqNum,
};
use transport::{chunk_frame, Flit};

use crate::support::{complete, drain, frames, init_logging, pump};

const TICK_CEILING: usize = 64;

fn push_runt(endpoint: &mut Endpoint) {
    endpoint.push_flit(Flit::new(0x1, false, 0xFF));
    endpoint.push_flit(Flit::new(0x2, true, 0x0F));
}

#[test]
fn runt_frame_is_counted_and_produces_nothing() {
    init_logging();
    let mut endpoint = Endpoint::new(1, false).expect("endpoint");
    push_runt(&mut endpoint);

    let mut produced = Vec::new();
    for _ in 0..TICK_CEILING {
        endpoint.tick().expect("tick");
        produced.extend(drain(&mut endpoint));
        if !produced.is_empty() {
            break;
        }
    }
    assert!(produced.is_empty());
    let regs = endpoint.registers();
    assert_eq!(regs.get(Register::RxMalformed), 1);
    assert_eq!(regs.get(Register::FramesRx), 0);
    assert_eq!(regs.get(Register::Ticks), TICK_CEILING as u64);
    assert_eq!(endpoint.connection_state(), ConnectionState::Idle);
}

#[test]
fn runt_in_compat_mode_is_still_malformed() {
    init_logging();
    let mut endpoint = Endpoint::new(1, true).expect("endpoint");
    endpoint.connect().expect("connect");
    push_runt(&mut endpoint);
    endpoint.tick().expect("tick");
    assert_eq!(endpoint.registers().get(Register::RxMalformed), 1);
    assert_eq!(endpoint.connection_state(), ConnectionState::Active);
}

#[test]
fn connect_emits_minimum_open_frame() {
    init_logging();
    let mut endpoint = Endpoint::new(1, false).expect("endpoint");
    push_runt(&mut endpoint);
    endpoint.tick().expect("tick");
    endpoint.connect().expect("connect");
    endpoint.tick().expect("tick");

    let flits = drain(&mut endpoint);
    assert_eq!(flits.len(), 9);
    assert!(flits[..8].iter().all(|f| !f.last && f.lane_mask == 0xFF));
    assert!(flits[8].last);
    assert_eq!(flits[8].lane_mask, 0x3F);

    let frames = frames(&flits);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), MIN_FRAME_LEN);
    let frame = decode_frame(&frames[0]).expect("decode");
    assert_eq!(frame.dst, MacAddr::BROADCAST);
    assert_eq!(frame.src, MacAddr::for_endpoint(1));
    assert_eq!(
        u16::from_be_bytes([frames[0][12], frames[0][13]]),
        ETHERTYPE_OMNIXTEND
    );
    assert_eq!(frame.header.msg_type, MessageType::OpenConnection);
    assert_eq!(frame.header.seq, SeqNum::new(0));
    assert_eq!(frame.mask, 0);
    assert_eq!(endpoint.connection_state(), ConnectionState::Opened);
}

/// `02:00:00:00:00:<id>`, spelled out byte by byte.
fn station(id: u8) -> MacAddr {
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, id])
}

fn push_open(endpoint: &mut Endpoint, dst: MacAddr) {
    let header = OxHeader {
        vc: 0,
        msg_type: MessageType::OpenConnection,
        seq: SeqNum::new(0),
        seq_ack: SeqNum::MAX,
        ack: true,
        chan: 0,
        credit: 0,
    };
    let frame = encode_frame(dst, station(9), &header, &[]);
    for flit in chunk_frame(&frame) {
        endpoint.push_flit(flit);
    }
}

#[test]
fn open_addressed_to_station_mac_is_accepted() {
    init_logging();
    let mut endpoint = Endpoint::new(7, false).expect("endpoint");
    push_open(&mut endpoint, station(7));
    endpoint.tick().expect("tick");

    let regs = endpoint.registers();
    assert_eq!(regs.get(Register::FramesRx), 1);
    assert_eq!(regs.get(Register::RxForeign), 0);
    assert_eq!(endpoint.connection_state(), ConnectionState::Active);
}

#[test]
fn open_for_another_station_is_foreign() {
    init_logging();
    let mut endpoint = Endpoint::new(7, false).expect("endpoint");
    push_open(&mut endpoint, station(8));
    push_open(&mut endpoint, MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x08]));
    endpoint.tick().expect("tick");

    let regs = endpoint.registers();
    assert_eq!(regs.get(Register::RxForeign), 2);
    assert_eq!(regs.get(Register::FramesRx), 0);
    assert_eq!(endpoint.connection_state(), ConnectionState::Idle);
}

#[test]
fn peers_configured_by_station_mac_exchange_data() {
    init_logging();
    let mut config_a = EndpointConfig::new(20, false);
    config_a.peer_mac = station(21);
    let mut config_b = EndpointConfig::new(21, false);
    config_b.peer_mac = station(20);
    let mut a = Endpoint::with_config(config_a).expect("endpoint a");
    let mut b = Endpoint::with_config(config_b).expect("endpoint b");

    a.connect().expect("connect");
    pump(&mut a, &mut b, 20);
    assert_eq!(a.connection_state(), ConnectionState::Active);
    assert_eq!(b.connection_state(), ConnectionState::Active);

    a.submit(Request::Write64 { address: 0x80, data: 0xFEED }).expect("write");
    assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Written));
    a.read_64(0x80).expect("read");
    assert_eq!(complete(&mut a, &mut b).outcome, Ok(Response::Data64(0xFEED)));
    assert_eq!(a.registers().get(Register::RxForeign), 0);
    assert_eq!(b.registers().get(Register::RxForeign), 0);
}
