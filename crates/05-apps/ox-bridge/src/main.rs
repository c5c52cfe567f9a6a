//! Bridges one simulated endpoint onto a UDP flit socket.
//!
//! The endpoint ticks on its execution thread while the main thread shuttles
//! flits between it and the socket. On exit every register is printed.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use endpoint::{print_register, Completion, Endpoint, EndpointConfig, Response, Ticket};
use log::{info, warn};
use transport_socket::Socket;

/// Probe operations and their rendering.
mod render {
    use endpoint::{Completion, Response};

    /// One line per completed probe operation.
    pub fn completion(label: &str, completion: &Completion) -> String {
        match &completion.outcome {
            Ok(Response::Data64(value)) => format!("{label}: read {value:#018x}"),
            Ok(Response::Data(bytes)) => format!("{label}: read {} byte(s)", bytes.len()),
            Ok(Response::Written) => format!("{label}: written"),
            Err(err) => format!("{label}: failed ({err})"),
        }
    }
}

/// Run an endpoint against a remote peer over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge a simulated link endpoint to UDP", long_about = None)]
struct Cli {
    /// Endpoint id, also used to derive the local MAC address.
    #[arg(long, default_value_t = 0)]
    id: u8,
    /// Run without connection management: links are active from the start.
    #[arg(long)]
    compat: bool,
    /// Local UDP address.
    #[arg(long)]
    bind: SocketAddr,
    /// Remote UDP address.
    #[arg(long)]
    peer: SocketAddr,
    /// Open the connection instead of waiting for the peer to do so.
    #[arg(long)]
    connect: bool,
    /// Write a marker word to this address once active, then read it back.
    #[arg(long, value_parser = parse_u64, value_name = "ADDR")]
    probe: Option<u64>,
    /// Microseconds between endpoint ticks.
    #[arg(long, default_value_t = 100)]
    cadence_us: u64,
    /// Seconds to run before shutting down.
    #[arg(long, default_value_t = 5.0)]
    duration: f64,
    /// Probability that an outgoing frame is sent, for loss testing.
    #[arg(long, default_value_t = 1.0)]
    reliability: f64,
}

const PROBE_MARKER: u64 = 0x0DDB_A11C_AFEF_00D5;

struct Probe {
    address: u64,
    write: Option<Ticket>,
    read: Option<Ticket>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if !(cli.duration.is_finite() && cli.duration > 0.0) {
        bail!("--duration must be a positive number of seconds");
    }

    let options = format!(
        "--bind {} --peer {} --stream {} --reliability-send {}",
        cli.bind, cli.peer, cli.id, cli.reliability
    );
    let mut socket = Socket::new(options.as_bytes()).context("failed to open socket")?;

    let config = EndpointConfig::new(cli.id, cli.compat)
        .with_cadence(Duration::from_micros(cli.cadence_us.max(1)));
    let mut endpoint = Endpoint::with_config(config).context("failed to create endpoint")?;
    if cli.connect {
        endpoint.connect().context("failed to start connection")?;
    }
    endpoint
        .start_thread()
        .context("failed to start execution thread")?;

    let mut probe = cli.probe.map(|address| Probe {
        address,
        write: None,
        read: None,
    });
    let deadline = Instant::now() + Duration::from_secs_f64(cli.duration);
    let relayed = relay(&mut endpoint, &mut socket, probe.as_mut(), deadline);

    endpoint.stop_thread();
    while !endpoint.can_destroy_thread() {
        thread::yield_now();
    }
    endpoint
        .destroy_thread()
        .context("failed to reclaim endpoint")?;
    let (to_peer, from_peer) = relayed?;
    info!("relayed {to_peer} flit(s) out and {from_peer} flit(s) in");

    let metrics = socket.metrics();
    println!(
        "socket: {} frame(s) sent, {} received, {} dropped",
        metrics.frames_sent,
        metrics.frames_received,
        metrics.send_dropped + metrics.receive_dropped
    );
    for (register, value) in endpoint.registers().iter() {
        print_register(register.name(), value)?;
    }
    socket.destroy();
    if endpoint.destroy().is_err() {
        warn!("endpoint still owned by its worker at exit");
    }
    Ok(())
}

fn relay(
    endpoint: &mut Endpoint,
    socket: &mut Socket,
    mut probe: Option<&mut Probe>,
    deadline: Instant,
) -> Result<(u64, u64)> {
    let (mut to_peer, mut from_peer) = (0u64, 0u64);
    while Instant::now() < deadline {
        if !socket.active() {
            bail!("socket transport failed");
        }
        let mut moved = false;
        while let Some(flit) = endpoint.next_flit() {
            socket.push_flit(flit);
            to_peer += 1;
            moved = true;
        }
        while let Some((_, flit)) = socket.next_flit() {
            endpoint.push_flit(flit);
            from_peer += 1;
            moved = true;
        }
        if let Some(probe) = probe.as_deref_mut() {
            drive_probe(endpoint, probe)?;
        }
        if !moved {
            thread::sleep(Duration::from_micros(50));
        }
    }
    Ok((to_peer, from_peer))
}

fn drive_probe(endpoint: &mut Endpoint, probe: &mut Probe) -> Result<()> {
    if probe.write.is_none() && endpoint.connection_state().issues_requests() {
        probe.write = Some(endpoint.write_64(probe.address, PROBE_MARKER)?);
        probe.read = Some(endpoint.read_64(probe.address)?);
    }
    while let Some(completion) = endpoint.poll_completion() {
        report_probe(probe, &completion);
    }
    Ok(())
}

fn report_probe(probe: &Probe, completion: &Completion) {
    let label = if Some(completion.ticket) == probe.write {
        format!("write {:#x}", probe.address)
    } else {
        format!("read {:#x}", probe.address)
    };
    println!("{}", render::completion(&label, completion));
    if Some(completion.ticket) == probe.read {
        if let Ok(Response::Data64(value)) = completion.outcome {
            if value != PROBE_MARKER {
                warn!("probe read back {value:#x}, expected {PROBE_MARKER:#x}");
            }
        }
    }
}

fn parse_u64(input: &str) -> Result<u64, String> {
    if let Some(stripped) = input.strip_prefix("0x") {
        u64::from_str_radix(stripped, 16).map_err(|_| format!("invalid hex value '{input}'"))
    } else {
        input
            .parse::<u64>()
            .map_err(|_| format!("invalid number '{input}'"))
    }
}
