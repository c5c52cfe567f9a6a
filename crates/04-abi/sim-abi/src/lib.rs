//! C ABI for the endpoint simulator and the flit socket.
//!
//! Endpoints and sockets cross the boundary as boxed handles. Each handle wraps
//! its object in a mutex so a foreign caller may share one handle between
//! threads. Fallible calls signal failure through their return value and leave
//! a message behind for [`sim_last_error_message`]; see [`last_error`] for its
//! lifecycle. The declarations live in `include/omnixtend_endpoint_sim.h`.

mod error;
pub mod last_error;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use endpoint::{print_register, Endpoint, RegisterName, RegisterSnapshot};
use log::{trace, warn};
use parking_lot::Mutex;
use transport::Flit;
use transport_socket::Socket as FlitSocket;

pub use error::AbiError;
pub use last_error::{sim_last_error_length, sim_last_error_message};

/// Written to every output slot of a `*_next_flit` call that found no flit.
pub const NO_FLIT: u64 = u64::MAX;

/// Returned by operation calls that could not queue their request.
pub const NO_TICKET: u64 = u64::MAX;

/// Endpoint handle handed to C.
pub struct SimInfo {
    endpoint: Mutex<Endpoint>,
}

impl SimInfo {
    /// Register file of the wrapped endpoint, for Rust embedders.
    pub fn registers(&self) -> Arc<RegisterSnapshot> {
        self.endpoint.lock().registers()
    }
}

/// Socket handle handed to C.
pub struct Socket {
    socket: Mutex<FlitSocket>,
}

fn report<T>(result: Result<T, AbiError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            last_error::set(err);
            None
        }
    }
}

/// # Safety
///
/// `ptr` must be null or point to a live handle created by this crate.
unsafe fn handle<'a, T>(ptr: *const T, what: &'static str) -> Result<&'a T, AbiError> {
    ptr.as_ref().ok_or(AbiError::NullPointer(what))
}

/// Initialises `env_logger` from `RUST_LOG`. Safe to call more than once.
#[no_mangle]
pub extern "C" fn sim_init_logging() {
    match env_logger::try_init() {
        Ok(()) => trace!("logger initialised"),
        Err(_) => trace!("logger already initialised"),
    }
}

/// Creates endpoint `id`. Returns null and records an error on failure.
#[no_mangle]
pub extern "C" fn sim_new(id: usize, compat_mode: bool) -> *mut SimInfo {
    last_error::clear();
    let created = u8::try_from(id)
        .map_err(|_| AbiError::InvalidId(id))
        .and_then(|id| Ok(Endpoint::new(id, compat_mode)?));
    match report(created) {
        Some(endpoint) => Box::into_raw(Box::new(SimInfo {
            endpoint: Mutex::new(endpoint),
        })),
        None => ptr::null_mut(),
    }
}

/// Frees an endpoint. Refused while its execution thread has not been
/// observed stopped; the handle then stays valid.
///
/// # Safety
///
/// `sim` must be null or a live handle from [`sim_new`]. On success it is freed.
#[no_mangle]
pub unsafe extern "C" fn sim_destroy(sim: *mut SimInfo) -> bool {
    last_error::clear();
    let Some(info) = report(handle(sim, "endpoint")) else {
        return false;
    };
    if !info.endpoint.lock().can_destroy_thread() {
        last_error::set(AbiError::ThreadLive);
        return false;
    }
    let info = *Box::from_raw(sim);
    if let Err(endpoint) = info.endpoint.into_inner().destroy() {
        warn!("endpoint {} refused destruction", endpoint.config().id);
    }
    true
}

/// Pops one egress flit into `out` as `[value, last, mask]`. Returns false and
/// fills `out` with [`NO_FLIT`] when none is ready.
///
/// # Safety
///
/// `out` must be null or valid for writes; `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn sim_next_flit(out: *mut [u64; 3], sim: *const SimInfo) -> bool {
    last_error::clear();
    let Some(out) = out.as_mut() else {
        last_error::set(AbiError::NullPointer("flit output"));
        return false;
    };
    *out = [NO_FLIT; 3];
    let Some(info) = report(handle(sim, "endpoint")) else {
        return false;
    };
    match info.endpoint.lock().next_flit() {
        Some(flit) => {
            *out = [flit.value, u64::from(flit.last), u64::from(flit.lane_mask)];
            true
        }
        None => false,
    }
}

/// Queues one ingress flit. Never blocks.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn sim_push_flit(sim: *const SimInfo, value: u64, last: bool, mask: u8) {
    last_error::clear();
    if let Some(info) = report(handle(sim, "endpoint")) {
        info.endpoint.lock().push_flit(Flit::new(value, last, mask));
    }
}

/// Runs one tick on the calling thread. Fails while a worker owns the endpoint.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn sim_tick(sim: *const SimInfo) -> bool {
    last_error::clear();
    report(handle(sim, "endpoint").and_then(|info| Ok(info.endpoint.lock().tick()?))).is_some()
}

/// Starts the connection handshake.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn sim_connect(sim: *const SimInfo) -> bool {
    last_error::clear();
    report(handle(sim, "endpoint").and_then(|info| Ok(info.endpoint.lock().connect()?))).is_some()
}

/// Starts an orderly close. Fails in compatibility mode.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn sim_close(sim: *const SimInfo) -> bool {
    last_error::clear();
    report(handle(sim, "endpoint").and_then(|info| Ok(info.endpoint.lock().close()?))).is_some()
}

/// Queues a masked write of `len` bytes from `data` to the peer at `address`.
/// Returns the operation's ticket, or [`NO_TICKET`] when it was refused.
///
/// # Safety
///
/// `sim` must be null or a live handle; `data` must be null or valid for
/// reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sim_write_partial(
    sim: *const SimInfo,
    address: u64,
    data: *const u8,
    len: usize,
) -> u64 {
    last_error::clear();
    let queued = handle(sim, "endpoint").and_then(|info| {
        if data.is_null() {
            return Err(AbiError::NullPointer("write data"));
        }
        let bytes = std::slice::from_raw_parts(data, len);
        Ok(info.endpoint.lock().write_partial(address, bytes)?)
    });
    report(queued).map_or(NO_TICKET, |ticket| ticket.0)
}

/// Logs and prints `Reg NAME: value`.
#[no_mangle]
pub extern "C" fn sim_print_reg(name: u64, value: u64) {
    last_error::clear();
    report(print_register(RegisterName::from_raw(name), value).map_err(AbiError::from));
}

/// Moves the endpoint onto its execution thread. A no-op when already running.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn start_execution_thread(sim: *const SimInfo) {
    last_error::clear();
    report(handle(sim, "endpoint").and_then(|info| Ok(info.endpoint.lock().start_thread()?)));
}

/// Asks the execution thread to stop. Returns immediately.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn stop_execution_thread(sim: *const SimInfo) {
    last_error::clear();
    if let Some(info) = report(handle(sim, "endpoint")) {
        info.endpoint.lock().stop_thread();
    }
}

/// True once the execution thread has exited and may be destroyed.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn can_destroy_execution_thread(sim: *const SimInfo) -> bool {
    last_error::clear();
    report(handle(sim, "endpoint"))
        .map(|info| info.endpoint.lock().can_destroy_thread())
        .unwrap_or(false)
}

/// Joins a stopped execution thread and returns the endpoint to manual ticking.
///
/// # Safety
///
/// `sim` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn destroy_execution_thread(sim: *const SimInfo) -> bool {
    last_error::clear();
    report(handle(sim, "endpoint").and_then(|info| Ok(info.endpoint.lock().destroy_thread()?)))
        .is_some()
}

/// Creates a socket from a NUL-terminated option string. Returns null and
/// records an error on failure.
///
/// # Safety
///
/// `options` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn socket_new(options: *const c_char) -> *mut Socket {
    last_error::clear();
    if options.is_null() {
        last_error::set(AbiError::NullPointer("socket options"));
        return ptr::null_mut();
    }
    let blob = CStr::from_ptr(options).to_bytes();
    match report(FlitSocket::new(blob).map_err(AbiError::from)) {
        Some(socket) => Box::into_raw(Box::new(Socket {
            socket: Mutex::new(socket),
        })),
        None => ptr::null_mut(),
    }
}

/// Closes and frees a socket.
///
/// # Safety
///
/// `sock` must be null or a live handle from [`socket_new`]; it is freed.
#[no_mangle]
pub unsafe extern "C" fn socket_destroy(sock: *mut Socket) {
    last_error::clear();
    if sock.is_null() {
        last_error::set(AbiError::NullPointer("socket"));
        return;
    }
    let sock = *Box::from_raw(sock);
    sock.socket.into_inner().destroy();
}

/// False once the socket's transport failed or was closed.
///
/// # Safety
///
/// `sock` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn socket_active(sock: *const Socket) -> bool {
    last_error::clear();
    report(handle(sock, "socket"))
        .map(|sock| sock.socket.lock().active())
        .unwrap_or(false)
}

/// Pops one received flit into `out` as `[stream, value, last, mask]`.
/// Returns false and fills `out` with [`NO_FLIT`] when none is ready.
///
/// # Safety
///
/// `out` must be null or valid for writes; `sock` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn socket_next_flit(out: *mut [u64; 4], sock: *const Socket) -> bool {
    last_error::clear();
    let Some(out) = out.as_mut() else {
        last_error::set(AbiError::NullPointer("flit output"));
        return false;
    };
    *out = [NO_FLIT; 4];
    let Some(sock) = report(handle(sock, "socket")) else {
        return false;
    };
    match sock.socket.lock().next_flit() {
        Some((stream, flit)) => {
            *out = [
                u64::from(stream.0),
                flit.value,
                u64::from(flit.last),
                u64::from(flit.lane_mask),
            ];
            true
        }
        None => false,
    }
}

/// Adds one flit to the outgoing frame; the frame is sent on `last`.
///
/// # Safety
///
/// `sock` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn socket_push_flit(sock: *const Socket, value: u64, last: bool, mask: u8) {
    last_error::clear();
    if let Some(sock) = report(handle(sock, "socket")) {
        sock.socket.lock().push_flit(Flit::new(value, last, mask));
    }
}
