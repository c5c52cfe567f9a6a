//! Per-thread storage for the most recent ABI failure.
//!
//! Every fallible entry point clears the slot on entry and fills it only when
//! it fails, so the message always describes the latest call on this thread.
//! Reading never consumes it.

use std::cell::RefCell;
use std::fmt::Display;
use std::os::raw::{c_char, c_int};
use std::ptr;

use log::warn;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn clear() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

pub(crate) fn set(err: impl Display) {
    let message = err.to_string();
    warn!("ABI call failed: {message}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Current message, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

fn clamp(len: usize) -> c_int {
    c_int::try_from(len).unwrap_or(c_int::MAX)
}

/// Byte length of the last error message without any terminator, 0 if none.
#[no_mangle]
pub extern "C" fn sim_last_error_length() -> c_int {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |message| clamp(message.len())))
}

/// Copies the last error message into `buffer` as UTF-8.
///
/// Returns the number of message bytes written, appending a NUL when the
/// buffer has room for it. Returns -1 for a null buffer, 0 when there is no
/// error, and -1 without touching the buffer when it is shorter than the
/// message.
///
/// # Safety
///
/// `buffer` must be null or valid for writes of `length` bytes.
#[no_mangle]
pub unsafe extern "C" fn sim_last_error_message(buffer: *mut c_char, length: c_int) -> c_int {
    if buffer.is_null() {
        return -1;
    }
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(message) = slot.as_ref() else {
            return 0;
        };
        let capacity = usize::try_from(length).unwrap_or(0);
        if capacity < message.len() {
            return -1;
        }
        let out = buffer.cast::<u8>();
        ptr::copy_nonoverlapping(message.as_ptr(), out, message.len());
        if capacity > message.len() {
            *out.add(message.len()) = 0;
        }
        clamp(message.len())
    })
}
