//! C ABI for hosts that drive a [`Session`] from another language.
//!
//! A handle returned by [`schemelet_session_new`] owns one session. Each
//! result string handed back by [`schemelet_session_run`] must be released
//! with [`schemelet_string_free`], and the handle with
//! [`schemelet_session_free`]. A handle must only be used from one thread
//! at a time.

use crate::error::ErrorKind;
use crate::session::Session;
use std::ffi::{CStr, CString, c_char};
use std::ptr;

#[unsafe(no_mangle)]
pub extern "C" fn schemelet_session_new() -> *mut Session {
    Box::into_raw(Box::new(Session::new()))
}

/// Runs one command and returns its printed result or error string.
///
/// Returns null when either pointer is null.
///
/// # Safety
///
/// `session` must be a live handle from [`schemelet_session_new`] and
/// `program` a NUL-terminated string valid for reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn schemelet_session_run(
    session: *mut Session,
    program: *const c_char,
) -> *mut c_char {
    if session.is_null() || program.is_null() {
        return ptr::null_mut();
    }
    let session = unsafe { &mut *session };
    let program = unsafe { CStr::from_ptr(program) };
    let output = match program.to_str() {
        Ok(source) => session.run_one(source),
        Err(err) => format!("{}: input is not valid UTF-8 ({})", ErrorKind::Syntax, err),
    };
    into_c_string(output)
}

fn into_c_string(output: String) -> *mut c_char {
    // Symbols may not contain NUL but the output is cut at one anyway.
    let mut bytes = output.into_bytes();
    if let Some(nul) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(nul);
    }
    match CString::new(bytes) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
///
/// `output` must be null or a string returned by [`schemelet_session_run`]
/// that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn schemelet_string_free(output: *mut c_char) {
    if !output.is_null() {
        drop(unsafe { CString::from_raw(output) });
    }
}

/// # Safety
///
/// `session` must be null or a handle from [`schemelet_session_new`] that
/// has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn schemelet_session_free(session: *mut Session) {
    if !session.is_null() {
        drop(unsafe { Box::from_raw(session) });
    }
}
