/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::load_config;
use crate::runtime;
use anyhow::Result;
use statusync_protocol::ProfileInfo;
use std::ffi::{c_char, c_int, CStr, CString};

fn set_err(out_err: *mut *mut c_char, msg: String) {
    if out_err.is_null() {
        return;
    }
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    unsafe {
        *out_err = c.into_raw();
    }
}

fn set_out(out: *mut *mut c_char, text: String) {
    let c = CString::new(text.replace('\0', " ")).unwrap_or_default();
    unsafe {
        *out = c.into_raw();
    }
}

/// 0 on success, 1 with the error written to `out_err` otherwise.
fn report<T>(res: Result<T>, out_err: *mut *mut c_char, on_ok: impl FnOnce(T)) -> c_int {
    match res {
        Ok(v) => {
            on_ok(v);
            0
        }
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            1
        }
    }
}

/// Starts an engine from a JSON config. Returns 0 and writes the handle on
/// success; on failure writes an error string to free with
/// `statusync_free_cstring`.
#[no_mangle]
pub extern "C" fn statusync_start(config_json: *const c_char, out_handle: *mut u64, out_err: *mut *mut c_char) -> c_int {
    if config_json.is_null() || out_handle.is_null() {
        set_err(out_err, "null argument".to_string());
        return 1;
    }
    let text = unsafe { CStr::from_ptr(config_json) }.to_string_lossy().to_string();
    let cfg = match load_config(&text) {
        Ok(v) => v,
        Err(e) => {
            set_err(out_err, format!("invalid config json: {e:#}"));
            return 2;
        }
    };
    match runtime::start(cfg) {
        Ok(handle) => {
            unsafe {
                *out_handle = handle;
            }
            0
        }
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            3
        }
    }
}

#[no_mangle]
pub extern "C" fn statusync_stop(handle: u64, out_err: *mut *mut c_char) -> c_int {
    match runtime::stop(handle) {
        Ok(()) => 0,
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            1
        }
    }
}

/// Asks the ledger to add (`subscribe != 0`) or remove `target` from the
/// fan-of list of the given account.
#[no_mangle]
pub extern "C" fn statusync_change_subscription(
    handle: u64,
    account_id: i64,
    chain_id: i32,
    target: i64,
    subscribe: c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    let res = runtime::change_subscription(handle, account_id, chain_id, target, subscribe != 0);
    report(res, out_err, |_| ())
}

/// Records a viewed marker. `out_changed` (optional) receives 1 when the
/// marker moved.
#[no_mangle]
pub extern "C" fn statusync_mark_viewed(
    handle: u64,
    account_id: i64,
    chain_id: i32,
    target: i64,
    transaction_id: i64,
    timestamp: i64,
    count: i64,
    out_changed: *mut c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    let res = runtime::mark_viewed(handle, account_id, chain_id, target, transaction_id, timestamp, count);
    report(res, out_err, |changed| {
        if !out_changed.is_null() {
            unsafe {
                *out_changed = c_int::from(changed);
            }
        }
    })
}

/// Applies a profile given as JSON to the cache and every follower.
#[no_mangle]
pub extern "C" fn statusync_update_profile(
    handle: u64,
    profile_json: *const c_char,
    out_changed: *mut c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    if profile_json.is_null() {
        set_err(out_err, "null argument".to_string());
        return 1;
    }
    let text = unsafe { CStr::from_ptr(profile_json) }.to_string_lossy().to_string();
    let res = serde_json::from_str::<ProfileInfo>(&text)
        .map_err(|e| anyhow::anyhow!("invalid profile json: {e}"))
        .and_then(|profile| runtime::update_profile(handle, profile));
    report(res, out_err, |changed| {
        if !out_changed.is_null() {
            unsafe {
                *out_changed = c_int::from(changed);
            }
        }
    })
}

/// Writes the current views of one account as JSON to `out_json`.
#[no_mangle]
pub extern "C" fn statusync_views_json(
    handle: u64,
    account_id: i64,
    chain_id: i32,
    out_json: *mut *mut c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    if out_json.is_null() {
        set_err(out_err, "null argument".to_string());
        return 1;
    }
    report(runtime::views_json(handle, account_id, chain_id), out_err, |json| set_out(out_json, json))
}

/// Takes up to `max` queued events as a JSON array.
#[no_mangle]
pub extern "C" fn statusync_poll_events(
    handle: u64,
    max: u32,
    out_json: *mut *mut c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    if out_json.is_null() {
        set_err(out_err, "null argument".to_string());
        return 1;
    }
    report(runtime::poll_events(handle, max as usize), out_err, |json| set_out(out_json, json))
}

#[no_mangle]
pub extern "C" fn statusync_free_cstring(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr));
    }
}
