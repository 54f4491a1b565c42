/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::ffi::{c_char, CString};

pub mod batch;
pub mod codec;
pub mod config;
mod ffi;
pub mod http_retry;
pub mod ledger;
pub mod manager;
pub mod orchestrator;
pub mod profile_db;
pub mod record;
pub mod runtime;
pub mod storage;
pub mod subscription_set;
pub mod ui_events;

#[cfg(test)]
pub(crate) mod test_support;

pub use manager::SyncManager;
pub use orchestrator::{CommandError, SyncDeps, SyncError, SyncOrchestrator};
pub use subscription_set::{StatusUpdate, SubscriptionSet};

#[no_mangle]
pub extern "C" fn statusync_version() -> *mut c_char {
    CString::new(env!("CARGO_PKG_VERSION"))
        .unwrap_or_default()
        .into_raw()
}
