/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use statusync_protocol::{AccountId, ChainId};

pub const QUERY_START: &str = "query_start";
pub const QUERY_END: &str = "query_end";
pub const SUBSCRIPTION_CHANGED: &str = "subscription_changed";
pub const VIEWS_UPDATED: &str = "views_updated";
pub const SAVE_FAILED: &str = "save_failed";

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Debug, Serialize)]
pub struct UiEvent {
    pub kind: String,
    pub ts_ms: u64,
    pub account_id: Option<AccountId>,
    pub chain_id: Option<ChainId>,
    /// Followed account a command was about.
    pub target_account_id: Option<AccountId>,
    pub ok: Option<bool>,
    pub detail: Option<String>,
}

impl UiEvent {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ts_ms: now_ms_u64(),
            account_id: None,
            chain_id: None,
            target_account_id: None,
            ok: None,
            detail: None,
        }
    }

    pub fn for_account(kind: &str, account_id: AccountId, chain_id: ChainId) -> Self {
        Self {
            account_id: Some(account_id),
            chain_id: Some(chain_id),
            ..Self::new(kind)
        }
    }

    pub fn subscription_changed(
        account_id: AccountId,
        chain_id: ChainId,
        target: AccountId,
        subscribe: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            target_account_id: Some(target),
            ok: Some(error.is_none()),
            detail: Some(match error {
                Some(e) => e,
                None if subscribe => "subscribed".to_string(),
                None => "unsubscribed".to_string(),
            }),
            ..Self::for_account(SUBSCRIPTION_CHANGED, account_id, chain_id)
        }
    }
}
