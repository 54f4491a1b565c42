/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type ChainId = i32;
pub type TransactionId = i64;

/// Never assigned to a real ledger transaction.
pub const INVALID_TRANSACTION_ID: TransactionId = -1;

/// Most recent known activity of an account on the ledger.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ActivityMarker {
    pub transaction_id: TransactionId,
    pub timestamp: i64,
    pub count: i64,
}

impl ActivityMarker {
    pub fn new(transaction_id: TransactionId, timestamp: i64, count: i64) -> Self {
        Self {
            transaction_id,
            timestamp,
            count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub account_id: AccountId,
    pub profile_transaction_id: TransactionId,
    pub image_transaction_id: TransactionId,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub bio: String,
}

impl ProfileInfo {
    /// A profile supersedes another when either of its version ids moved forward.
    pub fn is_newer_than(&self, other: &ProfileInfo) -> bool {
        self.profile_transaction_id > other.profile_transaction_id
            || self.image_transaction_id > other.image_transaction_id
    }
}

/// Version marker of an account's fan-of list.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FanOfHead {
    pub transaction_id: TransactionId,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FanOfSnapshot {
    pub account_id: AccountId,
    pub fans: Vec<AccountId>,
    pub last_transaction: FanOfHead,
}

impl FanOfSnapshot {
    pub fn high_water_mark(&self) -> TransactionId {
        self.last_transaction.transaction_id
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchActivityRequest {
    pub chain_id: ChainId,
    pub activity_index: u16,
    pub accounts: Vec<AccountId>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BatchActivityEntry {
    pub found: bool,
    pub account_id: AccountId,
    #[serde(default)]
    pub info: Option<ActivityMarker>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchActivityResponse {
    pub items: Vec<BatchActivityEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FanRequestMode {
    AddFanOf,
    RemoveFanOf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FanRequest {
    pub account_id: AccountId,
    pub chain_id: ChainId,
    pub target_account_id: AccountId,
    pub mode: FanRequestMode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FanRequestResponse {
    pub ok: bool,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}
