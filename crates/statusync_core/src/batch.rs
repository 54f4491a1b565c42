/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use statusync_protocol::AccountId;
use std::collections::{BTreeSet, HashSet};

pub const MAX_BATCH_SIZE: usize = 100;

/// Group of followed accounts polled with a single ledger round trip.
#[derive(Debug, Clone)]
pub struct SubscriptionBatch {
    index: usize,
    last_checked_ms: i64,
    members: BTreeSet<AccountId>,
}

impl SubscriptionBatch {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            last_checked_ms: 0,
            members: BTreeSet::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn last_checked_ms(&self) -> i64 {
        self.last_checked_ms
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_BATCH_SIZE
    }

    pub fn contains(&self, account_id: AccountId) -> bool {
        self.members.contains(&account_id)
    }

    /// Member ids in ascending order; batch results are aligned to this order.
    pub fn members(&self) -> Vec<AccountId> {
        self.members.iter().copied().collect()
    }

    pub fn mark_checked(&mut self, now_ms: i64) {
        self.last_checked_ms = now_ms;
    }

    /// Adds a member unless the batch is full. A change in membership forces
    /// the batch to be polled on the next pass.
    pub fn try_add(&mut self, account_id: AccountId) -> bool {
        if self.is_full() {
            return false;
        }
        if self.members.insert(account_id) {
            self.last_checked_ms = 0;
        }
        true
    }

    pub fn remove(&mut self, account_id: AccountId) -> bool {
        let removed = self.members.remove(&account_id);
        if removed {
            self.last_checked_ms = 0;
        }
        removed
    }

    /// True when every current member is in `polled`. A member added while a
    /// poll was in flight is not, and keeps the batch due.
    pub fn is_covered_by(&self, polled: &HashSet<AccountId>) -> bool {
        self.members.iter().all(|id| polled.contains(id))
    }

    /// True when the batch was polled less than `min_interval_ms` ago.
    pub fn checked_within(&self, now_ms: i64, min_interval_ms: i64) -> bool {
        self.last_checked_ms > 0 && now_ms.saturating_sub(self.last_checked_ms) < min_interval_ms
    }
}
