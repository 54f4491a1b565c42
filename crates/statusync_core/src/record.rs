/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use statusync_protocol::{AccountId, ActivityMarker, ProfileInfo};

/// Per followed account state.
///
/// `current` is the newest marker reported by the ledger, `last_viewed` the
/// newest one the user has seen. Once both are set `current` is never behind
/// `last_viewed`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionRecord {
    pub account_id: AccountId,
    pub profile: Option<ProfileInfo>,
    pub last_viewed: Option<ActivityMarker>,
    pub current: Option<ActivityMarker>,
}

impl SubscriptionRecord {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            profile: None,
            last_viewed: None,
            current: None,
        }
    }

    pub fn is_unread(&self) -> bool {
        match (&self.current, &self.last_viewed) {
            (Some(current), Some(viewed)) => current.transaction_id > viewed.transaction_id,
            _ => false,
        }
    }

    pub fn current_transaction_id(&self) -> Option<i64> {
        self.current.map(|c| c.transaction_id)
    }

    /// Applies a marker reported by the ledger. Stale or duplicate markers are
    /// ignored. The first sighting also seeds `last_viewed`.
    pub fn apply_current(&mut self, info: ActivityMarker) -> bool {
        if let Some(current) = &self.current {
            if info.transaction_id <= current.transaction_id {
                return false;
            }
        }
        self.current = Some(info);
        if self.last_viewed.is_none() {
            self.last_viewed = Some(info);
        }
        true
    }

    /// Records that the user has seen activity up to `info`.
    pub fn apply_viewed(&mut self, info: ActivityMarker) -> bool {
        if let Some(viewed) = &self.last_viewed {
            if info.transaction_id <= viewed.transaction_id {
                return false;
            }
        }
        self.last_viewed = Some(info);
        let raise = self
            .current
            .map(|c| c.transaction_id <= info.transaction_id)
            .unwrap_or(true);
        if raise {
            self.current = Some(info);
        }
        true
    }

    pub fn apply_profile(&mut self, profile: ProfileInfo) -> bool {
        let replace = match &self.profile {
            None => true,
            Some(existing) => profile.is_newer_than(existing),
        };
        if replace {
            self.profile = Some(profile);
        }
        replace
    }

    /// Re-establishes the marker invariant on state read back from storage.
    pub(crate) fn normalize(&mut self) {
        if let (Some(current), None) = (self.current, self.last_viewed) {
            self.last_viewed = Some(current);
        }
        if let (Some(current), Some(viewed)) = (self.current, self.last_viewed) {
            if viewed.transaction_id > current.transaction_id {
                self.current = Some(viewed);
            }
        }
    }
}
