/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::batch::SubscriptionBatch;
use crate::record::SubscriptionRecord;
use statusync_protocol::{
    AccountId, ActivityMarker, BatchActivityEntry, ChainId, FanOfSnapshot, ProfileInfo,
    TransactionId, INVALID_TRANSACTION_ID,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub const STORAGE_TAG: &str = "Subscriptions";

pub fn storage_name(account_id: AccountId, chain_id: ChainId) -> String {
    format!("{STORAGE_TAG}_{chain_id}_{account_id}")
}

/// Published pair of views: accounts with unread activity and accounts whose
/// latest activity was already seen. Both sorted newest first.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatusUpdate {
    pub recent: Vec<SubscriptionRecord>,
    pub viewed: Vec<SubscriptionRecord>,
}

/// All subscriptions of one local account on one chain.
///
/// `records` is authoritative. `recent` and `viewed` only hold account ids and
/// are re-derived through `sort_subscriptions`; together they partition the
/// records that have a current marker.
pub struct SubscriptionSet {
    account_id: AccountId,
    chain_id: ChainId,
    storage_name: String,
    last_saved_ms: i64,
    last_processed_transaction_id: TransactionId,
    records: HashMap<AccountId, SubscriptionRecord>,
    batches: Vec<SubscriptionBatch>,
    recent: Vec<AccountId>,
    viewed: Vec<AccountId>,
    last_update: Arc<StatusUpdate>,
}

impl SubscriptionSet {
    pub fn new(account_id: AccountId, chain_id: ChainId) -> Self {
        Self {
            account_id,
            chain_id,
            storage_name: storage_name(account_id, chain_id),
            last_saved_ms: 0,
            last_processed_transaction_id: INVALID_TRANSACTION_ID,
            records: HashMap::new(),
            batches: vec![SubscriptionBatch::new(0)],
            recent: Vec::new(),
            viewed: Vec::new(),
            last_update: Arc::new(StatusUpdate::default()),
        }
    }

    /// Rebuilds batches and views for state read back from storage.
    pub(crate) fn restore(
        account_id: AccountId,
        chain_id: ChainId,
        last_saved_ms: i64,
        last_processed_transaction_id: TransactionId,
        records: Vec<SubscriptionRecord>,
    ) -> Self {
        let mut set = Self::new(account_id, chain_id);
        set.last_saved_ms = last_saved_ms;
        set.last_processed_transaction_id = last_processed_transaction_id;

        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            record.normalize();
            ids.push(record.account_id);
            set.records.insert(record.account_id, record);
        }
        ids.sort_unstable();
        ids.dedup();
        for id in &ids {
            set.add_to_batch(*id);
        }
        let with_activity = ids
            .into_iter()
            .filter(|id| set.records.get(id).map(|r| r.current.is_some()).unwrap_or(false))
            .collect::<Vec<_>>();
        set.sort_subscriptions(&with_activity);
        set
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn last_saved_ms(&self) -> i64 {
        self.last_saved_ms
    }

    pub(crate) fn set_last_saved_ms(&mut self, ts: i64) {
        self.last_saved_ms = ts;
    }

    pub fn last_processed_transaction_id(&self) -> TransactionId {
        self.last_processed_transaction_id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_subscribed(&self, account_id: AccountId) -> bool {
        self.records.contains_key(&account_id)
    }

    pub fn record(&self, account_id: AccountId) -> Option<&SubscriptionRecord> {
        self.records.get(&account_id)
    }

    /// Every record, ordered by account id.
    pub fn records(&self) -> Vec<SubscriptionRecord> {
        let mut out = self.records.values().cloned().collect::<Vec<_>>();
        out.sort_by_key(|r| r.account_id);
        out
    }

    pub fn batch(&self, index: usize) -> Option<&SubscriptionBatch> {
        self.batches.get(index)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn recent_ids(&self) -> &[AccountId] {
        &self.recent
    }

    pub fn viewed_ids(&self) -> &[AccountId] {
        &self.viewed
    }

    pub fn last_update(&self) -> Arc<StatusUpdate> {
        self.last_update.clone()
    }

    /// Applies a fan-of snapshot. Snapshots not newer than the last processed
    /// one are ignored. Returns true when a subscription was added or removed.
    /// New records start without a profile; see [`Self::missing_profiles`].
    pub fn process_membership(&mut self, snapshot: &FanOfSnapshot) -> bool {
        let high_water_mark = snapshot.high_water_mark();
        if high_water_mark <= self.last_processed_transaction_id {
            return false;
        }

        let mut fans = HashSet::with_capacity(snapshot.fans.len());
        let mut added = Vec::new();
        for &fan_id in &snapshot.fans {
            if !fans.insert(fan_id) || self.records.contains_key(&fan_id) {
                continue;
            }
            self.records.insert(fan_id, SubscriptionRecord::new(fan_id));
            added.push(fan_id);
        }

        let removed = self
            .records
            .keys()
            .filter(|id| !fans.contains(*id))
            .copied()
            .collect::<Vec<_>>();
        for id in &removed {
            self.records.remove(id);
            for batch in self.batches.iter_mut() {
                if batch.remove(*id) {
                    break;
                }
            }
        }
        if !removed.is_empty() {
            self.drop_from_views(&removed);
        }

        for id in &added {
            self.add_to_batch(*id);
        }

        self.last_processed_transaction_id = high_water_mark;
        debug!(
            account_id = self.account_id,
            added = added.len(),
            removed = removed.len(),
            high_water_mark,
            "processed fan-of snapshot"
        );

        !added.is_empty() || !removed.is_empty()
    }

    fn add_to_batch(&mut self, account_id: AccountId) {
        if self.batches.iter().any(|b| b.contains(account_id)) {
            return;
        }
        for batch in self.batches.iter_mut() {
            if batch.try_add(account_id) {
                return;
            }
        }
        let mut batch = SubscriptionBatch::new(self.batches.len());
        batch.try_add(account_id);
        self.batches.push(batch);
    }

    /// Merges one batch of activity results. `results` follows the order of
    /// the batch members. Returns true when any record moved forward.
    pub fn process_batch_result(
        &mut self,
        batch_index: usize,
        results: &[BatchActivityEntry],
        now_ms: i64,
    ) -> bool {
        let Some(batch) = self.batches.get_mut(batch_index) else {
            return false;
        };
        let polled = results.iter().map(|e| e.account_id).collect::<HashSet<_>>();
        if batch.is_covered_by(&polled) {
            batch.mark_checked(now_ms);
        }

        let mut changed = Vec::new();
        for entry in results {
            let Some(info) = entry.info.filter(|_| entry.found) else {
                continue;
            };
            if let Some(record) = self.records.get_mut(&entry.account_id) {
                if record.apply_current(info) {
                    changed.push(entry.account_id);
                }
            }
        }

        if changed.is_empty() {
            return false;
        }
        self.sort_subscriptions(&changed);
        true
    }

    /// Moves the last viewed marker of `account_id` forward.
    pub fn mark_viewed(&mut self, account_id: AccountId, info: ActivityMarker) -> bool {
        let Some(record) = self.records.get_mut(&account_id) else {
            return false;
        };
        if !record.apply_viewed(info) {
            return false;
        }
        self.sort_subscriptions(&[account_id]);
        true
    }

    pub fn update_profile(&mut self, account_id: AccountId, profile: ProfileInfo) -> bool {
        let Some(record) = self.records.get_mut(&account_id) else {
            return false;
        };
        if !record.apply_profile(profile) {
            return false;
        }
        if record.current.is_some() {
            self.publish();
        }
        true
    }

    /// Accounts whose display profile is still unknown.
    pub fn missing_profiles(&self) -> Vec<AccountId> {
        let mut ids = self
            .records
            .values()
            .filter(|r| r.profile.is_none())
            .map(|r| r.account_id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Re-classifies `changed` into the recent or viewed view and re-sorts
    /// both views. Records without a current marker stay out of both.
    fn sort_subscriptions(&mut self, changed: &[AccountId]) {
        let changed_set = changed.iter().copied().collect::<HashSet<_>>();
        self.recent.retain(|id| !changed_set.contains(id));
        self.viewed.retain(|id| !changed_set.contains(id));

        let mut seen = HashSet::with_capacity(changed.len());
        for id in changed {
            if !seen.insert(*id) {
                continue;
            }
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if record.current.is_none() {
                continue;
            }
            if record.is_unread() {
                self.recent.push(*id);
            } else {
                self.viewed.push(*id);
            }
        }

        let records = &self.records;
        self.recent.sort_by(|a, b| newest_first(records, *a, *b));
        self.viewed.sort_by(|a, b| newest_first(records, *a, *b));

        self.publish();
    }

    fn drop_from_views(&mut self, ids: &[AccountId]) {
        let ids = ids.iter().copied().collect::<HashSet<_>>();
        let before = self.recent.len() + self.viewed.len();
        self.recent.retain(|id| !ids.contains(id));
        self.viewed.retain(|id| !ids.contains(id));
        if self.recent.len() + self.viewed.len() != before {
            self.publish();
        }
    }

    fn publish(&mut self) {
        let collect = |ids: &[AccountId]| {
            ids.iter()
                .filter_map(|id| self.records.get(id).cloned())
                .collect::<Vec<_>>()
        };
        let update = StatusUpdate {
            recent: collect(&self.recent),
            viewed: collect(&self.viewed),
        };
        self.last_update = Arc::new(update);
    }
}

fn newest_first(
    records: &HashMap<AccountId, SubscriptionRecord>,
    a: AccountId,
    b: AccountId,
) -> Ordering {
    let key = |id: AccountId| {
        records
            .get(&id)
            .and_then(|r| r.current_transaction_id())
            .unwrap_or(INVALID_TRANSACTION_ID)
    };
    key(b).cmp(&key(a)).then(a.cmp(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::MAX_BATCH_SIZE;
    use statusync_protocol::FanOfHead;

    fn snapshot(fans: &[AccountId], hwm: TransactionId) -> FanOfSnapshot {
        FanOfSnapshot {
            account_id: 1,
            fans: fans.to_vec(),
            last_transaction: FanOfHead {
                transaction_id: hwm,
                timestamp: 0,
            },
        }
    }

    fn marker(id: i64) -> ActivityMarker {
        ActivityMarker::new(id, 1000 + id, 5)
    }

    fn found(account_id: AccountId, id: i64) -> BatchActivityEntry {
        BatchActivityEntry {
            found: true,
            account_id,
            info: Some(marker(id)),
        }
    }

    fn assert_partition(set: &SubscriptionSet) {
        for record in set.records() {
            let in_recent = set.recent_ids().contains(&record.account_id);
            let in_viewed = set.viewed_ids().contains(&record.account_id);
            match record.current {
                None => assert!(!in_recent && !in_viewed),
                Some(_) => {
                    assert!(in_recent ^ in_viewed);
                    assert_eq!(in_recent, record.is_unread());
                }
            }
        }
        let update = set.last_update();
        assert_eq!(update.recent.len(), set.recent_ids().len());
        assert_eq!(update.viewed.len(), set.viewed_ids().len());
    }

    #[test]
    fn follow_view_and_mark_viewed_walkthrough() {
        let mut set = SubscriptionSet::new(1, 9);
        const A: AccountId = 100;

        assert!(set.process_membership(&snapshot(&[A], 10)));
        assert_eq!(set.last_processed_transaction_id(), 10);
        assert!(set.is_subscribed(A));
        assert!(set.batch(0).unwrap().contains(A));
        assert!(set.recent_ids().is_empty() && set.viewed_ids().is_empty());

        assert!(set.process_batch_result(0, &[found(A, 50)], 1));
        let rec = set.record(A).unwrap();
        assert_eq!(rec.current, Some(marker(50)));
        assert_eq!(rec.last_viewed, Some(marker(50)));
        assert_eq!(set.viewed_ids(), &[A]);
        assert!(set.recent_ids().is_empty());

        assert!(!set.mark_viewed(A, marker(40)));
        assert_eq!(set.record(A).unwrap().last_viewed, Some(marker(50)));

        assert!(set.process_batch_result(0, &[found(A, 70)], 2));
        assert_eq!(set.record(A).unwrap().last_viewed, Some(marker(50)));
        assert_eq!(set.recent_ids(), &[A]);
        assert!(set.viewed_ids().is_empty());
        assert_eq!(set.last_update().recent[0].account_id, A);

        assert!(set.mark_viewed(A, marker(70)));
        assert_eq!(set.viewed_ids(), &[A]);
        assert!(set.recent_ids().is_empty());
        assert_partition(&set);

        assert!(!set.process_membership(&snapshot(&[A], 10)));
        assert!(!set.process_membership(&snapshot(&[], 9)));
        assert!(set.is_subscribed(A));
    }

    #[test]
    fn membership_removal_drops_record_batch_and_views() {
        let mut set = SubscriptionSet::new(1, 9);
        set.process_membership(&snapshot(&[5, 6], 3));
        set.process_batch_result(0, &[found(5, 20), found(6, 30)], 1);
        assert_eq!(set.viewed_ids(), &[6, 5]);

        assert!(set.process_membership(&snapshot(&[6], 4)));
        assert!(!set.is_subscribed(5));
        assert!(!set.batch(0).unwrap().contains(5));
        assert_eq!(set.viewed_ids(), &[6]);
        assert_eq!(set.last_update().viewed.len(), 1);

        // An empty follow-set still advances the high-water mark.
        assert!(set.process_membership(&snapshot(&[], 8)));
        assert!(set.is_empty());
        assert_eq!(set.last_processed_transaction_id(), 8);
        assert!(set.viewed_ids().is_empty());
    }

    #[test]
    fn new_subscriptions_wait_for_profiles() {
        let mut set = SubscriptionSet::new(1, 9);
        set.process_membership(&snapshot(&[5, 6], 3));
        assert_eq!(set.missing_profiles(), vec![5, 6]);

        assert!(set.update_profile(5, ProfileInfo {
            account_id: 5,
            profile_transaction_id: 1,
            image_transaction_id: 1,
            profile_name: "five".to_string(),
            real_name: String::new(),
            bio: String::new(),
        }));
        assert_eq!(
            set.record(5).and_then(|r| r.profile.as_ref()).map(|p| p.profile_name.as_str()),
            Some("five")
        );
        assert_eq!(set.missing_profiles(), vec![6]);
    }

    #[test]
    fn batch_boundary_at_one_hundred() {
        let mut set = SubscriptionSet::new(1, 9);
        let fans = (1..=MAX_BATCH_SIZE as i64).collect::<Vec<_>>();
        set.process_membership(&snapshot(&fans, 1));
        assert_eq!(set.batch_count(), 1);
        assert_eq!(set.batch(0).unwrap().len(), 100);

        let mut more = fans.clone();
        more.push(101);
        set.process_membership(&snapshot(&more, 2));
        assert_eq!(set.batch_count(), 2);
        assert_eq!(set.batch(0).unwrap().len(), 100);
        assert!(set.batch(1).unwrap().contains(101));
        assert_eq!(set.batch(1).unwrap().index(), 1);
        assert!(set.batch(2).is_none());
    }

    #[test]
    fn freed_slot_is_reused_before_new_batch() {
        let mut set = SubscriptionSet::new(1, 9);
        let fans = (1..=101).collect::<Vec<_>>();
        set.process_membership(&snapshot(&fans, 1));
        set.process_batch_result(0, &[], 500);

        let mut next = fans.iter().copied().filter(|id| *id != 3).collect::<Vec<_>>();
        next.push(202);
        set.process_membership(&snapshot(&next, 2));
        assert!(set.batch(0).unwrap().contains(202));
        assert_eq!(set.batch(0).unwrap().last_checked_ms(), 0);
        assert_eq!(set.batch_count(), 2);
    }

    #[test]
    fn batch_results_are_monotonic() {
        let mut set = SubscriptionSet::new(1, 9);
        set.process_membership(&snapshot(&[5], 1));

        assert!(set.process_batch_result(0, &[found(5, 30)], 1));
        assert!(!set.process_batch_result(0, &[found(5, 30)], 2));
        assert!(!set.process_batch_result(0, &[found(5, 10)], 3));
        assert_eq!(set.record(5).unwrap().current_transaction_id(), Some(30));
        assert_eq!(set.batch(0).unwrap().last_checked_ms(), 3);

        let missing = BatchActivityEntry {
            found: false,
            account_id: 5,
            info: Some(marker(99)),
        };
        let unknown = found(77, 99);
        assert!(!set.process_batch_result(0, &[missing, unknown], 4));
        assert_eq!(set.record(5).unwrap().current_transaction_id(), Some(30));
        assert!(!set.process_batch_result(3, &[found(5, 99)], 5));
    }

    #[test]
    fn views_are_sorted_newest_first() {
        let mut set = SubscriptionSet::new(1, 9);
        set.process_membership(&snapshot(&[1, 2, 3, 4], 1));
        set.process_batch_result(0, &[found(1, 10), found(2, 40), found(3, 20), found(4, 30)], 1);
        assert_eq!(set.viewed_ids(), &[2, 4, 3, 1]);

        set.process_batch_result(0, &[found(1, 50), found(3, 45)], 2);
        assert_eq!(set.recent_ids(), &[1, 3]);
        assert_eq!(set.viewed_ids(), &[2, 4]);
        assert_partition(&set);

        let update = set.last_update();
        let recent = update.recent.iter().map(|r| r.account_id).collect::<Vec<_>>();
        assert_eq!(recent, vec![1, 3]);
    }

    #[test]
    fn batch_stays_due_when_a_member_joined_mid_poll() {
        let mut set = SubscriptionSet::new(1, 9);
        set.process_membership(&snapshot(&[5], 1));
        let polled = set.batch(0).unwrap().members();
        assert_eq!(polled, vec![5]);

        set.process_membership(&snapshot(&[5, 6], 2));
        assert_eq!(set.batch(0).unwrap().last_checked_ms(), 0);

        set.process_batch_result(0, &[found(5, 10)], 1_000);
        assert_eq!(set.batch(0).unwrap().last_checked_ms(), 0);
        assert!(!set.batch(0).unwrap().checked_within(2_000, 60_000));

        set.process_batch_result(0, &[found(5, 10), found(6, 11)], 3_000);
        assert_eq!(set.batch(0).unwrap().last_checked_ms(), 3_000);
    }

    #[test]
    fn restore_rebuilds_batches_and_views() {
        let mut a = SubscriptionRecord::new(1);
        a.current = Some(marker(20));
        a.last_viewed = Some(marker(10));
        let mut b = SubscriptionRecord::new(2);
        b.current = Some(marker(15));
        let c = SubscriptionRecord::new(3);

        let set = SubscriptionSet::restore(1, 9, 77, 12, vec![c, b, a]);
        assert_eq!(set.last_processed_transaction_id(), 12);
        assert_eq!(set.last_saved_ms(), 77);
        assert_eq!(set.batch(0).unwrap().members(), vec![1, 2, 3]);
        assert_eq!(set.recent_ids(), &[1]);
        assert_eq!(set.viewed_ids(), &[2]);
        assert_eq!(set.record(2).unwrap().last_viewed, Some(marker(15)));
        assert_partition(&set);
    }

    #[test]
    fn storage_name_is_keyed_by_chain_and_account() {
        assert_eq!(storage_name(42, 3), "Subscriptions_3_42");
        assert_eq!(SubscriptionSet::new(42, 3).storage_name(), "Subscriptions_3_42");
    }
}
