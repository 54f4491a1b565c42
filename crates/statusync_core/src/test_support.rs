/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory stand-ins for the ledger, the profile cache and blob storage.

use crate::ledger::{LedgerError, RemoteLedgerClient};
use crate::profile_db::ProfileStore;
use crate::storage::PersistenceStore;
use anyhow::Result;
use async_trait::async_trait;
use statusync_protocol::{
    AccountId, ActivityMarker, BatchActivityEntry, ChainId, FanOfHead, FanOfSnapshot, FanRequest,
    ProfileInfo, TransactionId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct MemoryProfiles {
    profiles: Mutex<HashMap<AccountId, ProfileInfo>>,
}

impl MemoryProfiles {
    pub(crate) fn insert(&self, profile: ProfileInfo) {
        self.profiles.lock().unwrap().insert(profile.account_id, profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn cached_profile(&self, account_id: AccountId) -> Option<ProfileInfo> {
        self.profiles.lock().unwrap().get(&account_id).cloned()
    }

    async fn store_profile(&self, profile: &ProfileInfo) -> Result<bool> {
        let mut profiles = self.profiles.lock().unwrap();
        let newer = profiles
            .get(&profile.account_id)
            .map(|p| profile.is_newer_than(p))
            .unwrap_or(true);
        if newer {
            profiles.insert(profile.account_id, profile.clone());
        }
        Ok(newer)
    }
}

#[derive(Default)]
struct LedgerState {
    fans: Vec<AccountId>,
    head: Option<TransactionId>,
    activity: HashMap<AccountId, ActivityMarker>,
    failing_accounts: HashSet<AccountId>,
    unavailable: bool,
    reject_requests: bool,
    requests: Vec<FanRequest>,
    head_gate: Option<Arc<Notify>>,
    batch_gate: Option<Arc<Notify>>,
}

/// Scriptable ledger. Every account in `fans` of any local account follows
/// the same list.
#[derive(Default)]
pub(crate) struct FakeLedger {
    state: Mutex<LedgerState>,
    head_calls: AtomicUsize,
    fan_of_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl FakeLedger {
    pub(crate) fn set_fans(&self, fans: &[AccountId], head: TransactionId) {
        let mut st = self.state.lock().unwrap();
        st.fans = fans.to_vec();
        st.head = Some(head);
    }

    pub(crate) fn set_activity(&self, account_id: AccountId, marker: ActivityMarker) {
        self.state.lock().unwrap().activity.insert(account_id, marker);
    }

    /// Any batch containing `account_id` fails as a whole.
    pub(crate) fn fail_batches_containing(&self, account_id: AccountId) {
        self.state.lock().unwrap().failing_accounts.insert(account_id);
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub(crate) fn reject_fan_requests(&self, reject: bool) {
        self.state.lock().unwrap().reject_requests = reject;
    }

    /// Makes head lookups wait until the returned gate is notified.
    pub(crate) fn hold_heads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().head_gate = Some(gate.clone());
        gate
    }

    /// Makes the next batch query wait until the returned gate is notified.
    pub(crate) fn hold_batches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().batch_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn requests(&self) -> Vec<FanRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fan_of_calls(&self) -> usize {
        self.fan_of_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.state.lock().unwrap().unavailable {
            return Err(LedgerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLedgerClient for FakeLedger {
    async fn fan_of_head(
        &self,
        _chain_id: ChainId,
        _account_id: AccountId,
    ) -> Result<Option<FanOfHead>, LedgerError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lock().unwrap().head_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_available()?;
        let head = self.state.lock().unwrap().head;
        Ok(head.map(|transaction_id| FanOfHead {
            transaction_id,
            timestamp: 0,
        }))
    }

    async fn fan_of(
        &self,
        _chain_id: ChainId,
        account_id: AccountId,
    ) -> Result<Option<FanOfSnapshot>, LedgerError> {
        self.fan_of_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let st = self.state.lock().unwrap();
        Ok(st.head.map(|transaction_id| FanOfSnapshot {
            account_id,
            fans: st.fans.clone(),
            last_transaction: FanOfHead {
                transaction_id,
                timestamp: 0,
            },
        }))
    }

    async fn batch_activity(
        &self,
        _chain_id: ChainId,
        accounts: &[AccountId],
        _activity_index: u16,
    ) -> Result<Vec<BatchActivityEntry>, LedgerError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lock().unwrap().batch_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_available()?;
        let st = self.state.lock().unwrap();
        if accounts.iter().any(|id| st.failing_accounts.contains(id)) {
            return Err(LedgerError::Unavailable("batch timed out".to_string()));
        }
        Ok(accounts
            .iter()
            .map(|id| {
                let info = st.activity.get(id).copied();
                BatchActivityEntry {
                    found: info.is_some(),
                    account_id: *id,
                    info,
                }
            })
            .collect())
    }

    async fn submit_fan_request(&self, request: &FanRequest) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut st = self.state.lock().unwrap();
        st.requests.push(request.clone());
        if st.reject_requests {
            return Err(LedgerError::Rejected {
                code: 3,
                message: "not allowed".to_string(),
            });
        }
        Ok(())
    }
}

/// Blob store whose writes can be made to fail a given number of times or to
/// take a while. Tracks how many writes overlapped.
#[derive(Default)]
pub(crate) struct FlakyStore {
    failures_left: AtomicUsize,
    writes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Mutex<Duration>,
    last: Mutex<Option<Vec<u8>>>,
}

impl FlakyStore {
    pub(crate) fn failing(times: usize) -> Self {
        let store = Self::default();
        store.fail_next(times);
        store
    }

    pub(crate) fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub(crate) fn slow(delay: Duration) -> Self {
        let store = Self::default();
        *store.write_delay.lock().unwrap() = delay;
        store
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn stored(&self) -> Option<Vec<u8>> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceStore for FlakyStore {
    async fn read(&self, _name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.stored())
    }

    async fn write(&self, _name: &str, data: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("disk full");
        }
        *self.last.lock().unwrap() = Some(data.to_vec());
        Ok(())
    }
}
