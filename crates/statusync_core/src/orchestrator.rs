/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::codec;
use crate::config::SyncSettings;
use crate::http_retry::next_backoff;
use crate::ledger::{LedgerError, RemoteLedgerClient};
use crate::profile_db::ProfileStore;
use crate::record::SubscriptionRecord;
use crate::storage::PersistenceStore;
use crate::subscription_set::{storage_name, StatusUpdate, SubscriptionSet};
use crate::ui_events::{self, UiEvent};
use statusync_protocol::{
    AccountId, ActivityMarker, ChainId, FanOfHead, FanRequest, FanRequestMode, ProfileInfo,
    TransactionId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as TokioMutex, Notify};
use tracing::{debug, info, warn};

const MAX_SAVE_BACKOFF: Duration = Duration::from_secs(5);

/// Services an orchestrator talks to.
#[derive(Clone)]
pub struct SyncDeps {
    pub ledger: Arc<dyn RemoteLedgerClient>,
    pub profiles: Arc<dyn ProfileStore>,
    pub storage: Arc<dyn PersistenceStore>,
    /// Woken after a successful subscription change so the worker re-queries.
    pub refresh: Arc<Notify>,
    pub ui_events: broadcast::Sender<UiEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] LedgerError),
    #[error("saving {name} failed after {attempts} attempts: {message}")]
    Persist {
        name: String,
        attempts: u32,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("account {0} cannot follow itself")]
    SelfTarget(AccountId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

struct OrchestratorState {
    set: SubscriptionSet,
    /// Last fan-of version marker seen on the ledger.
    fan_of_head: Option<FanOfHead>,
}

/// Resets the flag when the guarded operation ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the subscriptions of one local account in sync with the ledger.
pub struct SyncOrchestrator {
    account_id: AccountId,
    chain_id: ChainId,
    deps: SyncDeps,
    settings: SyncSettings,
    state: TokioMutex<OrchestratorState>,
    views: watch::Sender<Arc<StatusUpdate>>,
    query_busy: AtomicBool,
    download_busy: AtomicBool,
    save_slot: TokioMutex<()>,
}

impl SyncOrchestrator {
    /// Restores the persisted state of `(account_id, chain_id)`. Anything that
    /// cannot be read back starts from an empty set.
    pub async fn load(
        account_id: AccountId,
        chain_id: ChainId,
        deps: SyncDeps,
        settings: SyncSettings,
    ) -> Self {
        let name = storage_name(account_id, chain_id);
        let restored = match deps.storage.read(&name).await {
            Ok(Some(bytes)) => match codec::decode(&bytes) {
                Ok(state) if state.set.account_id() == account_id && state.set.chain_id() == chain_id => {
                    info!(
                        account_id,
                        chain_id,
                        subscriptions = state.set.len(),
                        "restored subscriptions"
                    );
                    Some(OrchestratorState {
                        set: state.set,
                        fan_of_head: state.fan_of_head,
                    })
                }
                Ok(_) => {
                    warn!(account_id, chain_id, "stored subscriptions belong to another account, starting fresh");
                    None
                }
                Err(e) => {
                    warn!(account_id, chain_id, "stored subscriptions unreadable, starting fresh: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(account_id, chain_id, "reading stored subscriptions failed, starting fresh: {e:#}");
                None
            }
        };
        let state = restored.unwrap_or_else(|| OrchestratorState {
            set: SubscriptionSet::new(account_id, chain_id),
            fan_of_head: None,
        });

        let (views, _) = watch::channel(state.set.last_update());
        Self {
            account_id,
            chain_id,
            deps,
            settings,
            state: TokioMutex::new(state),
            views,
            query_busy: AtomicBool::new(false),
            download_busy: AtomicBool::new(false),
            save_slot: TokioMutex::new(()),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn last_update(&self) -> Arc<StatusUpdate> {
        self.views.borrow().clone()
    }

    pub fn subscribe_views(&self) -> watch::Receiver<Arc<StatusUpdate>> {
        self.views.subscribe()
    }

    pub async fn is_subscribed(&self, account_id: AccountId) -> bool {
        self.state.lock().await.set.is_subscribed(account_id)
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.state.lock().await.set.records()
    }

    pub async fn subscription(&self, account_id: AccountId) -> Option<SubscriptionRecord> {
        self.state.lock().await.set.record(account_id).cloned()
    }

    pub async fn last_processed_transaction_id(&self) -> TransactionId {
        self.state.lock().await.set.last_processed_transaction_id()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.set.batch_count()
    }

    /// Pulls the fan-of list when its version moved. Returns true when a
    /// subscription was added or removed. A call while another one is running
    /// does nothing.
    pub async fn query_subscriptions(&self) -> Result<bool, SyncError> {
        let Some(_busy) = BusyGuard::try_acquire(&self.query_busy) else {
            return Ok(false);
        };

        let head = self.deps.ledger.fan_of_head(self.chain_id, self.account_id).await?;
        let Some(head) = head else {
            return Ok(false);
        };
        {
            let state = self.state.lock().await;
            if let Some(last) = state.fan_of_head {
                if head.transaction_id <= last.transaction_id {
                    return Ok(false);
                }
            }
        }

        let snapshot = self.deps.ledger.fan_of(self.chain_id, self.account_id).await?;
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };

        let modified = {
            let mut state = self.state.lock().await;
            state.fan_of_head = Some(head);
            state.set.process_membership(&snapshot)
        };
        let profiled = self.resolve_missing_profiles().await;
        if modified || profiled {
            self.publish_views().await;
        }
        info!(
            account_id = self.account_id,
            chain_id = self.chain_id,
            head = head.transaction_id,
            modified,
            "fan-of list synced"
        );

        // The stored head moved even when membership did not.
        self.save().await?;
        Ok(modified)
    }

    /// Polls every batch once for new activity. Returns true when any record
    /// moved forward. A failing batch is skipped and stays stale until the
    /// next pass.
    pub async fn download_activity(&self) -> Result<bool, SyncError> {
        let Some(_busy) = BusyGuard::try_acquire(&self.download_busy) else {
            return Ok(false);
        };

        let mut modified = false;
        for index in 0usize.. {
            let (members, recently_checked) = {
                let state = self.state.lock().await;
                let Some(batch) = state.set.batch(index) else {
                    break;
                };
                let recent = self.settings.batch_recheck_ms > 0
                    && batch.checked_within(now_ms(), self.settings.batch_recheck_ms);
                (batch.members(), recent)
            };
            if members.is_empty() || recently_checked {
                continue;
            }

            match self
                .deps
                .ledger
                .batch_activity(self.chain_id, &members, self.settings.activity_index)
                .await
            {
                Ok(items) => {
                    let mut state = self.state.lock().await;
                    let changed = state.set.process_batch_result(index, &items, now_ms());
                    debug!(account_id = self.account_id, batch = index, changed, "batch polled");
                    modified |= changed;
                }
                Err(e) => {
                    warn!(account_id = self.account_id, batch = index, "batch activity query failed: {e}");
                }
            }
        }

        modified |= self.resolve_missing_profiles().await;
        if !modified {
            return Ok(false);
        }
        self.publish_views().await;
        self.save().await?;
        Ok(true)
    }

    /// Asks the ledger to add or remove `target` from the fan-of list. Local
    /// state only follows once the ledger reports the new list.
    pub async fn change_subscription(&self, target: AccountId, subscribe: bool) -> Result<(), CommandError> {
        if target == self.account_id {
            return Err(CommandError::SelfTarget(target));
        }
        let request = FanRequest {
            account_id: self.account_id,
            chain_id: self.chain_id,
            target_account_id: target,
            mode: if subscribe {
                FanRequestMode::AddFanOf
            } else {
                FanRequestMode::RemoveFanOf
            },
        };
        let res = self.deps.ledger.submit_fan_request(&request).await;
        match &res {
            Ok(()) => {
                info!(account_id = self.account_id, target, subscribe, "fan request accepted");
                self.deps.refresh.notify_one();
            }
            Err(e) => {
                warn!(account_id = self.account_id, target, subscribe, "fan request failed: {e}");
            }
        }
        let _ = self.deps.ui_events.send(UiEvent::subscription_changed(
            self.account_id,
            self.chain_id,
            target,
            subscribe,
            res.as_ref().err().map(|e| e.to_string()),
        ));
        res.map_err(CommandError::from)
    }

    /// Records that the user saw the activity of `account_id` up to `info`.
    /// Returns false when the marker is not newer than the last viewed one.
    pub async fn mark_as_viewed(&self, account_id: AccountId, info: ActivityMarker) -> Result<bool, SyncError> {
        let changed = self.state.lock().await.set.mark_viewed(account_id, info);
        if !changed {
            return Ok(false);
        }
        self.publish_views().await;
        self.save().await?;
        Ok(true)
    }

    pub async fn mark_viewed_transaction(
        &self,
        account_id: AccountId,
        transaction_id: TransactionId,
        timestamp: i64,
        count: i64,
    ) -> Result<bool, SyncError> {
        self.mark_as_viewed(account_id, ActivityMarker::new(transaction_id, timestamp, count))
            .await
    }

    /// Applies a freshly downloaded profile if it is newer than the cached one.
    pub async fn update_profile(&self, account_id: AccountId, profile: ProfileInfo) -> Result<bool, SyncError> {
        let changed = self.state.lock().await.set.update_profile(account_id, profile);
        if !changed {
            return Ok(false);
        }
        self.publish_views().await;
        self.save().await?;
        Ok(true)
    }

    async fn resolve_missing_profiles(&self) -> bool {
        let missing = self.state.lock().await.set.missing_profiles();
        let mut modified = false;
        for account_id in missing {
            if let Some(profile) = self.deps.profiles.cached_profile(account_id).await {
                modified |= self.state.lock().await.set.update_profile(account_id, profile);
            }
        }
        modified
    }

    async fn publish_views(&self) {
        let update = self.state.lock().await.set.last_update();
        self.views.send_replace(update);
        let _ = self.deps.ui_events.send(UiEvent::for_account(
            ui_events::VIEWS_UPDATED,
            self.account_id,
            self.chain_id,
        ));
    }

    /// Writes the current state. Saves never interleave; a failed write is
    /// retried with backoff before the error is handed to the caller.
    async fn save(&self) -> Result<(), SyncError> {
        let _slot = self.save_slot.lock().await;
        let attempts = self.settings.save_attempts.max(1);
        let mut backoff = self.settings.save_backoff;
        let mut last_err = None;

        for attempt in 1..=attempts {
            let (name, bytes) = {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                let name = state.set.storage_name().to_string();
                let bytes = codec::encode(&mut state.set, state.fan_of_head.as_ref(), now_ms());
                (name, bytes)
            };
            match self.deps.storage.write(&name, &bytes).await {
                Ok(()) => {
                    debug!(account_id = self.account_id, bytes = bytes.len(), "subscriptions saved");
                    return Ok(());
                }
                Err(e) => {
                    warn!(account_id = self.account_id, attempt, "saving subscriptions failed: {e:#}");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, MAX_SAVE_BACKOFF);
                    }
                }
            }
        }

        let message = last_err.map(|e| format!("{e:#}")).unwrap_or_default();
        let mut event = UiEvent::for_account(ui_events::SAVE_FAILED, self.account_id, self.chain_id);
        event.ok = Some(false);
        event.detail = Some(message.clone());
        let _ = self.deps.ui_events.send(event);
        Err(SyncError::Persist {
            name: storage_name(self.account_id, self.chain_id),
            attempts,
            message,
        })
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
