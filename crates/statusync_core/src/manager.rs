/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::{AccountConfig, SyncSettings};
use crate::orchestrator::{SyncDeps, SyncOrchestrator};
use crate::profile_db::ProfileStore;
use crate::ui_events::{self, UiEvent};
use statusync_protocol::{AccountId, ChainId, ProfileInfo};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives every configured account through query and download passes.
pub struct SyncManager {
    orchestrators: Vec<Arc<SyncOrchestrator>>,
    profiles: Arc<dyn ProfileStore>,
    refresh: Arc<Notify>,
    ui_events: broadcast::Sender<UiEvent>,
    poll_interval: Duration,
}

impl SyncManager {
    pub async fn load(
        accounts: &[AccountConfig],
        deps: SyncDeps,
        settings: SyncSettings,
        poll_interval: Duration,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut orchestrators = Vec::with_capacity(accounts.len());
        for acct in accounts {
            if !seen.insert((acct.account_id, acct.chain_id)) {
                warn!(account_id = acct.account_id, chain_id = acct.chain_id, "duplicate account in config");
                continue;
            }
            let o = SyncOrchestrator::load(acct.account_id, acct.chain_id, deps.clone(), settings).await;
            orchestrators.push(Arc::new(o));
        }
        Self {
            orchestrators,
            profiles: deps.profiles,
            refresh: deps.refresh,
            ui_events: deps.ui_events,
            poll_interval,
        }
    }

    pub fn orchestrators(&self) -> &[Arc<SyncOrchestrator>] {
        &self.orchestrators
    }

    pub fn orchestrator(&self, account_id: AccountId, chain_id: ChainId) -> Option<Arc<SyncOrchestrator>> {
        self.orchestrators
            .iter()
            .find(|o| o.account_id() == account_id && o.chain_id() == chain_id)
            .cloned()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_events.subscribe()
    }

    /// Caches `profile` and hands it to every account that follows its
    /// owner. Returns true when the cache or any subscription changed.
    pub async fn update_profile(&self, profile: ProfileInfo) -> bool {
        let mut changed = match self.profiles.store_profile(&profile).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(account_id = profile.account_id, "profile cache write failed: {e:#}");
                false
            }
        };
        for o in &self.orchestrators {
            match o.update_profile(profile.account_id, profile.clone()).await {
                Ok(modified) => changed |= modified,
                Err(e) => warn!(account_id = o.account_id(), chain_id = o.chain_id(), "profile update failed: {e}"),
            }
        }
        changed
    }

    /// One full pass: membership first for everybody, then activity. Returns
    /// true when any account changed.
    pub async fn query_all(&self) -> bool {
        let _ = self.ui_events.send(UiEvent::new(ui_events::QUERY_START));
        let mut changed = false;

        for o in &self.orchestrators {
            match o.query_subscriptions().await {
                Ok(modified) => changed |= modified,
                Err(e) => warn!(account_id = o.account_id(), chain_id = o.chain_id(), "subscription query failed: {e}"),
            }
        }
        for o in &self.orchestrators {
            match o.download_activity().await {
                Ok(modified) => changed |= modified,
                Err(e) => warn!(account_id = o.account_id(), chain_id = o.chain_id(), "activity download failed: {e}"),
            }
        }

        let mut end = UiEvent::new(ui_events::QUERY_END);
        end.ok = Some(changed);
        let _ = self.ui_events.send(end);
        changed
    }

    /// Runs a pass now, then on every tick or refresh request, until
    /// `shutdown` turns true.
    pub fn start_sync_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                accounts = self.orchestrators.len(),
                interval_secs = self.poll_interval.as_secs(),
                "sync worker started"
            );

            loop {
                tokio::select! {
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() { break; }
                        continue;
                    }
                    _ = tick.tick() => {}
                    _ = self.refresh.notified() => {
                        debug!("refresh requested");
                    }
                }

                if *shutdown.borrow() {
                    break;
                }
                self.query_all().await;
            }
            info!("sync worker stopped");
        })
    }
}
