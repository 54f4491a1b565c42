/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::SyncConfig;
use crate::ledger::HttpLedgerClient;
use crate::manager::SyncManager;
use crate::orchestrator::{SyncDeps, SyncOrchestrator};
use crate::profile_db::ProfileDb;
use crate::storage::FileBlobStore;
use crate::ui_events::UiEvent;
use anyhow::{Context, Result};
use statusync_protocol::{AccountId, ActivityMarker, ChainId, ProfileInfo, TransactionId};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc, Arc, Mutex,
};
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info};

static HANDLE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Oldest events are dropped once a host stops polling.
const EVENT_QUEUE_CAP: usize = 512;

type EventQueue = Arc<Mutex<VecDeque<UiEvent>>>;

struct RunningEngine {
    shutdown_tx: watch::Sender<bool>,
    join: Option<thread::JoinHandle<()>>,
    rt: Handle,
    manager: Arc<SyncManager>,
    events: EventQueue,
}

static REGISTRY: Mutex<Vec<(u64, RunningEngine)>> = Mutex::new(Vec::new());

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();
}

/// Starts a sync engine on its own thread and runtime. Returns once the
/// stores are open; the handle is passed to the other functions here.
pub fn start(cfg: SyncConfig) -> Result<u64> {
    init_tracing();

    let handle = HANDLE_SEQ.fetch_add(1, Ordering::Relaxed);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = mpsc::channel();
    let events: EventQueue = Arc::new(Mutex::new(VecDeque::new()));
    let engine_events = events.clone();

    let join = thread::Builder::new()
        .name(format!("statusync-{handle}"))
        .spawn(move || run_engine(cfg, shutdown_rx, engine_events, ready_tx))
        .context("spawn engine thread")?;

    let (rt, manager) = match ready_rx.recv() {
        Ok(Ok(ready)) => ready,
        Ok(Err(e)) => {
            let _ = join.join();
            return Err(e);
        }
        Err(_) => {
            let _ = join.join();
            anyhow::bail!("engine thread exited during startup");
        }
    };

    let mut reg = lock_registry()?;
    reg.push((
        handle,
        RunningEngine {
            shutdown_tx,
            join: Some(join),
            rt,
            manager,
            events,
        },
    ));

    Ok(handle)
}

pub fn stop(handle: u64) -> Result<()> {
    let running = {
        let mut reg = lock_registry()?;
        let idx = reg
            .iter()
            .position(|(h, _)| *h == handle)
            .context("invalid handle")?;
        let (_, mut running) = reg.swap_remove(idx);
        let _ = running.shutdown_tx.send(true);
        running.join.take()
    };

    // In-flight ledger calls finish on their own; don't block the caller.
    if let Some(j) = running {
        thread::spawn(move || {
            let _ = j.join();
        });
    }
    Ok(())
}

fn lock_registry() -> Result<std::sync::MutexGuard<'static, Vec<(u64, RunningEngine)>>> {
    REGISTRY
        .lock()
        .map_err(|_| anyhow::anyhow!("engine registry poisoned"))
}

/// Copies what a command needs out of the registry so the lock is not held
/// while the command runs.
fn engine(handle: u64) -> Result<(Handle, Arc<SyncManager>, EventQueue)> {
    let reg = lock_registry()?;
    let (_, running) = reg
        .iter()
        .find(|(h, _)| *h == handle)
        .context("invalid handle")?;
    Ok((running.rt.clone(), running.manager.clone(), running.events.clone()))
}

fn orchestrator(manager: &SyncManager, account_id: AccountId, chain_id: ChainId) -> Result<Arc<SyncOrchestrator>> {
    manager
        .orchestrator(account_id, chain_id)
        .with_context(|| format!("unknown account {account_id} on chain {chain_id}"))
}

// The command functions block on the engine runtime and must be called from
// outside any async context.

pub fn change_subscription(
    handle: u64,
    account_id: AccountId,
    chain_id: ChainId,
    target: AccountId,
    subscribe: bool,
) -> Result<()> {
    let (rt, manager, _) = engine(handle)?;
    let o = orchestrator(&manager, account_id, chain_id)?;
    rt.block_on(o.change_subscription(target, subscribe))?;
    Ok(())
}

pub fn mark_viewed(
    handle: u64,
    account_id: AccountId,
    chain_id: ChainId,
    target: AccountId,
    transaction_id: TransactionId,
    timestamp: i64,
    count: i64,
) -> Result<bool> {
    let (rt, manager, _) = engine(handle)?;
    let o = orchestrator(&manager, account_id, chain_id)?;
    let info = ActivityMarker::new(transaction_id, timestamp, count);
    Ok(rt.block_on(o.mark_as_viewed(target, info))?)
}

pub fn update_profile(handle: u64, profile: ProfileInfo) -> Result<bool> {
    let (rt, manager, _) = engine(handle)?;
    Ok(rt.block_on(manager.update_profile(profile)))
}

/// Latest published views of one account as JSON.
pub fn views_json(handle: u64, account_id: AccountId, chain_id: ChainId) -> Result<String> {
    let (_, manager, _) = engine(handle)?;
    let o = orchestrator(&manager, account_id, chain_id)?;
    serde_json::to_string(&*o.last_update()).context("encode views")
}

/// Removes up to `max` queued events, oldest first, and returns them as a
/// JSON array.
pub fn poll_events(handle: u64, max: usize) -> Result<String> {
    let (_, _, events) = engine(handle)?;
    let batch = {
        let mut queue = events
            .lock()
            .map_err(|_| anyhow::anyhow!("event queue poisoned"))?;
        let n = max.min(queue.len());
        queue.drain(..n).collect::<Vec<_>>()
    };
    serde_json::to_string(&batch).context("encode events")
}

/// Wires the file store, profile cache and HTTP ledger client into a manager.
pub async fn build_manager(cfg: &SyncConfig, ui_events: broadcast::Sender<UiEvent>) -> Result<Arc<SyncManager>> {
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir: {}", data_dir.display()))?;
    info!("data dir: {}", data_dir.display());

    let storage = FileBlobStore::open(data_dir.join("subscriptions"))?;
    let profiles = ProfileDb::open(data_dir.join("profiles.db"))?;
    let ledger = HttpLedgerClient::new(&cfg.ledger)?;

    let deps = SyncDeps {
        ledger: Arc::new(ledger),
        profiles: Arc::new(profiles),
        storage: Arc::new(storage),
        refresh: Arc::new(Notify::new()),
        ui_events,
    };
    let manager = SyncManager::load(&cfg.accounts, deps, cfg.settings(), cfg.poll_interval()).await;
    Ok(Arc::new(manager))
}

fn push_event(events: &EventQueue, ev: UiEvent) {
    let Ok(mut queue) = events.lock() else {
        return;
    };
    if queue.len() >= EVENT_QUEUE_CAP {
        queue.pop_front();
    }
    queue.push_back(ev);
}

fn run_engine(
    cfg: SyncConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    events: EventQueue,
    ready: mpsc::Sender<Result<(Handle, Arc<SyncManager>)>>,
) {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    rt.block_on(async move {
        let (ui_tx, mut ui_rx) = broadcast::channel::<UiEvent>(256);
        let manager = match build_manager(&cfg, ui_tx).await {
            Ok(m) => m,
            Err(e) => {
                error!("sync engine failed: {e:#}");
                let _ = ready.send(Err(e));
                return;
            }
        };

        tokio::spawn(async move {
            loop {
                match ui_rx.recv().await {
                    Ok(ev) => {
                        debug!(kind = %ev.kind, account_id = ?ev.account_id, ok = ?ev.ok, "ui event");
                        push_event(&events, ev);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "ui events lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let worker = manager.clone().start_sync_worker(shutdown_rx.clone());
        info!(accounts = manager.orchestrators().len(), "sync engine running");
        let _ = ready.send(Ok((Handle::current(), manager.clone())));

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        let _ = worker.await;
        info!("sync engine stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    fn config_for(dir: &std::path::Path) -> SyncConfig {
        let text = serde_json::json!({
            "accounts": [{"account_id": 1, "chain_id": 4}, {"account_id": 2, "chain_id": 4}],
            "ledger": {"base_url": "http://127.0.0.1:9", "retry_attempts": 1},
            "data_dir": dir.to_string_lossy(),
        })
        .to_string();
        load_config(&text).unwrap()
    }

    #[tokio::test]
    async fn build_manager_creates_stores_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path());
        let (tx, _) = broadcast::channel(8);
        let manager = build_manager(&cfg, tx).await.unwrap();
        assert_eq!(manager.orchestrators().len(), 2);
        assert!(dir.path().join("subscriptions").is_dir());
        assert!(dir.path().join("profiles.db").exists());
    }

    #[test]
    fn start_and_stop_by_handle() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(config_for(dir.path())).unwrap();
        stop(handle).unwrap();
        assert!(stop(handle).is_err());
        assert!(views_json(handle, 1, 4).is_err());
    }

    #[test]
    fn start_fails_when_data_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("taken");
        std::fs::write(&file, b"x").unwrap();
        assert!(start(config_for(&file)).is_err());
    }

    #[test]
    fn commands_and_accessors_reach_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(config_for(dir.path())).unwrap();

        let views: serde_json::Value = serde_json::from_str(&views_json(handle, 1, 4).unwrap()).unwrap();
        assert_eq!(views["recent"], serde_json::json!([]));
        assert_eq!(views["viewed"], serde_json::json!([]));
        assert!(views_json(handle, 3, 4).is_err());

        let profile = ProfileInfo {
            account_id: 77,
            profile_transaction_id: 5,
            image_transaction_id: 5,
            profile_name: "seventy-seven".to_string(),
            real_name: String::new(),
            bio: String::new(),
        };
        assert!(update_profile(handle, profile.clone()).unwrap());
        assert!(!update_profile(handle, profile).unwrap());
        let db = ProfileDb::open(dir.path().join("profiles.db")).unwrap();
        assert_eq!(
            db.get_profile(77).unwrap().map(|p| p.profile_name),
            Some("seventy-seven".to_string())
        );

        // Nothing listens on the ledger port, and the account follows nobody.
        assert!(change_subscription(handle, 1, 4, 50, true).is_err());
        assert!(change_subscription(handle, 1, 4, 1, true).is_err());
        assert!(!mark_viewed(handle, 1, 4, 50, 9, 1_000, 1).unwrap());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut kinds = Vec::new();
        while !kinds.iter().any(|k| k == crate::ui_events::SUBSCRIPTION_CHANGED) {
            assert!(std::time::Instant::now() < deadline, "no subscription event");
            let batch: Vec<serde_json::Value> = serde_json::from_str(&poll_events(handle, 64).unwrap()).unwrap();
            kinds.extend(batch.iter().filter_map(|ev| ev["kind"].as_str().map(str::to_string)));
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(poll_events(handle, 0).unwrap(), "[]");

        stop(handle).unwrap();
    }

    #[test]
    fn event_queue_drops_oldest_when_full() {
        let events: EventQueue = Arc::new(Mutex::new(VecDeque::new()));
        for i in 0..EVENT_QUEUE_CAP + 3 {
            let mut ev = UiEvent::new(crate::ui_events::VIEWS_UPDATED);
            ev.ts_ms = i as u64;
            push_event(&events, ev);
        }
        let queue = events.lock().unwrap();
        assert_eq!(queue.len(), EVENT_QUEUE_CAP);
        assert_eq!(queue.front().map(|ev| ev.ts_ms), Some(3));
    }
}
