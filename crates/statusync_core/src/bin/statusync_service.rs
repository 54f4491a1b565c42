/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use statusync_core::config::{default_config_path, load_config};
use statusync_core::runtime;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

const CONFIG_POLL: Duration = Duration::from_secs(2);

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn parse_config_path() -> Result<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok(PathBuf::from(path));
            }
            return Err(anyhow::anyhow!("--config requires a path"));
        }
    }
    if let Ok(path) = std::env::var("STATUSYNC_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    default_config_path()
}

/// Restarts the engine whenever the config file content changes.
#[derive(Default)]
struct Supervisor {
    handle: Option<u64>,
    running_hash: Option<u64>,
    rejected_hash: Option<u64>,
    missing_logged: bool,
}

impl Supervisor {
    fn poll(&mut self, cfg_path: &Path) {
        let text = match std::fs::read_to_string(cfg_path) {
            Ok(t) => t,
            Err(e) => {
                if !self.missing_logged {
                    warn!("config missing: {} ({e})", cfg_path.display());
                    self.missing_logged = true;
                }
                return;
            }
        };
        self.missing_logged = false;

        let hash = hash_text(&text);
        if self.running_hash == Some(hash) || self.rejected_hash == Some(hash) {
            return;
        }
        let cfg = match load_config(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("invalid config: {e:#}");
                self.rejected_hash = Some(hash);
                return;
            }
        };

        self.shutdown();
        match runtime::start(cfg) {
            Ok(h) => {
                info!(handle = h, "engine started");
                self.handle = Some(h);
                self.running_hash = Some(hash);
                self.rejected_hash = None;
            }
            Err(e) => {
                error!("failed to start engine: {e:#}");
                self.running_hash = None;
                self.rejected_hash = Some(hash);
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(h) = self.handle.take() {
            if let Err(e) = runtime::stop(h) {
                warn!(handle = h, "failed to stop engine: {e:#}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let cfg_path = parse_config_path()?;
    info!(config = %cfg_path.display(), "statusync service starting");

    let mut supervisor = Supervisor::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        supervisor.poll(&cfg_path);
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            _ = sleep(CONFIG_POLL) => {}
        }
    }

    supervisor.shutdown();
    Ok(())
}
