/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use statusync_protocol::{AccountId, ChainId};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AccountConfig {
    #[serde(alias = "accountId")]
    pub account_id: AccountId,
    #[serde(alias = "chainId")]
    pub chain_id: ChainId,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LedgerConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "httpTimeoutSecs")]
    pub http_timeout_secs: Option<u64>,
    #[serde(default, alias = "retryAttempts")]
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SyncConfig {
    pub accounts: Vec<AccountConfig>,
    pub ledger: LedgerConfig,
    #[serde(default, alias = "dataDir")]
    pub data_dir: Option<String>,
    /// Seconds between two full polling passes.
    #[serde(default, alias = "pollIntervalSecs")]
    pub poll_interval_secs: Option<u64>,
    /// Skip batches polled less than this many seconds ago. 0 polls every
    /// batch on every pass.
    #[serde(default, alias = "batchRecheckSecs")]
    pub batch_recheck_secs: Option<u64>,
    #[serde(default, alias = "saveAttempts")]
    pub save_attempts: Option<u32>,
    #[serde(default, alias = "saveBackoffMs")]
    pub save_backoff_ms: Option<u64>,
    /// Ledger index holding the followed accounts' status messages.
    #[serde(default, alias = "activityIndex")]
    pub activity_index: Option<u16>,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(60).clamp(5, 3600))
    }

    pub fn settings(&self) -> SyncSettings {
        let defaults = SyncSettings::default();
        SyncSettings {
            batch_recheck_ms: self
                .batch_recheck_secs
                .map(|s| s.saturating_mul(1000) as i64)
                .unwrap_or(defaults.batch_recheck_ms),
            save_attempts: self.save_attempts.unwrap_or(defaults.save_attempts).clamp(1, 10),
            save_backoff: self
                .save_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.save_backoff),
            activity_index: self.activity_index.unwrap_or(defaults.activity_index),
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match self.data_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }
}

/// Per orchestrator tuning derived from [`SyncConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub batch_recheck_ms: i64,
    pub save_attempts: u32,
    pub save_backoff: Duration,
    pub activity_index: u16,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_recheck_ms: 0,
            save_attempts: 3,
            save_backoff: Duration::from_millis(200),
            activity_index: 1,
        }
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("STATUSYNC_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "statusync", "Statusync")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("net", "statusync", "Statusync")
        .context("unable to determine platform config dir")?;
    Ok(proj.config_dir().join("config.json"))
}

pub fn load_config(text: &str) -> Result<SyncConfig> {
    let cfg: SyncConfig = serde_json::from_str(text).context("decode SyncConfig")?;
    if cfg.ledger.base_url.trim().is_empty() {
        anyhow::bail!("ledger.base_url must not be empty");
    }
    Ok(cfg)
}
