/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use statusync_protocol::{AccountId, ProfileInfo};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Locally cached display profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn cached_profile(&self, account_id: AccountId) -> Option<ProfileInfo>;

    /// Caches `profile` unless a copy at least as new is present. Returns true
    /// when the cache changed.
    async fn store_profile(&self, profile: &ProfileInfo) -> Result<bool>;
}

/// Profile cache backed by sqlite.
#[derive(Clone)]
pub struct ProfileDb {
    path: PathBuf,
}

impl ProfileDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS profiles (
              account_id INTEGER PRIMARY KEY,
              profile_transaction_id INTEGER NOT NULL,
              image_transaction_id INTEGER NOT NULL,
              profile_name TEXT NOT NULL,
              real_name TEXT NOT NULL,
              bio TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    /// Stores `profile` unless the cached copy is at least as new.
    /// Returns true when the row changed.
    pub fn upsert_profile(&self, profile: &ProfileInfo) -> Result<bool> {
        let conn = Connection::open(&self.path)?;
        let changed = conn.execute(
            r#"
            INSERT INTO profiles(
              account_id, profile_transaction_id, image_transaction_id,
              profile_name, real_name, bio, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(account_id) DO UPDATE SET
              profile_transaction_id=excluded.profile_transaction_id,
              image_transaction_id=excluded.image_transaction_id,
              profile_name=excluded.profile_name,
              real_name=excluded.real_name,
              bio=excluded.bio,
              updated_at_ms=excluded.updated_at_ms
            WHERE excluded.profile_transaction_id > profiles.profile_transaction_id
               OR excluded.image_transaction_id > profiles.image_transaction_id
            "#,
            params![
                profile.account_id,
                profile.profile_transaction_id,
                profile.image_transaction_id,
                profile.profile_name,
                profile.real_name,
                profile.bio,
                now_ms()
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_profile(&self, account_id: AccountId) -> Result<Option<ProfileInfo>> {
        let conn = Connection::open(&self.path)?;
        conn.query_row(
            r#"
            SELECT account_id, profile_transaction_id, image_transaction_id, profile_name, real_name, bio
            FROM profiles WHERE account_id=?1
            "#,
            params![account_id],
            |r| {
                Ok(ProfileInfo {
                    account_id: r.get(0)?,
                    profile_transaction_id: r.get(1)?,
                    image_transaction_id: r.get(2)?,
                    profile_name: r.get(3)?,
                    real_name: r.get(4)?,
                    bio: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

}

#[async_trait]
impl ProfileStore for ProfileDb {
    async fn cached_profile(&self, account_id: AccountId) -> Option<ProfileInfo> {
        let res = tokio::task::spawn_blocking({
            let db = self.clone();
            move || db.get_profile(account_id)
        })
        .await;
        match res {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!(account_id, "profile lookup failed: {e:#}");
                None
            }
            Err(e) => {
                warn!(account_id, "profile lookup task failed: {e}");
                None
            }
        }
    }

    async fn store_profile(&self, profile: &ProfileInfo) -> Result<bool> {
        let db = self.clone();
        let profile = profile.clone();
        tokio::task::spawn_blocking(move || db.upsert_profile(&profile))
            .await
            .context("profile upsert task")?
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
