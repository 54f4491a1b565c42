/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Opaque blobs keyed by a logical name.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// One file per name inside `dir`. Writes go through a temp file and a rename
/// so a crash never leaves a half written blob behind.
#[derive(Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).with_context(|| format!("create blob dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let safe = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect::<String>();
        self.dir.join(format!("{safe}.bin"))
    }
}

#[async_trait]
impl PersistenceStore for FileBlobStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

/// In-process store, used when nothing needs to survive the process.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok().and_then(|g| g.get(name).cloned())
    }

    pub fn insert(&self, name: &str, data: Vec<u8>) {
        if let Ok(mut g) = self.blobs.lock() {
            g.insert(name.to_string(), data);
        }
    }
}

#[async_trait]
impl PersistenceStore for MemoryBlobStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let g = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?;
        Ok(g.get(name).cloned())
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut g = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?;
        g.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
