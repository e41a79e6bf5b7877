//! On-disk backend: one JSON file per key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::backend::{BackendCapabilities, CacheBackend, CacheEntry, CallContext, WriteOptions};
use super::freshness::unix_now;
use super::key::{sha256_hex, CacheKey};
use crate::Result;

/// Distinguishes temp files of concurrent writers within one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<f64>,
    value: Value,
}

impl Envelope {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| unix_now() >= at)
    }
}

/// Stores each entry as `<dir>/<sha256(key)>.json`.
pub struct DiskBackend {
    dir: PathBuf,
}

impl DiskBackend {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", sha256_hex(key.as_str())))
    }

    fn envelope(key: &CacheKey, entry: &CacheEntry, ttl: Option<Duration>) -> Result<Vec<u8>> {
        let envelope = Envelope {
            key: key.as_str().to_string(),
            expires_at: ttl.map(|ttl| unix_now() + ttl.as_secs_f64()),
            value: entry.to_value(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// `None` for a missing or expired file; expired files are removed.
    fn open(&self, path: &Path, bytes: std::io::Result<Vec<u8>>) -> Result<Option<Value>> {
        let bytes = match bytes {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if envelope.is_expired() {
            let _ = std::fs::remove_file(path);
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    /// Unique per write so concurrent writers of one key never share a temp file.
    fn tmp_path(path: &Path) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq))
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            async_io: true,
            batch_write: false,
            pipeline_write: false,
            ping: true,
            delete_keys: true,
        }
    }

    fn get_blocking(&self, key: &CacheKey, _ctx: &CallContext) -> Result<Option<Value>> {
        let path = self.path_for(key);
        self.open(&path, std::fs::read(&path))
    }

    fn set_blocking(&self, key: &CacheKey, entry: &CacheEntry, opts: &WriteOptions) -> Result<()> {
        let path = self.path_for(key);
        let tmp = Self::tmp_path(&path);
        std::fs::write(&tmp, Self::envelope(key, entry, opts.ttl)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn get(&self, key: &CacheKey, _ctx: &CallContext) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = tokio::fs::read(&path).await;
        self.open(&path, bytes)
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry, opts: &WriteOptions) -> Result<()> {
        let path = self.path_for(key);
        let tmp = Self::tmp_path(&path);
        tokio::fs::write(&tmp, Self::envelope(key, entry, opts.ttl)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn delete_keys(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
