//! In-process backend.

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::backend::{BackendCapabilities, CacheBackend, CacheEntry, CallContext, WriteOptions};
use super::key::CacheKey;
use crate::{Error, Result};

const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Bounded LRU map with optional per-entry expiry.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, Slot>>,
    default_ttl: Option<Duration>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            default_ttl: None,
        }
    }

    /// TTL used when a write carries none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> Result<usize> {
        let entries = self.lock()?;
        Ok(entries.iter().filter(|(_, s)| !s.is_expired()).count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Slot>>> {
        self.entries
            .lock()
            .map_err(|_| Error::backend_unavailable(self.name(), "memory cache lock poisoned"))
    }

    fn slot(&self, entry: &CacheEntry, ttl: Option<Duration>) -> Slot {
        Slot {
            value: entry.to_value(),
            expires_at: ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            async_io: true,
            batch_write: true,
            pipeline_write: false,
            ping: true,
            delete_keys: true,
        }
    }

    fn get_blocking(&self, key: &CacheKey, _ctx: &CallContext) -> Result<Option<Value>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key.as_str()) {
            Some(slot) if !slot.is_expired() => return Ok(Some(slot.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key.as_str());
        }
        Ok(None)
    }

    fn set_blocking(&self, key: &CacheKey, entry: &CacheEntry, opts: &WriteOptions) -> Result<()> {
        let slot = self.slot(entry, opts.ttl);
        self.lock()?.put(key.as_str().to_string(), slot);
        Ok(())
    }

    async fn batch_write(&self, items: &[(CacheKey, CacheEntry)], opts: &WriteOptions) -> Result<()> {
        let mut entries = self.lock()?;
        for (key, entry) in items {
            entries.put(key.as_str().to_string(), self.slot(entry, opts.ttl));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(self.lock().is_ok())
    }

    async fn delete_keys(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut entries = self.lock()?;
        Ok(keys
            .iter()
            .filter(|k| entries.pop(k.as_str()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(n: i64) -> CacheEntry {
        CacheEntry::new(1.0, json!({ "n": n }))
    }

    #[test]
    fn test_set_and_get() {
        let backend = MemoryBackend::new(10);
        let key = CacheKey::from("k1");
        backend
            .set_blocking(&key, &entry(1), &WriteOptions::default())
            .unwrap();
        let stored = backend
            .get_blocking(&key, &CallContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(stored, json!({"timestamp": 1.0, "response": {"n": 1}}));
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let backend = MemoryBackend::new(2);
        let ctx = CallContext::default();
        let opts = WriteOptions::default();
        backend.set_blocking(&"a".into(), &entry(1), &opts).unwrap();
        backend.set_blocking(&"b".into(), &entry(2), &opts).unwrap();
        // touch "a" so "b" becomes least recently used
        backend.get_blocking(&"a".into(), &ctx).unwrap();
        backend.set_blocking(&"c".into(), &entry(3), &opts).unwrap();

        assert!(backend.get_blocking(&"a".into(), &ctx).unwrap().is_some());
        assert!(backend.get_blocking(&"b".into(), &ctx).unwrap().is_none());
        assert!(backend.get_blocking(&"c".into(), &ctx).unwrap().is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let backend = MemoryBackend::new(10);
        let key = CacheKey::from("short");
        backend
            .set_blocking(&key, &entry(1), &WriteOptions::new(Some(Duration::ZERO)))
            .unwrap();
        assert!(backend
            .get_blocking(&key, &CallContext::default())
            .unwrap()
            .is_none());
        assert!(backend.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_batch_write_and_delete() {
        let backend = MemoryBackend::default();
        let items: Vec<_> = (0..3)
            .map(|i| (CacheKey::new(format!("k{}", i)), entry(i)))
            .collect();
        backend
            .batch_write(&items, &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.len().unwrap(), 3);

        let removed = backend
            .delete_keys(&["k0".into(), "k2".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(backend.ping().await.unwrap());
    }
}
