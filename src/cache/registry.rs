//! Backend kinds and the factory registry that resolves them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::backend::CacheBackend;
use super::disk::DiskBackend;
use super::memory::MemoryBackend;
use crate::{Error, ErrorContext, Result};

/// Storage engine family. Fixed for the lifetime of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    #[default]
    InMemory,
    /// Networked key-value store (e.g. Redis).
    NetworkedKv,
    /// Networked key-value store with embedding similarity lookup.
    NetworkedKvSemantic,
    /// Vector database with similarity lookup (e.g. Qdrant).
    VectorSemantic,
    /// Blob storage (e.g. S3); typically blocking-only.
    ObjectStore,
    Disk,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "local",
            BackendKind::NetworkedKv => "redis",
            BackendKind::NetworkedKvSemantic => "redis-semantic",
            BackendKind::VectorSemantic => "qdrant-semantic",
            BackendKind::ObjectStore => "s3",
            BackendKind::Disk => "disk",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" | "in-memory" | "in_memory" => Ok(BackendKind::InMemory),
            "redis" => Ok(BackendKind::NetworkedKv),
            "redis-semantic" => Ok(BackendKind::NetworkedKvSemantic),
            "qdrant-semantic" => Ok(BackendKind::VectorSemantic),
            "s3" => Ok(BackendKind::ObjectStore),
            "disk" => Ok(BackendKind::Disk),
            _ => Err(Error::configuration_with_context(
                format!("invalid cache backend kind '{}'", s),
                ErrorContext::new()
                    .with_field_path("kind")
                    .with_details("expected one of local, redis, redis-semantic, qdrant-semantic, s3, disk"),
            )),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Connection parameters handed to the backend factory untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendParams(BTreeMap<String, Value>);

impl BackendParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.0.get(name).and_then(Value::as_u64)
    }

    /// A duration given in (possibly fractional) seconds.
    pub fn get_secs(&self, name: &str) -> Option<Duration> {
        self.0
            .get(name)
            .and_then(Value::as_f64)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type BackendFactory =
    Arc<dyn Fn(&BackendParams) -> Result<Arc<dyn CacheBackend>> + Send + Sync>;

/// Maps each [`BackendKind`] to the factory that builds it.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<BackendKind, BackendFactory>,
}

impl BackendRegistry {
    /// A registry with no factories at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// In-memory and disk backends.
    ///
    /// `local` reads `max_entries` and `ttl` (seconds); `disk` requires `directory`.
    pub fn with_builtins() -> Self {
        Self::empty()
            .register(BackendKind::InMemory, |params| {
                let max_entries = params
                    .get_u64("max_entries")
                    .map(|n| n as usize)
                    .unwrap_or(10_000);
                let mut backend = MemoryBackend::new(max_entries);
                if let Some(ttl) = params.get_secs("ttl") {
                    backend = backend.with_default_ttl(ttl);
                }
                Ok(Arc::new(backend))
            })
            .register(BackendKind::Disk, |params| {
                let dir = params.get_str("directory").ok_or_else(|| {
                    Error::configuration_with_context(
                        "disk cache requires a directory",
                        ErrorContext::new()
                            .with_field_path("params.directory")
                            .with_source("registry"),
                    )
                })?;
                Ok(Arc::new(DiskBackend::new(dir)?))
            })
    }

    pub fn register<F>(mut self, kind: BackendKind, factory: F) -> Self
    where
        F: Fn(&BackendParams) -> Result<Arc<dyn CacheBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn create(&self, kind: BackendKind, params: &BackendParams) -> Result<Arc<dyn CacheBackend>> {
        let factory = self.factories.get(&kind).ok_or_else(|| {
            Error::configuration_with_context(
                format!("no cache backend registered for kind '{}'", kind),
                ErrorContext::new()
                    .with_field_path("kind")
                    .with_source("registry"),
            )
        })?;
        factory(params)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in [
            BackendKind::InMemory,
            BackendKind::NetworkedKv,
            BackendKind::NetworkedKvSemantic,
            BackendKind::VectorSemantic,
            BackendKind::ObjectStore,
            BackendKind::Disk,
        ] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("in-memory".parse::<BackendKind>().unwrap(), BackendKind::InMemory);
    }

    #[test]
    fn test_invalid_kind_is_configuration_error() {
        let err = "memcached".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.kind(), "configuration");

        let err = serde_json::from_str::<BackendKind>(r#""memcached""#).unwrap_err();
        assert!(err.to_string().contains("invalid cache backend kind"));
    }

    #[test]
    fn test_builtins() {
        let registry = BackendRegistry::with_builtins();
        assert!(registry.contains(BackendKind::InMemory));
        assert!(registry.contains(BackendKind::Disk));
        assert!(!registry.contains(BackendKind::NetworkedKv));

        let backend = registry
            .create(BackendKind::InMemory, &BackendParams::new().with("max_entries", 5))
            .unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_unregistered_kind_fails() {
        let err = BackendRegistry::with_builtins()
            .create(BackendKind::ObjectStore, &BackendParams::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_disk_requires_directory() {
        let err = BackendRegistry::with_builtins()
            .create(BackendKind::Disk, &BackendParams::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("directory"));
    }

    #[test]
    fn test_custom_factory() {
        let registry = BackendRegistry::empty().register(BackendKind::NetworkedKv, |params| {
            assert_eq!(params.get_str("host"), Some("localhost"));
            Ok(Arc::new(MemoryBackend::new(1)))
        });
        let backend = registry
            .create(BackendKind::NetworkedKv, &BackendParams::new().with("host", "localhost"))
            .unwrap();
        assert_eq!(backend.name(), "memory");
    }
}
