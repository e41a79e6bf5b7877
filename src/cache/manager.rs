//! Cache orchestration: policy, key derivation, freshness and write paths.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::backend::{CacheBackend, CacheEntry, CallContext, WriteOptions};
use super::config::CacheConfig;
use super::diagnostics::{CacheEvent, DiagnosticsSink, TracingDiagnostics, WriteStrategy};
use super::freshness::{self, Freshness};
use super::key::{CacheKey, KeyBuilder};
use super::policy::CachePolicy;
use super::registry::{BackendKind, BackendRegistry};
use super::replay;
use crate::batch::{fan_out, PendingWrite, WriteBuffer};
use crate::types::call::CallArgs;
use crate::Result;

/// Result of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Value),
    /// Nothing usable: absent, stale, or the backend failed.
    Miss,
    /// The policy excluded this call.
    Bypass,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_hit(self) -> Option<Value> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            _ => None,
        }
    }

    /// The hit as streaming deltas, see [`replay::stream_chunks`].
    pub fn stream_chunks(&self, chunk_size: usize) -> Option<Vec<Value>> {
        match self {
            CacheLookup::Hit(v) => replay::stream_chunks(v, chunk_size),
            _ => None,
        }
    }
}

/// Result of a write. Never an error: faults are reported to diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { count: usize },
    /// Held in the flush buffer.
    Buffered { pending: usize },
    Bypassed,
    /// Dropped before reaching the backend (too large, mismatched batch).
    Skipped,
    Failed { written: usize, failed: usize },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }

    fn merge(self, other: WriteOutcome) -> WriteOutcome {
        let (w1, f1) = self.counts();
        let (w2, f2) = other.counts();
        if f1 + f2 == 0 {
            WriteOutcome::Written { count: w1 + w2 }
        } else {
            WriteOutcome::Failed {
                written: w1 + w2,
                failed: f1 + f2,
            }
        }
    }

    fn counts(&self) -> (usize, usize) {
        match *self {
            WriteOutcome::Written { count } => (count, 0),
            WriteOutcome::Failed { written, failed } => (written, failed),
            _ => (0, 0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub sets: u64,
    pub bypassed: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses + self.stale;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    sets: AtomicU64,
    bypassed: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Request-level response cache for model calls.
///
/// Every `get*` / `set*` call is infallible from the caller's point of view:
/// backend faults, timeouts and undecodable payloads degrade to
/// [`CacheLookup::Miss`] or a non-`Written` [`WriteOutcome`], and are
/// reported to the configured [`DiagnosticsSink`].
pub struct ResponseCache {
    config: CacheConfig,
    keys: KeyBuilder,
    policy: CachePolicy,
    backend: Arc<dyn CacheBackend>,
    buffer: Option<WriteBuffer<PendingWrite>>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    stats: AtomicStats,
}

struct PreparedWrite {
    key: CacheKey,
    entry: CacheEntry,
    opts: WriteOptions,
}

impl ResponseCache {
    /// Build with the built-in backends (`local`, `disk`).
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_registry(config, &BackendRegistry::with_builtins())
    }

    pub fn with_registry(config: CacheConfig, registry: &BackendRegistry) -> Result<Self> {
        config.validate()?;
        let backend = registry.create(config.kind, &config.params)?;
        Self::with_backend(config, backend)
    }

    /// Bind an already-constructed backend. `config.kind` is kept as a label.
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Result<Self> {
        config.validate()?;
        let keys = KeyBuilder::new()
            .with_provider_specific_params(config.include_provider_specific_params);
        let keys = match &config.namespace {
            Some(ns) => keys.with_namespace(ns.clone()),
            None => keys,
        };
        let policy = CachePolicy::new(config.mode, config.supported_call_kinds.clone());
        let buffer = match config.flush_size {
            Some(size) if backend.capabilities().bulk_write() => Some(WriteBuffer::new(size)),
            Some(_) => {
                tracing::debug!(
                    backend = backend.name(),
                    "flush_size ignored: backend has no bulk write"
                );
                None
            }
            None => None,
        };
        tracing::debug!(
            kind = %config.kind,
            backend = backend.name(),
            mode = ?config.mode,
            "response cache initialised"
        );
        Ok(Self {
            config,
            keys,
            policy,
            backend,
            buffer,
            diagnostics: Arc::new(TracingDiagnostics),
            stats: AtomicStats::default(),
        })
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether the bound backend does real async I/O.
    pub fn supports_async(&self) -> bool {
        self.backend.capabilities().async_io
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.keys.set_namespace(namespace.clone());
        self.config.namespace = namespace;
    }

    pub fn set_default_ttl(&mut self, ttl: Option<Duration>) {
        self.config.default_ttl = ttl;
    }

    pub fn should_use_cache(&self, args: &CallArgs) -> bool {
        self.policy.allows(args)
    }

    pub fn cache_key(&self, args: &CallArgs) -> CacheKey {
        self.keys.derive(args)
    }

    // ---- reads ----

    pub fn get_blocking(&self, args: &CallArgs) -> CacheLookup {
        let Some(key) = self.admit_read(args) else {
            return CacheLookup::Bypass;
        };
        let result = self.backend.get_blocking(&key, &CallContext::from_args(args));
        self.finish_read(&key, args, result)
    }

    pub async fn get(&self, args: &CallArgs) -> CacheLookup {
        let Some(key) = self.admit_read(args) else {
            return CacheLookup::Bypass;
        };
        let ctx = CallContext::from_args(args);
        let result = if self.supports_async() {
            self.backend.get(&key, &ctx).await
        } else {
            self.backend.get_blocking(&key, &ctx)
        };
        self.finish_read(&key, args, result)
    }

    fn admit_read(&self, args: &CallArgs) -> Option<CacheKey> {
        if !self.policy.allows(args) {
            AtomicStats::bump(&self.stats.bypassed, 1);
            self.diagnostics.record(CacheEvent::Bypassed);
            return None;
        }
        Some(self.keys.derive(args))
    }

    fn finish_read(&self, key: &CacheKey, args: &CallArgs, result: Result<Option<Value>>) -> CacheLookup {
        let stored = match result {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                AtomicStats::bump(&self.stats.misses, 1);
                self.diagnostics.record(CacheEvent::Miss {
                    key: key.to_string(),
                });
                return CacheLookup::Miss;
            }
            Err(e) => {
                AtomicStats::bump(&self.stats.errors, 1);
                self.diagnostics.record(CacheEvent::read_failed(key.as_str(), &e));
                return CacheLookup::Miss;
            }
        };

        let max_age = args.cache_control().max_age;
        match freshness::evaluate(stored, max_age, freshness::unix_now()) {
            Ok(Freshness::Fresh(value)) => {
                AtomicStats::bump(&self.stats.hits, 1);
                self.diagnostics.record(CacheEvent::Hit {
                    key: key.to_string(),
                });
                CacheLookup::Hit(value)
            }
            Ok(Freshness::Stale { age }) => {
                AtomicStats::bump(&self.stats.stale, 1);
                self.diagnostics.record(CacheEvent::Stale {
                    key: key.to_string(),
                    age,
                });
                CacheLookup::Miss
            }
            Err(e) => {
                AtomicStats::bump(&self.stats.errors, 1);
                self.diagnostics.record(CacheEvent::read_failed(key.as_str(), &e));
                CacheLookup::Miss
            }
        }
    }

    // ---- single writes ----

    pub fn set_blocking(&self, response: &Value, args: &CallArgs) -> WriteOutcome {
        match self.prepare_write(response, args) {
            Ok(w) => self.write_one_blocking(&w),
            Err(outcome) => outcome,
        }
    }

    /// Write one response. With `flush_size` configured the entry is buffered
    /// and written in bulk once the buffer fills.
    pub async fn set(&self, response: &Value, args: &CallArgs) -> WriteOutcome {
        let w = match self.prepare_write(response, args) {
            Ok(w) => w,
            Err(outcome) => return outcome,
        };
        if let Some(buffer) = &self.buffer {
            let key = w.key.to_string();
            let added = buffer
                .push(PendingWrite::new(w.key, w.entry, w.opts.ttl))
                .await;
            if added.should_flush() {
                return self.flush().await;
            }
            self.diagnostics.record(CacheEvent::Buffered {
                key,
                pending: added.count(),
            });
            return WriteOutcome::Buffered {
                pending: added.count(),
            };
        }
        if !self.supports_async() {
            return self.write_one_blocking(&w);
        }
        let result = self.backend.set(&w.key, &w.entry, &w.opts).await;
        self.finish_write(1, WriteStrategy::Single, result)
    }

    fn write_one_blocking(&self, w: &PreparedWrite) -> WriteOutcome {
        let result = self.backend.set_blocking(&w.key, &w.entry, &w.opts);
        self.finish_write(1, WriteStrategy::Single, result)
    }

    fn prepare_write(&self, response: &Value, args: &CallArgs) -> std::result::Result<PreparedWrite, WriteOutcome> {
        if !self.policy.allows(args) {
            AtomicStats::bump(&self.stats.bypassed, 1);
            self.diagnostics.record(CacheEvent::Bypassed);
            return Err(WriteOutcome::Bypassed);
        }
        if !self.fits(response) {
            return Err(WriteOutcome::Skipped);
        }
        Ok(PreparedWrite {
            key: self.keys.derive(args),
            entry: CacheEntry::new(freshness::unix_now(), response.clone()),
            opts: self.write_options(args),
        })
    }

    /// Per-call `cache.ttl` beats the configured default; `None` defers to the backend.
    fn write_options(&self, args: &CallArgs) -> WriteOptions {
        let ttl = args.cache_control().ttl.or(self.config.default_ttl);
        WriteOptions::new(ttl).with_context(CallContext::from_args(args))
    }

    fn fits(&self, response: &Value) -> bool {
        let size = response.to_string().len();
        if size > self.config.max_entry_size {
            self.diagnostics.record(CacheEvent::WriteSkipped {
                reason: format!(
                    "response is {} bytes, limit is {}",
                    size, self.config.max_entry_size
                ),
            });
            return false;
        }
        true
    }

    fn finish_write(&self, count: usize, strategy: WriteStrategy, result: Result<()>) -> WriteOutcome {
        match result {
            Ok(()) => {
                AtomicStats::bump(&self.stats.sets, count);
                self.diagnostics.record(CacheEvent::Written { count, strategy });
                WriteOutcome::Written { count }
            }
            Err(e) => {
                AtomicStats::bump(&self.stats.errors, 1);
                self.diagnostics.record(CacheEvent::write_failed(count, &e));
                WriteOutcome::Failed {
                    written: 0,
                    failed: count,
                }
            }
        }
    }

    // ---- multi-input writes ----

    /// Pair each element of a list `input` with one response and write all pairs.
    ///
    /// Each key is derived with only `input` replaced by the element, so a later
    /// single-input call finds it. A non-list `input` falls back to a plain
    /// [`set`](Self::set) of the whole collection.
    pub async fn set_batch(&self, responses: &[Value], args: &CallArgs) -> WriteOutcome {
        match self.prepare_batch(responses, args) {
            BatchPlan::Entries(entries, opts) => self.write_entries(entries, &opts).await,
            BatchPlan::Single => self.set(&Value::Array(responses.to_vec()), args).await,
            BatchPlan::Done(outcome) => outcome,
        }
    }

    pub fn set_batch_blocking(&self, responses: &[Value], args: &CallArgs) -> WriteOutcome {
        match self.prepare_batch(responses, args) {
            BatchPlan::Entries(entries, opts) => self.write_entries_blocking(&entries, &opts),
            BatchPlan::Single => self.set_blocking(&Value::Array(responses.to_vec()), args),
            BatchPlan::Done(outcome) => outcome,
        }
    }

    fn prepare_batch(&self, responses: &[Value], args: &CallArgs) -> BatchPlan {
        if !self.policy.allows(args) {
            AtomicStats::bump(&self.stats.bypassed, 1);
            self.diagnostics.record(CacheEvent::Bypassed);
            return BatchPlan::Done(WriteOutcome::Bypassed);
        }
        let Some(inputs) = args.input_list() else {
            return BatchPlan::Single;
        };
        if inputs.len() != responses.len() {
            self.diagnostics.record(CacheEvent::WriteSkipped {
                reason: format!(
                    "{} inputs but {} responses",
                    inputs.len(),
                    responses.len()
                ),
            });
            return BatchPlan::Done(WriteOutcome::Skipped);
        }

        let now = freshness::unix_now();
        let entries = inputs
            .iter()
            .zip(responses)
            .filter(|(_, response)| self.fits(response))
            .map(|(input, response)| {
                let key = self.keys.derive(&args.with_input(input.clone()));
                (key, CacheEntry::new(now, response.clone()))
            })
            .collect();
        BatchPlan::Entries(entries, self.write_options(args))
    }

    /// Prefers `pipeline_write`, then `batch_write`, then concurrent single writes.
    async fn write_entries(&self, entries: Vec<(CacheKey, CacheEntry)>, opts: &WriteOptions) -> WriteOutcome {
        if entries.is_empty() {
            return WriteOutcome::Written { count: 0 };
        }
        let caps = self.backend.capabilities();
        if !caps.async_io {
            return self.write_entries_blocking(&entries, opts);
        }
        let count = entries.len();
        if caps.pipeline_write {
            let result = self.backend.pipeline_write(&entries, opts).await;
            return self.finish_write(count, WriteStrategy::Pipeline, result);
        }
        if caps.batch_write {
            let result = self.backend.batch_write(&entries, opts).await;
            return self.finish_write(count, WriteStrategy::Batch, result);
        }

        let backend = &self.backend;
        let result = fan_out(entries.iter(), |(key, entry)| backend.set(key, entry, opts)).await;
        for (_, e) in &result.failures {
            AtomicStats::bump(&self.stats.errors, 1);
            self.diagnostics.record(CacheEvent::write_failed(1, e));
        }
        let written = result.success_count();
        AtomicStats::bump(&self.stats.sets, written);
        if result.all_succeeded() {
            self.diagnostics.record(CacheEvent::Written {
                count: written,
                strategy: WriteStrategy::FanOut,
            });
            WriteOutcome::Written { count: written }
        } else {
            WriteOutcome::Failed {
                written,
                failed: result.failure_count(),
            }
        }
    }

    fn write_entries_blocking(&self, entries: &[(CacheKey, CacheEntry)], opts: &WriteOptions) -> WriteOutcome {
        let mut written = 0;
        let mut failed = 0;
        for (key, entry) in entries {
            match self.backend.set_blocking(key, entry, opts) {
                Ok(()) => written += 1,
                Err(e) => {
                    failed += 1;
                    AtomicStats::bump(&self.stats.errors, 1);
                    self.diagnostics.record(CacheEvent::write_failed(1, &e));
                }
            }
        }
        AtomicStats::bump(&self.stats.sets, written);
        if failed == 0 {
            self.diagnostics.record(CacheEvent::Written {
                count: written,
                strategy: WriteStrategy::Blocking,
            });
            WriteOutcome::Written { count: written }
        } else {
            WriteOutcome::Failed { written, failed }
        }
    }

    // ---- flush buffer & lifecycle ----

    /// Write out everything in the flush buffer. Entries are grouped by TTL so
    /// each bulk write carries a single expiry.
    pub async fn flush(&self) -> WriteOutcome {
        let Some(buffer) = &self.buffer else {
            return WriteOutcome::Written { count: 0 };
        };
        let pending = buffer.drain().await;
        if pending.is_empty() {
            return WriteOutcome::Written { count: 0 };
        }
        let mut by_ttl: BTreeMap<Option<Duration>, Vec<(CacheKey, CacheEntry)>> = BTreeMap::new();
        for p in pending {
            by_ttl.entry(p.ttl).or_default().push((p.key, p.entry));
        }
        let mut outcome = WriteOutcome::Written { count: 0 };
        for (ttl, entries) in by_ttl {
            let written = self.write_entries(entries, &WriteOptions::new(ttl)).await;
            outcome = outcome.merge(written);
        }
        outcome
    }

    /// Number of writes waiting in the flush buffer.
    pub async fn pending_writes(&self) -> usize {
        match &self.buffer {
            Some(buffer) => buffer.len().await,
            None => 0,
        }
    }

    /// `None` when the backend has no liveness check.
    pub async fn ping(&self) -> Option<bool> {
        if !self.backend.capabilities().ping {
            return None;
        }
        match self.backend.ping().await {
            Ok(alive) => Some(alive),
            Err(e) => {
                self.diagnostics.record(CacheEvent::read_failed("<ping>", &e));
                Some(false)
            }
        }
    }

    /// `None` when the backend cannot delete.
    pub async fn delete_keys(&self, keys: &[CacheKey]) -> Option<usize> {
        if !self.backend.capabilities().delete_keys {
            return None;
        }
        match self.backend.delete_keys(keys).await {
            Ok(n) => Some(n),
            Err(e) => {
                self.diagnostics.record(CacheEvent::write_failed(keys.len(), &e));
                Some(0)
            }
        }
    }

    /// Flush pending writes, then release backend resources.
    pub async fn disconnect(&self) {
        self.flush().await;
        if let Err(e) = self.backend.disconnect().await {
            self.diagnostics.record(CacheEvent::write_failed(0, &e));
        }
    }
}

enum BatchPlan {
    Entries(Vec<(CacheKey, CacheEntry)>, WriteOptions),
    Single,
    Done(WriteOutcome),
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("kind", &self.config.kind)
            .field("backend", &self.backend.name())
            .field("mode", &self.config.mode)
            .field("namespace", &self.config.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMode, InMemoryDiagnostics, MemoryBackend};
    use serde_json::json;

    fn cache(config: CacheConfig) -> (ResponseCache, Arc<InMemoryDiagnostics>) {
        let sink = Arc::new(InMemoryDiagnostics::default());
        let cache = ResponseCache::with_backend(config, Arc::new(MemoryBackend::new(100)))
            .unwrap()
            .with_diagnostics(sink.clone());
        (cache, sink)
    }

    fn args() -> CallArgs {
        CallArgs::new()
            .with("model", "gpt-4o")
            .with("messages", json!([{"role": "user", "content": "hello"}]))
    }

    #[test]
    fn test_blocking_round_trip() {
        let (cache, _) = cache(CacheConfig::default());
        let response = json!({"id": "chatcmpl-1", "choices": [{"message": {"content": "hi"}}]});
        assert_eq!(cache.get_blocking(&args()), CacheLookup::Miss);
        assert!(cache.set_blocking(&response, &args()).is_written());
        assert_eq!(cache.get_blocking(&args()), CacheLookup::Hit(response));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_off_bypasses_both_paths() {
        let (cache, sink) = cache(CacheConfig::default().with_mode(CacheMode::DefaultOff));
        assert_eq!(cache.set_blocking(&json!("x"), &args()), WriteOutcome::Bypassed);
        assert_eq!(cache.get_blocking(&args()), CacheLookup::Bypass);
        assert_eq!(cache.stats().bypassed, 2);
        assert!(sink.events().iter().all(|e| *e == CacheEvent::Bypassed));
    }

    #[test]
    fn test_oversized_response_is_skipped() {
        let (cache, sink) = cache(CacheConfig::default().with_max_entry_size(8));
        let outcome = cache.set_blocking(&json!("this is far too long"), &args());
        assert_eq!(outcome, WriteOutcome::Skipped);
        assert!(matches!(sink.events()[0], CacheEvent::WriteSkipped { .. }));
    }

    #[test]
    fn test_set_namespace_changes_keys() {
        let (mut cache, _) = cache(CacheConfig::default());
        let plain = cache.cache_key(&args());
        cache.set_namespace(Some("team".into()));
        let scoped = cache.cache_key(&args());
        assert_eq!(scoped.as_str(), format!("team:{}", plain));
        assert_eq!(cache.config().namespace.as_deref(), Some("team"));
    }

    #[test]
    fn test_write_outcome_merge() {
        let a = WriteOutcome::Written { count: 2 };
        let b = WriteOutcome::Failed { written: 1, failed: 1 };
        assert_eq!(a.merge(WriteOutcome::Written { count: 3 }), WriteOutcome::Written { count: 5 });
        assert_eq!(a.merge(b), WriteOutcome::Failed { written: 3, failed: 1 });
    }

    #[tokio::test]
    async fn test_mismatched_batch_is_skipped() {
        let (cache, _) = cache(CacheConfig::default());
        let batch = args().with("input", json!(["a", "b", "c"]));
        let outcome = cache.set_batch(&[json!(1), json!(2)], &batch).await;
        assert_eq!(outcome, WriteOutcome::Skipped);
        assert_eq!(cache.stats().sets, 0);
    }

    #[tokio::test]
    async fn test_batch_with_scalar_input_stores_whole_collection() {
        let (cache, _) = cache(CacheConfig::default());
        let single = args().with("input", "just one");
        let outcome = cache.set_batch(&[json!(1), json!(2)], &single).await;
        assert!(outcome.is_written());
        assert_eq!(cache.get(&single).await, CacheLookup::Hit(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_ping_and_delete() {
        let (cache, _) = cache(CacheConfig::default());
        assert_eq!(cache.ping().await, Some(true));
        cache.set(&json!("v"), &args()).await;
        let key = cache.cache_key(&args());
        assert_eq!(cache.delete_keys(&[key]).await, Some(1));
        assert_eq!(cache.get(&args()).await, CacheLookup::Miss);
    }
}
