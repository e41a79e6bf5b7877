//! Diagnostics for cache faults and outcomes.
//!
//! Hot-path operations never return errors; what went wrong is reported here
//! instead. The default sink forwards to `tracing`.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::Error;

/// Which bulk path a multi-key write took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Single,
    Pipeline,
    Batch,
    FanOut,
    Blocking,
}

impl WriteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStrategy::Single => "single",
            WriteStrategy::Pipeline => "pipeline",
            WriteStrategy::Batch => "batch",
            WriteStrategy::FanOut => "fan_out",
            WriteStrategy::Blocking => "blocking",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Stale { key: String, age: f64 },
    /// The policy denied the call.
    Bypassed,
    ReadFailed { key: String, kind: &'static str, message: String },
    Written { count: usize, strategy: WriteStrategy },
    Buffered { key: String, pending: usize },
    WriteFailed { count: usize, kind: &'static str, message: String },
    /// A write was dropped before reaching the backend.
    WriteSkipped { reason: String },
}

impl CacheEvent {
    pub fn read_failed(key: &str, err: &Error) -> Self {
        CacheEvent::ReadFailed {
            key: key.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn write_failed(count: usize, err: &Error) -> Self {
        CacheEvent::WriteFailed {
            count,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            CacheEvent::ReadFailed { .. } | CacheEvent::WriteFailed { .. }
        )
    }
}

/// Destination for [`CacheEvent`]s. Must not block: it is called inline from
/// both the blocking and the async paths.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: CacheEvent);
}

/// Logs events with `tracing`; faults at `warn`, everything else at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, event: CacheEvent) {
        match event {
            CacheEvent::Hit { key } => tracing::debug!(%key, "cache hit"),
            CacheEvent::Miss { key } => tracing::debug!(%key, "cache miss"),
            CacheEvent::Stale { key, age } => tracing::debug!(%key, age, "cache entry stale"),
            CacheEvent::Bypassed => tracing::trace!("cache bypassed by policy"),
            CacheEvent::ReadFailed { key, kind, message } => {
                tracing::warn!(%key, kind, error = %message, "cache read failed")
            }
            CacheEvent::Written { count, strategy } => {
                tracing::debug!(count, strategy = strategy.as_str(), "cache write")
            }
            CacheEvent::Buffered { key, pending } => {
                tracing::trace!(%key, pending, "cache write buffered")
            }
            CacheEvent::WriteFailed { count, kind, message } => {
                tracing::warn!(count, kind, error = %message, "cache write failed")
            }
            CacheEvent::WriteSkipped { reason } => tracing::debug!(%reason, "cache write skipped"),
        }
    }
}

/// Bounded in-memory sink, handy for tests and debug endpoints.
pub struct InMemoryDiagnostics {
    events: Arc<RwLock<VecDeque<CacheEvent>>>,
    max_events: usize,
}

impl InMemoryDiagnostics {
    pub fn new(max: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            max_events: max.max(1),
        }
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        match self.events.read() {
            Ok(events) => events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn faults(&self) -> Vec<CacheEvent> {
        self.events().into_iter().filter(CacheEvent::is_fault).collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }
}

impl Default for InMemoryDiagnostics {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DiagnosticsSink for InMemoryDiagnostics {
    fn record(&self, event: CacheEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push_back(event);
            if events.len() > self.max_events {
                events.pop_front();
            }
        }
    }
}

/// Fans events out to several sinks.
#[derive(Default)]
pub struct CompositeDiagnostics {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl CompositeDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiagnosticsSink for CompositeDiagnostics {
    fn record(&self, event: CacheEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let sink = InMemoryDiagnostics::new(2);
        for i in 0..3 {
            sink.record(CacheEvent::Miss {
                key: format!("k{}", i),
            });
        }
        assert_eq!(
            sink.events(),
            vec![
                CacheEvent::Miss { key: "k1".into() },
                CacheEvent::Miss { key: "k2".into() },
            ]
        );
    }

    #[test]
    fn test_faults_filter() {
        let sink = InMemoryDiagnostics::default();
        sink.record(CacheEvent::Bypassed);
        sink.record(CacheEvent::read_failed(
            "k",
            &Error::backend_unavailable("memory", "down"),
        ));
        let faults = sink.faults();
        assert_eq!(faults.len(), 1);
        assert!(matches!(
            &faults[0],
            CacheEvent::ReadFailed { kind: "backend_unavailable", .. }
        ));
    }

    #[test]
    fn test_composite_forwards_to_all() {
        let a = Arc::new(InMemoryDiagnostics::default());
        let b = Arc::new(InMemoryDiagnostics::default());
        let composite = CompositeDiagnostics::new()
            .add_sink(a.clone())
            .add_sink(b.clone());
        composite.record(CacheEvent::Bypassed);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
