//! Per-call cache policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::call::{CallArgs, CallKind};

/// Whether caching is opt-out (`default_on`) or opt-in (`default_off`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    DefaultOn,
    DefaultOff,
}

/// Decides whether a call may read from or write to the cache.
///
/// The same decision gates both paths, so an opted-out call neither sees
/// stale entries nor writes new ones.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    mode: CacheMode,
    supported: BTreeSet<CallKind>,
}

impl CachePolicy {
    pub fn new(mode: CacheMode, supported: BTreeSet<CallKind>) -> Self {
        Self { mode, supported }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn allows(&self, args: &CallArgs) -> bool {
        if let Some(kind) = args.call_kind() {
            if !self.supported.contains(&kind) {
                return false;
            }
        }
        match self.mode {
            CacheMode::DefaultOn => true,
            CacheMode::DefaultOff => args.cache_control().use_cache,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(CacheMode::DefaultOn, CallKind::ALL.into_iter().collect())
    }
}
