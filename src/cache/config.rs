//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use super::policy::CacheMode;
use super::registry::{BackendKind, BackendParams};
use crate::types::call::CallKind;
use crate::{Error, ErrorContext, Result};

const DEFAULT_MAX_ENTRY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(alias = "type")]
    pub kind: BackendKind,
    pub mode: CacheMode,
    pub namespace: Option<String>,
    /// Seconds in serialized form.
    #[serde(alias = "ttl", with = "opt_secs")]
    pub default_ttl: Option<Duration>,
    pub supported_call_kinds: BTreeSet<CallKind>,
    /// Passed to the backend factory as-is.
    pub params: BackendParams,
    /// Buffer async writes and flush them in bulk once this many are pending.
    pub flush_size: Option<usize>,
    /// Hash parameters outside the built-in allow-list too (e.g. `top_k`).
    pub include_provider_specific_params: bool,
    /// Responses whose JSON form exceeds this many bytes are not cached.
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::InMemory,
            mode: CacheMode::DefaultOn,
            namespace: None,
            default_ttl: None,
            supported_call_kinds: CallKind::ALL.into_iter().collect(),
            params: BackendParams::new(),
            flush_size: None,
            include_provider_specific_params: false,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }
}

impl CacheConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new().with_source("cache_config_yaml"),
            )
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new().with_source("cache_config_json"),
            )
        })
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_supported_call_kinds(mut self, kinds: impl IntoIterator<Item = CallKind>) -> Self {
        self.supported_call_kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params = self.params.with(name, value);
        self
    }

    pub fn with_flush_size(mut self, size: usize) -> Self {
        self.flush_size = Some(size);
        self
    }

    pub fn with_provider_specific_params(mut self, include: bool) -> Self {
        self.include_provider_specific_params = include;
        self
    }

    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_size == Some(0) {
            return Err(Error::configuration_with_context(
                "flush_size must be at least 1",
                ErrorContext::new().with_field_path("flush_size"),
            ));
        }
        if self.max_entry_size == 0 {
            return Err(Error::configuration_with_context(
                "max_entry_size must be positive",
                ErrorContext::new().with_field_path("max_entry_size"),
            ));
        }
        Ok(())
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        secs.map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
