//! Call arguments and the per-call cache-control surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, ErrorContext};

/// Reserved parameter names that carry plumbing rather than model inputs.
pub mod reserved {
    /// Call metadata (`model_group`, `caching_groups`, `file_checksum`, `file_name`, `namespace`).
    pub const METADATA: &str = "metadata";
    /// Runtime parameters (`preset_cache_key`, `file_name`, nested `metadata`).
    pub const RUNTIME_PARAMS: &str = "runtime_params";
    /// Cache-control mapping.
    pub const CACHE: &str = "cache";
    /// Explicit, already-derived cache key.
    pub const CACHE_KEY: &str = "cache_key";
    /// Call kind tag, see [`CallKind`](super::CallKind).
    pub const CALL_KIND: &str = "call_kind";

    pub const PRESET_CACHE_KEY: &str = "preset_cache_key";
    pub const NAMESPACE: &str = "namespace";
    pub const REDIS_NAMESPACE: &str = "redis_namespace";
    pub const MODEL_GROUP: &str = "model_group";
    pub const CACHING_GROUPS: &str = "caching_groups";
    pub const FILE_CHECKSUM: &str = "file_checksum";
    pub const FILE_NAME: &str = "file_name";

    pub const USE_CACHE: &str = "use-cache";
    pub const TTL: &str = "ttl";
    pub const S_MAXAGE: &str = "s-maxage";
    pub const S_MAX_AGE: &str = "s-max-age";
}

/// Kind of model call being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    #[serde(alias = "acompletion")]
    Completion,
    #[serde(alias = "atext_completion")]
    TextCompletion,
    #[serde(alias = "aembedding")]
    Embedding,
    #[serde(alias = "atranscription")]
    Transcription,
    #[serde(alias = "arerank")]
    Rerank,
}

impl CallKind {
    pub const ALL: [CallKind; 5] = [
        CallKind::Completion,
        CallKind::TextCompletion,
        CallKind::Embedding,
        CallKind::Transcription,
        CallKind::Rerank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Completion => "completion",
            CallKind::TextCompletion => "text_completion",
            CallKind::Embedding => "embedding",
            CallKind::Transcription => "transcription",
            CallKind::Rerank => "rerank",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallKind {
    type Err = Error;

    /// Accepts both the blocking tag and its `a`-prefixed async twin.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        let tag = match tag.as_str() {
            "acompletion" | "atext_completion" | "aembedding" | "atranscription" | "arerank" => {
                &tag[1..]
            }
            other => other,
        };
        CallKind::ALL
            .into_iter()
            .find(|k| k.as_str() == tag)
            .ok_or_else(|| {
                Error::configuration_with_context(
                    format!("unknown call kind '{}'", s),
                    ErrorContext::new().with_field_path("supported_call_kinds"),
                )
            })
    }
}

/// Per-call cache controls, parsed from the reserved `cache` parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheControl {
    /// Opt-in flag honoured under `default_off` mode.
    pub use_cache: bool,
    /// Per-call TTL override.
    pub ttl: Option<Duration>,
    /// Read-side freshness bound in seconds.
    pub max_age: Option<f64>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_age(mut self, secs: f64) -> Self {
        self.max_age = Some(secs);
        self
    }

    /// Parse the `cache` mapping. Anything malformed is ignored.
    ///
    /// `s-max-age` is consulted before `s-maxage`.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };
        let use_cache = matches!(map.get(reserved::USE_CACHE), Some(Value::Bool(true)));
        let ttl = map
            .get(reserved::TTL)
            .and_then(Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        let max_age = map
            .get(reserved::S_MAX_AGE)
            .and_then(Value::as_f64)
            .or_else(|| map.get(reserved::S_MAXAGE).and_then(Value::as_f64));
        Self {
            use_cache,
            ttl,
            max_age,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(reserved::USE_CACHE.into(), Value::Bool(self.use_cache));
        if let Some(ttl) = self.ttl {
            map.insert(reserved::TTL.into(), Value::from(ttl.as_secs_f64()));
        }
        if let Some(max_age) = self.max_age {
            map.insert(reserved::S_MAXAGE.into(), Value::from(max_age));
        }
        Value::Object(map)
    }
}

/// Keyword arguments of a single model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallArgs {
    params: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(params: Map<String, Value>) -> Self {
        Self { params }
    }

    /// Builds from a JSON object; returns `None` for any other value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(params) => Some(Self { params }),
            _ => None,
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_cache_control(self, control: &CacheControl) -> Self {
        self.with(reserved::CACHE, control.to_value())
    }

    pub fn with_call_kind(self, kind: CallKind) -> Self {
        self.with(reserved::CALL_KIND, kind.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Like [`get`](Self::get) but treats explicit `null` as absent.
    pub fn get_non_null(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.params.iter()
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.params.get(reserved::METADATA).and_then(Value::as_object)
    }

    pub fn runtime_params(&self) -> Option<&Map<String, Value>> {
        self.params
            .get(reserved::RUNTIME_PARAMS)
            .and_then(Value::as_object)
    }

    pub fn cache_control(&self) -> CacheControl {
        CacheControl::from_value(self.params.get(reserved::CACHE))
    }

    /// Unknown tags are treated as "no kind" rather than rejected.
    pub fn call_kind(&self) -> Option<CallKind> {
        self.params
            .get(reserved::CALL_KIND)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// An explicit key, either `cache_key` or `runtime_params.preset_cache_key`.
    pub fn key_override(&self) -> Option<&str> {
        self.params
            .get(reserved::CACHE_KEY)
            .and_then(Value::as_str)
            .or_else(|| {
                self.runtime_params()?
                    .get(reserved::PRESET_CACHE_KEY)
                    .and_then(Value::as_str)
            })
    }

    /// Per-call namespace override from `metadata.namespace`, or its older
    /// spelling `metadata.redis_namespace`.
    pub fn namespace_override(&self) -> Option<&str> {
        let metadata = self.metadata()?;
        [reserved::NAMESPACE, reserved::REDIS_NAMESPACE]
            .iter()
            .find_map(|name| metadata.get(*name).and_then(Value::as_str))
    }

    /// The `input` parameter when it is a list, as used by batch embedding calls.
    pub fn input_list(&self) -> Option<&Vec<Value>> {
        self.params.get("input").and_then(Value::as_array)
    }

    /// Copy of these arguments with `input` replaced and any key override dropped.
    pub fn with_input(&self, input: Value) -> Self {
        let mut params = self.params.clone();
        params.insert("input".into(), input);
        params.remove(reserved::CACHE_KEY);
        if let Some(Value::Object(runtime)) = params.get_mut(reserved::RUNTIME_PARAMS) {
            runtime.remove(reserved::PRESET_CACHE_KEY);
        }
        Self { params }
    }
}

impl From<Map<String, Value>> for CallArgs {
    fn from(params: Map<String, Value>) -> Self {
        Self::from_map(params)
    }
}
