//! Cache key derivation.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::types::call::{reserved, CallArgs};

/// Chat / text completion parameters. Also covers `model` and `user` for every other kind.
pub const COMPLETION_PARAMS: &[&str] = &[
    "model",
    "messages",
    "prompt",
    "temperature",
    "top_p",
    "n",
    "stop",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "user",
    "response_format",
    "seed",
    "tools",
    "tool_choice",
    "stream",
];

pub const EMBEDDING_PARAMS: &[&str] = &["input", "encoding_format"];

pub const TRANSCRIPTION_PARAMS: &[&str] = &["file", "language"];

pub const RERANK_PARAMS: &[&str] = &[
    "top_n",
    "rank_fields",
    "return_documents",
    "max_chunks_per_doc",
    "documents",
    "query",
];

/// Parameters that steer how a call is made but never what it returns.
pub const PLUMBING_PARAMS: &[&str] = &[
    reserved::METADATA,
    reserved::RUNTIME_PARAMS,
    reserved::CACHE,
    reserved::CACHE_KEY,
    reserved::CALL_KIND,
    "api_key",
    "api_base",
    "base_url",
    "api_version",
    "organization",
    "custom_llm_provider",
    "timeout",
    "request_timeout",
    "num_retries",
    "max_retries",
    "fallbacks",
    "context_window_fallback_dict",
    "headers",
    "extra_headers",
    "proxy_url",
    "mock_response",
    "caching",
    "no-log",
    "model_list",
    "input_cost_per_token",
    "output_cost_per_token",
    "input_cost_per_second",
    "output_cost_per_second",
    "tags",
];

/// Parameters that feed the key, in hashing order.
pub static ALLOW_LIST: Lazy<Vec<&'static str>> = Lazy::new(|| {
    COMPLETION_PARAMS
        .iter()
        .chain(EMBEDDING_PARAMS)
        .chain(TRANSCRIPTION_PARAMS)
        .chain(RERANK_PARAMS)
        .copied()
        .collect()
});

static ALLOW_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| ALLOW_LIST.iter().copied().collect());

static PLUMBING_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| PLUMBING_PARAMS.iter().copied().collect());

/// A derived (or caller-supplied) cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace prefix, if the key has one.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Turns call arguments into a [`CacheKey`].
///
/// Parameters are concatenated in allow-list order (completion, embedding,
/// transcription, rerank), never in the caller's insertion order, then hashed
/// with SHA-256.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    namespace: Option<String>,
    include_provider_specific_params: bool,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Also hash non-plumbing parameters outside the allow-list (e.g. `top_k`).
    pub fn with_provider_specific_params(mut self, include: bool) -> Self {
        self.include_provider_specific_params = include;
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    pub fn derive(&self, args: &CallArgs) -> CacheKey {
        if let Some(key) = args.key_override() {
            tracing::trace!(key, "using caller-supplied cache key");
            return CacheKey::new(key);
        }

        let canonical = self.canonical_string(args);
        let digest = sha256_hex(&canonical);

        match args.namespace_override().or(self.namespace.as_deref()) {
            Some(ns) => CacheKey::new(format!("{}:{}", ns, digest)),
            None => CacheKey::new(digest),
        }
    }

    /// Pre-hash form of the key. Exposed for debugging key collisions.
    pub fn canonical_string(&self, args: &CallArgs) -> String {
        let mut out = String::new();
        for &name in ALLOW_LIST.iter() {
            let value = match name {
                // present-but-null still resolves through metadata
                "model" => args.get(name).and_then(|model| model_value(args, model)),
                "file" => args.get(name).map(|file| file_value(args, file)),
                _ => args.get_non_null(name).map(render),
            };
            if let Some(value) = value {
                push_segment(&mut out, name, &value);
            }
        }

        if self.include_provider_specific_params {
            for (name, value) in args.iter() {
                let name = name.as_str();
                if ALLOW_SET.contains(name) || PLUMBING_SET.contains(name) || value.is_null() {
                    continue;
                }
                push_segment(&mut out, name, &render(value));
            }
        }
        out
    }
}

fn push_segment(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{}: {}", name, value);
}

/// Strings render raw, everything else as compact JSON (object keys sorted).
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Metadata lookups: `runtime_params.metadata` wins over top-level `metadata`.
fn metadata_field<'a>(args: &'a CallArgs, field: &str) -> Option<&'a Value> {
    let nested = args
        .runtime_params()
        .and_then(|p| p.get(reserved::METADATA))
        .and_then(Value::as_object)
        .and_then(|m| m.get(field))
        .filter(|v| !v.is_null());
    nested.or_else(|| {
        args.metadata()
            .and_then(|m| m.get(field))
            .filter(|v| !v.is_null())
    })
}

/// Caching group containing `model_group`, else `model_group`, else the literal model.
fn model_value(args: &CallArgs, model: &Value) -> Option<String> {
    let model_group = metadata_field(args, reserved::MODEL_GROUP).and_then(Value::as_str);
    let Some(model_group) = model_group else {
        return (!model.is_null()).then(|| render(model));
    };
    let group = metadata_field(args, reserved::CACHING_GROUPS)
        .and_then(Value::as_array)
        .and_then(|groups| {
            groups.iter().find(|group| {
                group
                    .as_array()
                    .is_some_and(|members| members.iter().any(|m| m.as_str() == Some(model_group)))
            })
        });
    Some(match group {
        Some(group) => group.to_string(),
        None => model_group.to_string(),
    })
}

fn file_value(args: &CallArgs, file: &Value) -> String {
    let from_map = |map: Option<&Map<String, Value>>, field: &str| {
        map.and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let handle_name = match file {
        Value::String(path) => Some(path.clone()),
        Value::Object(handle) => handle.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    from_map(args.metadata(), reserved::FILE_CHECKSUM)
        .or(handle_name)
        .or_else(|| from_map(args.metadata(), reserved::FILE_NAME))
        .or_else(|| from_map(args.runtime_params(), reserved::FILE_NAME))
        .unwrap_or_else(|| "None".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_args() -> CallArgs {
        CallArgs::new()
            .with("model", "gpt-4o")
            .with("messages", json!([{"role": "user", "content": "hi"}]))
            .with("temperature", 0.2)
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = KeyBuilder::new().derive(&chat_args());
        assert_eq!(key.as_str().len(), 64);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key.namespace(), None);
    }

    #[test]
    fn test_canonical_string_uses_allow_list_order() {
        let args = CallArgs::new()
            .with("temperature", 0.2)
            .with("model", "gpt-4o")
            .with("messages", "hi");
        assert_eq!(
            KeyBuilder::new().canonical_string(&args),
            "model: gpt-4omessages: hitemperature: 0.2"
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut a = Map::new();
        a.insert("model".into(), json!("gpt-4o"));
        a.insert("max_tokens".into(), json!(200));
        a.insert("temperature".into(), json!(0.2));
        let mut b = Map::new();
        b.insert("temperature".into(), json!(0.2));
        b.insert("max_tokens".into(), json!(200));
        b.insert("model".into(), json!("gpt-4o"));

        let builder = KeyBuilder::new();
        assert_eq!(
            builder.derive(&CallArgs::from_map(a)),
            builder.derive(&CallArgs::from_map(b))
        );
    }

    #[test]
    fn test_null_and_plumbing_params_are_ignored() {
        let builder = KeyBuilder::new().with_provider_specific_params(true);
        let noisy = chat_args()
            .with("seed", Value::Null)
            .with("api_key", "sk-secret")
            .with("metadata", json!({"trace_id": "abc"}))
            .with("timeout", 30);
        assert_eq!(builder.derive(&noisy), builder.derive(&chat_args()));
    }

    #[test]
    fn test_different_sampling_gives_different_key() {
        let builder = KeyBuilder::new();
        let hot = chat_args().with("temperature", 0.9);
        assert_ne!(builder.derive(&hot), builder.derive(&chat_args()));
    }

    #[test]
    fn test_provider_specific_params_are_flagged() {
        let with_top_k = chat_args().with("top_k", 40);

        let off = KeyBuilder::new();
        assert_eq!(off.derive(&with_top_k), off.derive(&chat_args()));

        let on = KeyBuilder::new().with_provider_specific_params(true);
        assert_ne!(on.derive(&with_top_k), on.derive(&chat_args()));
        assert!(on.canonical_string(&with_top_k).ends_with("top_k: 40"));
    }

    #[test]
    fn test_caching_group_collapses_models() {
        let groups = json!([["gpt-4", "gpt-4-0613"], ["claude-3", "claude-3-opus"]]);
        let a = chat_args()
            .with("model", "azure/gpt-4")
            .with("metadata", json!({"model_group": "gpt-4", "caching_groups": groups}));
        let b = chat_args()
            .with("model", "openai/gpt-4-0613")
            .with("metadata", json!({"model_group": "gpt-4-0613", "caching_groups": groups}));

        let builder = KeyBuilder::new();
        assert_eq!(builder.derive(&a), builder.derive(&b));
        assert!(builder
            .canonical_string(&a)
            .starts_with(r#"model: ["gpt-4","gpt-4-0613"]"#));
    }

    #[test]
    fn test_runtime_metadata_overrides_top_level() {
        let args = chat_args()
            .with("metadata", json!({"model_group": "top"}))
            .with("runtime_params", json!({"metadata": {"model_group": "nested"}}));
        assert!(KeyBuilder::new()
            .canonical_string(&args)
            .starts_with("model: nested"));
    }

    #[test]
    fn test_model_group_without_caching_group() {
        let args = chat_args().with("metadata", json!({"model_group": "gpt-4-pool"}));
        assert!(KeyBuilder::new()
            .canonical_string(&args)
            .starts_with("model: gpt-4-pool"));
    }

    #[test]
    fn test_null_model_still_resolves_model_group() {
        let builder = KeyBuilder::new();
        let metadata = json!({"model_group": "gpt-4-pool"});
        let unnamed = chat_args()
            .with("model", Value::Null)
            .with("metadata", metadata.clone());
        let named = chat_args()
            .with("model", "azure/gpt-4-deployment")
            .with("metadata", metadata);
        assert_eq!(builder.derive(&unnamed), builder.derive(&named));
        assert!(builder
            .canonical_string(&unnamed)
            .starts_with("model: gpt-4-pool"));

        let bare = chat_args().with("model", Value::Null);
        assert!(!builder.canonical_string(&bare).contains("model:"));
    }

    #[test]
    fn test_file_value_priority() {
        let builder = KeyBuilder::new();
        let base = CallArgs::new().with("model", "whisper-1");

        let args = base
            .clone()
            .with("file", json!({"name": "call.wav"}))
            .with("metadata", json!({"file_checksum": "c0ffee", "file_name": "meta.wav"}));
        assert!(builder.canonical_string(&args).contains("file: c0ffee"));

        let args = base
            .clone()
            .with("file", json!({"name": "call.wav"}))
            .with("metadata", json!({"file_name": "meta.wav"}));
        assert!(builder.canonical_string(&args).contains("file: call.wav"));

        let args = base
            .clone()
            .with("file", json!({}))
            .with("metadata", json!({"file_name": "meta.wav"}));
        assert!(builder.canonical_string(&args).contains("file: meta.wav"));

        let args = base
            .clone()
            .with("file", json!({}))
            .with("runtime_params", json!({"file_name": "param.wav"}));
        assert!(builder.canonical_string(&args).contains("file: param.wav"));

        let args = base.with("file", json!({}));
        assert!(builder.canonical_string(&args).contains("file: None"));
    }

    #[test]
    fn test_namespace_prefix_and_override() {
        let builder = KeyBuilder::new().with_namespace("ns");
        let key = builder.derive(&chat_args());
        assert!(key.as_str().starts_with("ns:"));
        assert_eq!(key.namespace(), Some("ns"));

        let overridden = chat_args().with("metadata", json!({"namespace": "tenant-a"}));
        let key = builder.derive(&overridden);
        assert!(key.as_str().starts_with("tenant-a:"));
        assert_eq!(
            key.as_str().trim_start_matches("tenant-a:"),
            KeyBuilder::new().derive(&chat_args()).as_str()
        );
    }

    #[test]
    fn test_key_override_short_circuits() {
        let builder = KeyBuilder::new().with_namespace("ns");
        let args = chat_args().with("runtime_params", json!({"preset_cache_key": "abc123"}));
        assert_eq!(builder.derive(&args).as_str(), "abc123");
    }

    #[test]
    fn test_nested_mappings_are_order_independent() {
        let builder = KeyBuilder::new();
        let a: CallArgs = serde_json::from_str(
            r#"{"model":"m","response_format":{"type":"json_schema","strict":true}}"#,
        )
        .unwrap();
        let b: CallArgs = serde_json::from_str(
            r#"{"response_format":{"strict":true,"type":"json_schema"},"model":"m"}"#,
        )
        .unwrap();
        assert_eq!(builder.derive(&a), builder.derive(&b));
    }
}
