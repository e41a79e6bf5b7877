use thiserror::Error;

/// Structured error context for cache faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Cache key or configuration field involved (e.g. "ns:3f2a...", "config.kind")
    pub field_path: Option<String>,
    /// Additional context about the error
    pub details: Option<String>,
    /// Component that raised the error (e.g. "memory", "registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache layer.
///
/// Only [`Error::Configuration`] ever reaches callers of the hot path
/// (construction time). Everything else is absorbed by
/// [`ResponseCache`](crate::cache::ResponseCache) and turned into a miss or a no-op.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend unavailable: {message}{}", format_context(.context))]
    BackendUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend timed out after {elapsed_ms}ms{}", format_context(.context))]
    BackendTimeout {
        elapsed_ms: u64,
        context: ErrorContext,
    },

    #[error("Stored payload could not be decoded: {message}{}", format_context(.context))]
    Decode {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend '{backend}' does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// A backend could not be reached or its internal state is unusable.
    pub fn backend_unavailable(backend: &str, msg: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            message: msg.into(),
            context: ErrorContext::new().with_source(backend),
        }
    }

    pub fn backend_timeout(backend: &str, elapsed_ms: u64) -> Self {
        Error::BackendTimeout {
            elapsed_ms,
            context: ErrorContext::new().with_source(backend),
        }
    }

    pub fn decode_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Decode {
            message: msg.into(),
            context,
        }
    }

    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Error::Unsupported { backend, operation }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::BackendUnavailable { context, .. }
            | Error::BackendTimeout { context, .. }
            | Error::Decode { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Short, stable label used in diagnostics and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "configuration",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::BackendTimeout { .. } => "backend_timeout",
            Error::Decode { .. } => "decode",
            Error::Unsupported { .. } => "unsupported",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::decode_with_context(
            "not json",
            ErrorContext::new()
                .with_field_path("ns:abc")
                .with_source("freshness"),
        );
        let text = err.to_string();
        assert!(text.contains("not json"));
        assert!(text.contains("field: ns:abc"));
        assert!(text.contains("source: freshness"));
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_unsupported_has_no_context() {
        let err = Error::unsupported("disk", "pipeline_write");
        assert!(err.context().is_none());
        assert_eq!(
            err.to_string(),
            "Backend 'disk' does not support pipeline_write"
        );
    }
}
