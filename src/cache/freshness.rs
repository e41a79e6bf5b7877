//! Freshness checks and payload decoding for stored entries.

use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, ErrorContext, Result};

/// Outcome of checking a stored value against a max-age.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Response payload, exactly as it was written.
    Fresh(Value),
    /// Entry is older than the caller's max-age.
    Stale { age: f64 },
}

/// Seconds since the unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Check `stored` against `max_age` (seconds) at time `now`.
///
/// Values written by this crate look like `{"timestamp": f64, "response": ..}`
/// and the `response` is returned untouched. A backend that hands back its
/// payload as text (the record serialized to a string) is decoded first, see
/// [`decode_stored`]. Anything without a `timestamp` is passed through, since
/// there is nothing to age it by.
pub fn evaluate(stored: Value, max_age: Option<f64>, now: f64) -> Result<Freshness> {
    let stored = match stored {
        Value::String(text) => decode_stored(text)?,
        other => other,
    };
    let Value::Object(mut record) = stored else {
        return Ok(Freshness::Fresh(stored));
    };
    let Some(timestamp) = record.get("timestamp") else {
        return Ok(Freshness::Fresh(Value::Object(record)));
    };
    let timestamp = timestamp.as_f64().ok_or_else(|| {
        Error::decode_with_context(
            "timestamp is not a number",
            ErrorContext::new()
                .with_field_path("timestamp")
                .with_source("freshness"),
        )
    })?;

    let age = now - timestamp;
    if let Some(max_age) = max_age {
        if age > max_age {
            return Ok(Freshness::Stale { age });
        }
    }

    match record.remove("response") {
        Some(response) if !response.is_null() => Ok(Freshness::Fresh(response)),
        _ => Err(Error::decode_with_context(
            "stored entry has no response",
            ErrorContext::new()
                .with_field_path("response")
                .with_source("freshness"),
        )),
    }
}

/// Decode a payload a backend returned as text.
///
/// Tried as JSON first, then, if it looks like a record (`{..}` / `[..]`), with
/// a permissive YAML flow parse that also accepts single-quoted literals.
/// Other text is returned verbatim.
pub fn decode_stored(text: String) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return Ok(value);
    }
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Ok(Value::String(text));
    }
    serde_yaml::from_str::<Value>(&text).map_err(|e| {
        Error::decode_with_context(
            e.to_string(),
            ErrorContext::new()
                .with_field_path("response")
                .with_details("neither JSON nor a literal record")
                .with_source("freshness"),
        )
    })
}
