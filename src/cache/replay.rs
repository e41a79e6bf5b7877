//! Replays a cached chat completion as streaming deltas.

use futures::stream::{self, Stream};
use serde_json::{json, Value};

/// Characters per replayed delta.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// Split `choices[0].message.content` into `{"choices":[{"delta":..}]}` chunks.
///
/// `None` when the response is not a chat completion with text content.
/// Chunks are cut on character boundaries; a `chunk_size` of 0 is treated as 1.
pub fn stream_chunks(response: &Value, chunk_size: usize) -> Option<Vec<Value>> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)?;
    let chars: Vec<char> = content.chars().collect();
    Some(
        chars
            .chunks(chunk_size.max(1))
            .map(|chunk| delta(chunk.iter().collect()))
            .collect(),
    )
}

/// [`stream_chunks`] as a stream, for callers that consume provider streams.
pub fn replay_stream(response: &Value, chunk_size: usize) -> Option<impl Stream<Item = Value>> {
    stream_chunks(response, chunk_size).map(stream::iter)
}

fn delta(content: String) -> Value {
    json!({"choices": [{"delta": {"role": "assistant", "content": content}}]})
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    fn contents(chunks: &[Value]) -> Vec<&str> {
        chunks
            .iter()
            .map(|c| c.pointer("/choices/0/delta/content").and_then(Value::as_str).unwrap())
            .collect()
    }

    #[test]
    fn test_content_is_split_into_fixed_deltas() {
        let chunks = stream_chunks(&completion("Hello, world!"), DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(contents(&chunks), vec!["Hello", ", wor", "ld!"]);
        assert_eq!(
            chunks[0],
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hello"}}]})
        );
    }

    #[test]
    fn test_multibyte_content_splits_on_chars() {
        let chunks = stream_chunks(&completion("缓存命中了"), 2).unwrap();
        assert_eq!(contents(&chunks), vec!["缓存", "命中", "了"]);
    }

    #[test]
    fn test_non_chat_responses_have_no_replay() {
        assert!(stream_chunks(&json!({"data": [{"embedding": [0.1]}]}), 5).is_none());
        assert!(stream_chunks(&json!("plain text"), 5).is_none());
        assert_eq!(stream_chunks(&completion(""), 0), Some(vec![]));
    }

    #[tokio::test]
    async fn test_replay_stream_yields_every_chunk() {
        let stream = replay_stream(&completion("abcdefgh"), 3).unwrap();
        let chunks: Vec<Value> = stream.collect().await;
        assert_eq!(contents(&chunks), vec!["abc", "def", "gh"]);
    }
}
