// SSE streaming support for API responses

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;

const WORDS_PER_CHUNK: usize = 8;

/// Split completed content into word groups so a non-streaming upstream
/// response can still be delivered as chat.completion.chunk events.
pub fn chunk_content(content: &str) -> Vec<String> {
    let words: Vec<&str> = content.split_inclusive(char::is_whitespace).collect();
    words
        .chunks(WORDS_PER_CHUNK)
        .map(|group| group.concat())
        .collect()
}

/// Render a full chat-completion response as an OpenAI-compatible SSE
/// stream, ending with a finish_reason chunk and `[DONE]`.
pub fn openai_response_to_sse(
    response: &Value,
    model: &str,
    request_id: &str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .and_then(|r| r.as_str())
        .unwrap_or("stop")
        .to_string();

    let chunks = chunk_content(&content);
    let model = model.to_string();
    let request_id = request_id.to_string();

    let stream = async_stream::stream! {
        for (i, content) in chunks.into_iter().enumerate() {
            let chunk = json!({
                "id": format!("chatcmpl-{}", request_id),
                "object": "chat.completion.chunk",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{
                    "index": 0,
                    "delta": {
                        "role": if i == 0 { Some("assistant") } else { None::<&str> },
                        "content": content
                    },
                    "finish_reason": null
                }]
            });

            yield Ok(Event::default().data(chunk.to_string()));
        }

        let final_chunk = json!({
            "id": format!("chatcmpl-{}", request_id),
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": finish_reason
            }]
        });

        yield Ok(Event::default().data(final_chunk.to_string()));
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_preserves_the_full_content() {
        let content = "one two three four five six seven eight nine ten";
        let chunks = chunk_content(content);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_content("").is_empty());
    }
}
