// API request handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config;
use crate::error::ProviderError;
use crate::providers::{atlas, copilot};

use super::{request_log, streaming, AppState};

// Root endpoint
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "OpenAI Multi-Provider Proxy",
        "endpoints": [
            "POST /v1/chat/completions",
            "POST /v1/completions",
            "GET /v1/models",
            "GET /v1/tokens/stats",
            "POST /v1/tokens/rotate",
            "POST /v1/tokens/reset-stats",
            "GET /v1/logs"
        ]
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

/// Aggregate model list across every registered provider, ids carrying the
/// provider's routing prefix.
pub async fn openai_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let mut models = Vec::new();
    for provider in state.providers.all() {
        for id in provider.model_ids() {
            models.push(ModelInfo {
                id: format!("{}{}", provider.model_prefix(), id),
                object: "model".to_string(),
                created: 1677610602,
                owned_by: provider.name().to_string(),
            });
        }
    }

    Json(ModelsResponse {
        object: "list".to_string(),
        data: models,
    })
}

fn error_response(status: u16, error_type: &str, message: String) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        code,
        Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status
            }
        })),
    )
        .into_response()
}

pub async fn chat_completions(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let started = std::time::Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let model = raw
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let stream = raw.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    match forward_chat(&state, &raw, &model).await {
        Ok(response) => {
            let duration = started.elapsed().as_millis() as u64;
            request_log::add("POST", "/v1/chat/completions", &model, 200, duration);
            if stream {
                streaming::openai_response_to_sse(&response, &model, &request_id).into_response()
            } else {
                Json(response).into_response()
            }
        }
        Err((status, error_type, message)) => {
            let duration = started.elapsed().as_millis() as u64;
            request_log::add("POST", "/v1/chat/completions", &model, status, duration);
            error_response(status, error_type, message)
        }
    }
}

/// Extract the prompt of a legacy completion request; OpenAI allows both a
/// string and an array of strings.
fn prompt_text(raw: &Value) -> String {
    match raw.get("prompt") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Legacy completions endpoint, bridged over the chat surface.
pub async fn completions(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let started = std::time::Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let model = raw
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut chat_body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt_text(&raw) }],
    });
    for field in ["temperature", "max_tokens", "top_p", "stop"] {
        if let Some(value) = raw.get(field) {
            chat_body[field] = value.clone();
        }
    }

    match forward_chat(&state, &chat_body, &model).await {
        Ok(response) => {
            let duration = started.elapsed().as_millis() as u64;
            request_log::add("POST", "/v1/completions", &model, 200, duration);

            let text = response
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            let finish_reason = response
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("finish_reason"))
                .and_then(|r| r.as_str())
                .unwrap_or("stop");

            Json(json!({
                "id": format!("cmpl-{}", request_id),
                "object": "text_completion",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{
                    "index": 0,
                    "text": text,
                    "finish_reason": finish_reason
                }],
                "usage": response.get("usage").cloned().unwrap_or(Value::Null)
            }))
            .into_response()
        }
        Err((status, error_type, message)) => {
            let duration = started.elapsed().as_millis() as u64;
            request_log::add("POST", "/v1/completions", &model, status, duration);
            error_response(status, error_type, message)
        }
    }
}

/// Resolve the provider for `model` and forward the request, retrying after
/// each rotation up to the configured attempt budget. Rotation itself is
/// invisible to the client; only exhaustion surfaces as an error.
async fn forward_chat(
    state: &AppState,
    body: &Value,
    model: &str,
) -> Result<Value, (u16, &'static str, String)> {
    let provider = state.providers.find_for_model(model).ok_or_else(|| {
        (
            400,
            "invalid_request_error",
            format!(
                "Model '{}' is not supported. Add credentials for a provider that serves it.",
                model
            ),
        )
    })?;

    let config = config::get_config().unwrap_or_default();
    let github_family = provider.name() == atlas::NAME || provider.name() == copilot::NAME;

    let mut attempt = 0u32;
    loop {
        match provider.chat_completions(body).await {
            Ok(response) => {
                if github_family {
                    if let Some(rotator) = &state.rotator {
                        if let Some(secret) = rotator.current_secret() {
                            rotator.record_success(&secret);
                        }
                    }
                }
                return Ok(response);
            }
            Err(ProviderError::RateLimited) => {
                // keep the process-wide rotator's bookkeeping in step for
                // the GitHub token family
                if github_family {
                    if let Some(rotator) = &state.rotator {
                        if let Some(secret) = rotator.current_secret() {
                            if let Err(e) = rotator.record_rate_limit_error(&secret).await {
                                tracing::error!("token rotator bookkeeping failed: {}", e);
                            }
                        }
                    }
                }

                attempt += 1;
                if attempt > config.request_retry {
                    return Err((
                        429,
                        "rate_limit_exceeded",
                        "Rate limit exceeded, credential rotated, please retry.".to_string(),
                    ));
                }
                let delay_ms =
                    (attempt as u64 * 500).min(config.max_retry_interval as u64 * 1_000);
                tracing::warn!(
                    "{}: rate limited, retry {}/{} in {}ms",
                    provider.name(),
                    attempt,
                    config.request_retry,
                    delay_ms
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            Err(ProviderError::NoCredential { provider }) => {
                return Err((
                    401,
                    "authentication_error",
                    format!("No valid {} credentials found.", provider),
                ));
            }
            Err(ProviderError::Upstream { status, message }) => {
                return Err((status, "api_error", message));
            }
            Err(ProviderError::Http(e)) => {
                return Err((502, "api_error", format!("upstream request failed: {}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRegistry;
    use std::sync::Arc;

    #[test]
    fn prompt_accepts_string_or_array() {
        assert_eq!(prompt_text(&json!({ "prompt": "hello" })), "hello");
        assert_eq!(prompt_text(&json!({ "prompt": ["a", "b"] })), "a\nb");
        assert_eq!(prompt_text(&json!({})), "");
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_any_upstream_call() {
        let state = AppState {
            rotator: None,
            providers: Arc::new(ProviderRegistry::new()),
        };
        let body = json!({ "model": "unknown", "messages": [] });

        let err = forward_chat(&state, &body, "unknown").await.unwrap_err();
        assert_eq!(err.0, 400);
        assert_eq!(err.1, "invalid_request_error");
    }
}
