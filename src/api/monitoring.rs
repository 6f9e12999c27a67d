// Monitoring and token management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::config;
use crate::rotation::FailureReason;

use super::{request_log, AppState};

/// Display form of a secret: last eight characters only.
fn mask(secret: &str) -> String {
    if secret.len() >= 8 {
        format!("***{}", &secret[secret.len() - 8..])
    } else {
        "***".to_string()
    }
}

fn rotator_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Token rotator not initialized" })),
    )
        .into_response()
}

/// GET /v1/tokens/stats
pub async fn token_stats(State(state): State<AppState>) -> Response {
    let rotator = match &state.rotator {
        Some(rotator) => rotator,
        None => return rotator_unavailable(),
    };

    Json(json!({
        "current_token": rotator.current_key(),
        "total_tokens": rotator.len(),
        "tokens": rotator.get_stats(),
    }))
    .into_response()
}

/// POST /v1/tokens/rotate - manual forced rotation
pub async fn rotate_token(State(state): State<AppState>) -> Response {
    let rotator = match &state.rotator {
        Some(rotator) => rotator,
        None => return rotator_unavailable(),
    };

    let previous = rotator.current_secret();
    tracing::info!("manual token rotation requested");

    match rotator.rotate_to_next_token().await {
        Ok(rotated) => Json(json!({
            "success": true,
            "rotated": rotated,
            "previous_token": previous.as_deref().map(mask),
            "current_token": rotator.current_secret().as_deref().map(mask),
            "stats": rotator.get_stats(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// POST /v1/tokens/reset-stats - force every credential back to clean
pub async fn reset_token_stats(State(state): State<AppState>) -> Response {
    let rotator = match &state.rotator {
        Some(rotator) => rotator,
        None => return rotator_unavailable(),
    };

    rotator.reset_stats();
    Json(json!({ "success": true, "message": "Token stats reset" })).into_response()
}

/// POST /v1/restart - ask the external supervisor to bounce the service.
/// Separate from rotation on purpose; only for outages rotation cannot fix.
pub async fn restart_service(State(state): State<AppState>) -> Response {
    let rotator = match &state.rotator {
        Some(rotator) => rotator,
        None => return rotator_unavailable(),
    };

    let supervisor_enabled = config::get_config()
        .map(|c| c.supervisor.enabled)
        .unwrap_or(false);
    if !supervisor_enabled {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Supervisor integration is disabled" })),
        )
            .into_response();
    }

    match rotator.restart_server().await {
        Ok(()) => Json(json!({ "success": true, "message": "Service restart requested" }))
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// POST /v1/providers/{name}/rotate - manually rotate one adapter's pool
pub async fn rotate_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let provider = match state.providers.get(&name) {
        Some(provider) => provider,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "error": format!("Unknown provider: {}", name) })),
            )
                .into_response();
        }
    };

    provider.pool().mark_failure(FailureReason::RateLimited);
    Json(json!({
        "success": true,
        "message": "Token rotated successfully",
        "provider": name,
        "stats": provider.pool().stats(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /v1/logs - recent request log entries, newest first
pub async fn get_logs(Query(params): Query<LogsQuery>) -> Response {
    let limit = params.limit.unwrap_or(100);
    let logs = request_log::recent(limit);
    Json(json!({ "total": logs.len(), "logs": logs })).into_response()
}

/// DELETE /v1/logs
pub async fn clear_logs() -> Response {
    request_log::clear();
    Json(json!({ "success": true })).into_response()
}

/// GET /management/config
pub async fn get_config(State(_state): State<AppState>) -> Response {
    match config::get_config() {
        Some(cfg) => Json(json!(cfg)).into_response(),
        None => Json(json!({})).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_keys: Option<Vec<String>>,
    pub request_retry: Option<u32>,
}

/// PUT /management/config - update the mutable subset of the configuration
pub async fn update_config(
    State(_state): State<AppState>,
    Json(request): Json<UpdateConfigRequest>,
) -> Response {
    let mut cfg = config::get_config().unwrap_or_default();

    if let Some(host) = request.host {
        cfg.host = host;
    }
    if let Some(port) = request.port {
        cfg.port = port;
    }
    if let Some(api_keys) = request.api_keys {
        cfg.api_keys = api_keys;
    }
    if let Some(request_retry) = request.request_retry {
        cfg.request_retry = request_retry;
    }

    match config::update_config(cfg) {
        Ok(_) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("failed to save config: {}", e) })),
        )
            .into_response(),
    }
}

/// GET /management/status
pub async fn get_server_status(State(state): State<AppState>) -> Response {
    let running = super::is_server_running();
    let config = config::get_config();

    let mut status = json!({
        "running": running,
        "providers": state.providers.all().iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
    });

    if let Some(cfg) = config {
        let host = if cfg.host.is_empty() {
            "0.0.0.0".to_string()
        } else {
            cfg.host
        };
        let address = format!("{}:{}", host, cfg.port);
        status["port"] = json!(cfg.port);
        status["host"] = json!(host);
        if running {
            status["address"] = json!(address);
        }
    }

    Json(status).into_response()
}

#[cfg(test)]
mod tests {
    use super::mask;

    #[test]
    fn masked_secrets_show_only_the_tail() {
        assert_eq!(mask("gho_abcdefghij"), "***cdefghij");
        assert_eq!(mask("short"), "***");
    }
}
