// HTTP API Server module

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

use crate::providers::ProviderRegistry;
use crate::rotation::TokenRotator;

mod handlers;
pub mod monitoring;
pub mod request_log;
pub mod streaming;

static SERVER_HANDLE: OnceCell<RwLock<Option<oneshot::Sender<()>>>> = OnceCell::new();

/// Everything the handlers need, owned by the composition root and cloned
/// per request. The rotator is `None` when the env store could not be read
/// at startup; monitoring endpoints answer 503 in that case.
#[derive(Clone)]
pub struct AppState {
    pub rotator: Option<Arc<TokenRotator>>,
    pub providers: Arc<ProviderRegistry>,
}

/// API Key authentication middleware
async fn auth_middleware(request: Request<Body>, next: Next) -> Response {
    let config = crate::config::get_config().unwrap_or_default();

    // If no API keys configured, allow all requests
    if config.api_keys.is_empty() {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let is_valid = match auth_header {
        Some(auth) => {
            // Support both "Bearer <key>" and raw key
            let key = auth.strip_prefix("Bearer ").unwrap_or(auth);
            config.api_keys.contains(&key.to_string())
        }
        None => false,
    };

    if is_valid {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [("Content-Type", "application/json")],
            r#"{"error":{"message":"Invalid API key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        )
            .into_response()
    }
}

pub async fn start_server(state: AppState) -> Result<()> {
    let config = crate::config::get_config().unwrap_or_default();

    let host = if config.host.is_empty() {
        "0.0.0.0"
    } else {
        &config.host
    };
    let addr = format!("{}:{}", host, config.port);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // Routes that require API key authentication
    let protected_routes = Router::new()
        .route("/v1/models", get(handlers::openai_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .layer(middleware::from_fn(auth_middleware));

    // Monitoring and management surface (internal use)
    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/v1/tokens/stats", get(monitoring::token_stats))
        .route("/v1/tokens/rotate", post(monitoring::rotate_token))
        .route("/v1/tokens/reset-stats", post(monitoring::reset_token_stats))
        .route("/v1/providers/:name/rotate", post(monitoring::rotate_provider))
        .route("/v1/restart", post(monitoring::restart_service))
        .route("/v1/logs", get(monitoring::get_logs))
        .route("/v1/logs", delete(monitoring::clear_logs))
        .route("/management/status", get(monitoring::get_server_status))
        .route("/management/config", get(monitoring::get_config))
        .route("/management/config", put(monitoring::update_config));

    let app = Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    let (tx, rx) = oneshot::channel::<()>();

    SERVER_HANDLE
        .get_or_init(|| RwLock::new(None))
        .write()
        .replace(tx);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await?;

    Ok(())
}

pub async fn stop_server() -> Result<()> {
    if let Some(lock) = SERVER_HANDLE.get() {
        if let Some(tx) = lock.write().take() {
            let _ = tx.send(());
            tracing::info!("API server stopped");
        }
    }
    Ok(())
}

pub fn is_server_running() -> bool {
    SERVER_HANDLE
        .get()
        .map(|lock| lock.read().is_some())
        .unwrap_or(false)
}
