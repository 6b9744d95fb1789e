//! Axum-based HTTP gateway for the authentication API.
//!
//! - Proper HTTP/1.1 parsing and compliance (hyper)
//! - Request body size limits (64KB max)
//! - Request timeouts (30s) to prevent slow-loris abuse
//! - Permissive CORS for browser clients

use crate::auth::flow::CreateUserError;
use crate::auth::{AuthFlow, LoginRequest, SqliteTokenStore, SqliteUserStore};
use crate::config::Config;
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// How often expired access tokens are swept from the store.
const TOKEN_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AuthFlow>,
    pub allow_registration: bool,
}

/// Run the HTTP gateway.
pub async fn run_gateway(host: &str, port: u16, config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();

    std::fs::create_dir_all(&config.workspace_dir)?;
    let db_path = config.database_path();
    let users = Arc::new(SqliteUserStore::open(&db_path)?);
    let tokens = Arc::new(SqliteTokenStore::open(
        &db_path,
        Some(config.auth.token_ttl_secs),
    )?);
    tracing::info!(db = %db_path.display(), "auth stores initialized");

    // Periodic sweep of expired access tokens
    let sweep_store = Arc::clone(&tokens);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TOKEN_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match sweep_store.sweep_expired() {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "swept expired access tokens");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("token sweep failed: {e}"),
            }
        }
    });

    let flow = Arc::new(AuthFlow::new(
        users,
        tokens,
        config.auth.allow_existing_session,
    ));
    let state = AppState {
        flow,
        allow_registration: config.auth.allow_registration,
    };

    println!("🔐 authgate listening on http://{host}:{actual_port}");
    println!("  POST /register  — {{\"email\", \"password\"}} → create account + bearer token");
    println!("  POST /login     — {{\"email\", \"password\"}} → verify credentials + bearer token");
    println!("  GET  /health    — health check");
    if config.auth.allow_existing_session {
        println!("  A valid Authorization: Bearer <token> on /login short-circuits verification.");
    }
    println!("  Press Ctrl+C to stop.\n");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the gateway router with its middleware stack.
pub fn router(state: AppState) -> Router {
    // CORS — allow web clients to connect from any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}

/// Request body for registration and login.
#[derive(Deserialize)]
struct CredentialsBody {
    email: String,
    password: String,
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// GET /health — always public.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /register — create a new user account and issue its first token.
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<CredentialsBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if !state.allow_registration {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Registration is disabled"})),
        )
            .into_response();
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            )
                .into_response();
        }
    };

    match state.flow.register(&body.email, &body.password).await {
        Ok(result) => (StatusCode::CREATED, Json(result)).into_response(),
        Err(e) => match e.downcast_ref::<CreateUserError>() {
            Some(CreateUserError::EmailTaken(_)) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response(),
            Some(CreateUserError::InvalidEmail(_) | CreateUserError::WeakPassword) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response(),
            Some(CreateUserError::Store(_)) | None => {
                tracing::error!("registration failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Registration failed"})),
                )
                    .into_response()
            }
        },
    }
}

/// POST /login — verify credentials (or an existing session) and issue a
/// bearer token. A failed verification keeps the uniform response shape but
/// maps to 401.
async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CredentialsBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            )
                .into_response();
        }
    };

    let request = LoginRequest {
        email: body.email,
        password: body.password,
        session_token: extract_bearer_token(&headers).map(str::to_owned),
    };

    match state.flow.login(&request).await {
        Ok(result) if result.succeeded() => (StatusCode::OK, Json(result)).into_response(),
        Ok(result) => (StatusCode::UNAUTHORIZED, Json(result)).into_response(),
        Err(e) => {
            tracing::error!("login failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Login failed"})),
            )
                .into_response()
        }
    }
}
