//! HTTP router and handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{debug, warn};

use crate::Error;
use crate::config::Config;
use crate::fetch::GuardedClient;
use crate::guard::{FieldGuard, PathParams, guard_body_and_query, guard_path_params};
use crate::security::{PatternSanitizer, SsrfGuard, TextSanitizer};

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// Request field guard shared by both middleware stages
    pub field_guard: Arc<FieldGuard>,
    /// Outbound client behind the SSRF guard
    pub client: GuardedClient,
    /// Request body limit
    pub max_body_bytes: usize,
}

impl AppState {
    /// Build state from configuration with the system resolver
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the sanitizer policy is invalid.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let sanitizer = Arc::new(PatternSanitizer::new(config.sanitizer.policy()?));
        let guard = SsrfGuard::new(config.ssrf.resolve_timeout);
        Ok(Self::new(sanitizer, guard, config))
    }

    /// Build state from explicit components
    pub fn new(sanitizer: Arc<dyn TextSanitizer>, guard: SsrfGuard, config: &Config) -> Self {
        Self {
            field_guard: Arc::new(FieldGuard::new(sanitizer, config.server.max_body_bytes)),
            client: GuardedClient::new(guard, &config.ssrf),
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let field_guard = Arc::clone(&state.field_guard);

    Router::new()
        .route("/health", get(health_handler))
        .route("/echo", get(echo_handler).post(echo_handler))
        .route("/items/{id}", get(item_handler))
        .route("/preview", post(preview_handler))
        // Runs after routing, so the matched path parameters are known
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&field_guard),
            guard_path_params,
        ))
        // Bodies the guard leaves unbuffered are still capped for handlers
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(field_guard, guard_body_and_query))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Echo handler (GET|POST /echo) - returns the guarded query and body
async fn echo_handler(Query(query): Query<BTreeMap<String, String>>, body: Bytes) -> Response {
    let body = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Echo body is not JSON");
                return error_response(StatusCode::BAD_REQUEST, "Body must be JSON");
            }
        }
    };

    Json(json!({ "query": query, "body": body })).into_response()
}

/// Item handler (GET /items/{id}) - returns the guarded path parameters
async fn item_handler(params: PathParams) -> impl IntoResponse {
    let params: Map<String, Value> = params
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();

    Json(json!({ "params": params }))
}

/// Preview request body
#[derive(Debug, Deserialize)]
struct PreviewRequest {
    url: String,
}

/// Preview handler (POST /preview) - fetches a caller-supplied URL
async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Response {
    match state.client.get(&request.url).await {
        Ok(fetched) => Json(fetched).into_response(),
        Err(Error::UrlDenied) => error_response(StatusCode::FORBIDDEN, "URL not allowed"),
        Err(e) => {
            warn!(error = %e, "Preview fetch failed");
            error_response(StatusCode::BAD_GATEWAY, "Upstream fetch failed")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
