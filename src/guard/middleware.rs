//! Axum middleware running the request field guard ahead of handlers.
//!
//! Two stages:
//! - [`guard_body_and_query`], installed with `Router::layer`, rewrites the
//!   query string and JSON / url-encoded bodies.
//! - [`guard_path_params`], installed with `Router::route_layer` so the
//!   matched route's parameters are known, publishes sanitized
//!   [`PathParams`] for handlers.
//!
//! Neither stage rejects a request because of its content: unparsable
//! bodies and queries are forwarded untouched for the handler to deal with.
//! The body stage only answers early when the body cannot be buffered at
//! all: 413 past `max_body_bytes`, 400 when the stream breaks mid-read.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequestParts, RawPathParams, Request, State, rejection::RawPathParamsRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        uri::PathAndQuery,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::fields::{PathParams, sanitize_body_fields, sanitize_param_fields, sanitize_query_fields};
use crate::security::TextSanitizer;

/// Shared state for both guard stages.
#[derive(Clone)]
pub struct FieldGuard {
    sanitizer: Arc<dyn TextSanitizer>,
    max_body_bytes: usize,
}

impl std::fmt::Debug for FieldGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldGuard")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl FieldGuard {
    /// Create a guard buffering at most `max_body_bytes` of request body
    pub fn new(sanitizer: Arc<dyn TextSanitizer>, max_body_bytes: usize) -> Self {
        Self {
            sanitizer,
            max_body_bytes,
        }
    }

    /// The sanitizer applied to every field
    pub fn sanitizer(&self) -> &dyn TextSanitizer {
        self.sanitizer.as_ref()
    }

    /// Rewrite the query string of `parts.uri` in place.
    fn rewrite_query(&self, parts: &mut Parts) {
        let Some(query) = parts.uri.query() else {
            return;
        };
        let Ok(mut pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) else {
            debug!("Query string not url-encoded, forwarding untouched");
            return;
        };

        let changed = sanitize_query_fields(&mut pairs, self.sanitizer());
        if changed == 0 {
            return;
        }
        debug!(fields = changed, surface = "query", "Sanitized request fields");

        match rebuild_uri(&parts.uri, &pairs) {
            Ok(uri) => parts.uri = uri,
            Err(e) => warn!(error = %e, "Failed to rebuild URI after query sanitization"),
        }
    }

    /// Rewrite a buffered body. Returns `None` when nothing changed.
    fn rewrite_body(&self, kind: BodyKind, bytes: &Bytes) -> Option<Vec<u8>> {
        match kind {
            BodyKind::Json => {
                let mut value: Value = serde_json::from_slice(bytes).ok()?;
                let changed = sanitize_body_fields(Some(&mut value), self.sanitizer());
                if changed == 0 {
                    return None;
                }
                debug!(fields = changed, surface = "body", "Sanitized request fields");
                serde_json::to_vec(&value).ok()
            }
            BodyKind::Form => {
                let mut pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).ok()?;
                // Form bodies are flat string maps, same shape as a query.
                let changed = sanitize_query_fields(&mut pairs, self.sanitizer());
                if changed == 0 {
                    return None;
                }
                debug!(fields = changed, surface = "body", "Sanitized request fields");
                serde_urlencoded::to_string(&pairs).ok().map(String::into_bytes)
            }
            BodyKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Other,
}

impl BodyKind {
    fn of(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mime = content_type.split(';').next().unwrap_or("").trim();

        if mime == "application/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime == "application/x-www-form-urlencoded" {
            Self::Form
        } else {
            Self::Other
        }
    }
}

/// Why a body could not be buffered.
#[derive(Debug)]
enum BufferError {
    /// More than the configured limit arrived
    TooLarge,
    /// The stream itself failed (client abort, broken connection)
    Read(axum::Error),
}

/// Collect a body, stopping as soon as it passes `limit` bytes.
async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, BufferError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BufferError::Read)?;
        if chunk.len() > limit - buf.len() {
            return Err(BufferError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}

fn rebuild_uri(uri: &Uri, pairs: &[(String, String)]) -> Result<Uri, String> {
    let query = serde_urlencoded::to_string(pairs).map_err(|e| e.to_string())?;
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{query}", uri.path())
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query =
        Some(PathAndQuery::try_from(path_and_query).map_err(|e| e.to_string())?);
    Uri::from_parts(parts).map_err(|e| e.to_string())
}

/// Body and query guard stage.
pub async fn guard_body_and_query(
    State(guard): State<Arc<FieldGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    guard.rewrite_query(&mut parts);

    let kind = BodyKind::of(&parts.headers);
    let body = if kind == BodyKind::Other {
        body
    } else {
        let bytes = match buffer_body(body, guard.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(BufferError::TooLarge) => {
                debug!(limit = guard.max_body_bytes, "Request body over limit");
                return body_too_large_response(guard.max_body_bytes);
            }
            Err(BufferError::Read(e)) => {
                warn!(error = %e, "Failed to read request body");
                return body_unreadable_response();
            }
        };

        match guard.rewrite_body(kind, &bytes) {
            Some(rewritten) => {
                parts
                    .headers
                    .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
                Body::from(rewritten)
            }
            None => Body::from(bytes),
        }
    };

    next.run(Request::from_parts(parts, body)).await
}

/// Path parameter guard stage.
pub async fn guard_path_params(
    State(guard): State<Arc<FieldGuard>>,
    raw: Result<RawPathParams, RawPathParamsRejection>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut params = match raw {
        Ok(raw) => PathParams(
            raw.iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        ),
        Err(e) => {
            debug!(error = %e, "No usable path parameters");
            PathParams::default()
        }
    };

    let changed = sanitize_param_fields(&mut params, guard.sanitizer());
    if changed > 0 {
        debug!(fields = changed, surface = "params", "Sanitized request fields");
    }

    request.extensions_mut().insert(params);
    next.run(request).await
}

impl<S> FromRequestParts<S> for PathParams
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<PathParams>().cloned().ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Path parameter guard is not installed on this route" })),
            )
                .into_response()
        })
    }
}

/// Create a 400 response when the body stream fails mid-read
fn body_unreadable_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Failed to read request body" })),
    )
        .into_response()
}

/// Create a 413 response when the body exceeds the buffering limit
fn body_too_large_response(limit: usize) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({
            "error": format!("Request body exceeds {limit} bytes")
        })),
    )
        .into_response()
}
