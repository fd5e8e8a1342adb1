//! End-to-end tests of the request field guard and preview endpoint
//!
//! Drives the full router in-process:
//! - Body, query and path parameter sanitization
//! - Body size limit and broken body streams
//! - SSRF denial on `/preview` with a static resolver

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use input_guard::config::Config;
use input_guard::security::{PatternSanitizer, SsrfGuard, StaticResolver};
use input_guard::server::{AppState, create_router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app_with(config: &Config) -> Router {
    let resolver = StaticResolver::new()
        .with_host("internal.example", &["10.0.0.7".parse().unwrap()])
        .with_host("metadata.example", &["169.254.169.254".parse().unwrap()]);
    let guard = SsrfGuard::with_resolver(Arc::new(resolver), Duration::from_secs(1));
    let sanitizer = Arc::new(PatternSanitizer::new(config.sanitizer.policy().unwrap()));
    create_router(Arc::new(AppState::new(sanitizer, guard, config)))
}

fn app() -> Router {
    app_with(&Config::default())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_reachable() {
    let (status, body) = send(app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn body_fields_are_sanitized_before_the_handler() {
    let request = json_request(
        Method::POST,
        "/echo",
        &json!({ "name": "<img src=x onerror=alert(1)>", "age": 30 }),
    );
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    let name = body["body"]["name"].as_str().unwrap();
    assert!(!name.contains("onerror="));
    assert!(!name.contains('<'));
    assert_eq!(body["body"]["age"], json!(30));
}

#[tokio::test]
async fn nested_body_values_pass_through() {
    let request = json_request(
        Method::POST,
        "/echo",
        &json!({ "comment": "<script>alert(1)</script>Hello", "meta": { "raw": "<b>x</b>" } }),
    );
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["comment"], "Hello");
    assert_eq!(body["body"]["meta"], json!({ "raw": "<b>x</b>" }));
}

#[tokio::test]
async fn query_fields_are_sanitized() {
    let (status, body) = send(
        app(),
        get("/echo?q=%3Cscript%3Ex%3C%2Fscript%3Ehi&op=%24where&page=2"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["query"],
        json!({ "q": "hi", "op": "[FILTERED]", "page": "2" })
    );
    assert_eq!(body["body"], Value::Null);
}

#[tokio::test]
async fn path_params_are_sanitized() {
    let (status, body) = send(app(), get("/items/%3Cb%3E42%3C%2Fb%3E")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["params"], json!({ "id": "42" }));

    let (status, body) = send(app(), get("/items/select")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["params"], json!({ "id": "[FILTERED]" }));
}

#[tokio::test]
async fn configured_max_length_applies_to_fields() {
    let mut config = Config::default();
    config.sanitizer.max_length = 5;
    let request = json_request(Method::POST, "/echo", &json!({ "name": "abcdefghij" }));

    let (status, body) = send(app_with(&config), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["name"], "abcde");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = Config::default();
    config.server.max_body_bytes = 64;
    let request = json_request(Method::POST, "/echo", &json!({ "name": "x".repeat(200) }));

    let (status, _) = send(app_with(&config), request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn oversized_streamed_body_is_rejected() {
    let mut config = Config::default();
    config.server.max_body_bytes = 64;
    let chunks: Vec<std::io::Result<String>> =
        vec![Ok("{\"name\":\"".into()), Ok("x".repeat(200))];
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let (status, _) = send(app_with(&config), request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn broken_body_stream_is_a_bad_request_not_oversize() {
    let chunks: Vec<std::io::Result<String>> = vec![
        Ok("{\"name\":".into()),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let (status, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Failed to read request body");
}

#[tokio::test]
async fn non_json_body_reaches_handler_untouched() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("<b>not json</b>"))
        .unwrap();

    let (status, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Body must be JSON");
}

#[tokio::test]
async fn preview_denies_internal_targets_uniformly() {
    for url in [
        "http://localhost/admin",
        "http://127.0.0.1:8080/",
        "http://internal.example/",
        "http://metadata.example/latest/meta-data/",
        "http://[::ffff:10.0.0.1]/",
        "ftp://example.com/",
        "http://unknown.example/",
        "not a url",
    ] {
        let request = json_request(Method::POST, "/preview", &json!({ "url": url }));
        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::FORBIDDEN, "{url}");
        assert_eq!(body, json!({ "error": "URL not allowed" }), "{url}");
    }
}

#[tokio::test]
async fn preview_requires_a_url_field() {
    let request = json_request(Method::POST, "/preview", &json!({ "href": "https://example.com" }));
    let (status, _) = send(app(), request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
