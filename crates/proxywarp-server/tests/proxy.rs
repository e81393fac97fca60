//! End-to-end reverse-proxy pipeline tests against a mocked upstream.
//!
//! Tokens here are allocated for a `host:port` authority with the
//! default protocol set to plain http, so the real forward path talks
//! to a local wiremock server instead of the public internet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::util::ServiceExt;
use wiremock::matchers::{body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use proxywarp_core::config::Settings;
use proxywarp_core::models::Protocol;
use proxywarp_server::build_router;
use proxywarp_server::state::AppState;

const BASE: &str = "proxywarp.test";

fn upstream_test_state(tmp: &TempDir, watchdog_ms: u64) -> Arc<AppState> {
    let mut settings = Settings::default();
    settings.server.base_domain = BASE.to_string();
    settings.directory.db_file = tmp.path().join("tokens.json");
    settings.directory.default_protocol = Protocol::Http;
    settings.proxy.watchdog_timeout_ms = watchdog_ms;
    settings.proxy.request_timeout_ms = 5_000;
    Arc::new(AppState::new(settings).expect("state"))
}

/// `host:port` of the mock, the form the token directory stores.
fn authority(upstream: &MockServer) -> String {
    upstream.uri().trim_start_matches("http://").to_string()
}

fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_html_response_is_scrubbed_and_rewritten() {
    let upstream = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let state = upstream_test_state(&tmp, 30_000);
    let authority = authority(&upstream);
    let token = state.directory.token_for_domain(&authority);

    let page = format!(
        "<html><head></head><body>\
         <a href=\"/a\">x</a>\
         <a href=\"http://{authority}/b\">y</a>\
         <form action=\"/c\"></form>\
         </body></html>"
    );
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(query_param("q", "1"))
        .and(wiremock::matchers::header(
            "referer",
            format!("http://{authority}/").as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-frame-options", "DENY")
                .insert_header("content-security-policy", "default-src 'none'")
                .set_body_raw(page, "text/html; charset=utf-8"),
        )
        .mount(&upstream)
        .await;

    let app = build_router(state);
    let response = app
        .oneshot(get("/page?q=1", &format!("{token}.{BASE}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers.get("x-frame-options").unwrap(), "ALLOWALL");
    assert!(headers.get("content-security-policy").is_none());
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
    let declared_len: usize = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap();

    let body = body_text(response).await;
    assert_eq!(declared_len, body.len());
    assert!(body.contains(&format!("<base href=\"https://{token}.{BASE}/\">")));
    assert!(body.contains(&format!("href=\"https://{token}.{BASE}/a\"")));
    assert!(body.contains(&format!("href=\"https://{token}.{BASE}/b\"")));
    assert!(body.contains(&format!("action=\"https://{token}.{BASE}/c\"")));
    assert!(body.contains("data-proxywarp-injected"));
}

#[tokio::test]
async fn test_non_html_body_streams_through_untouched() {
    let upstream = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let state = upstream_test_state(&tmp, 30_000);
    let token = state.directory.token_for_domain(&authority(&upstream));

    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-frame-options", "DENY")
                .set_body_raw(r#"{"ok":true}"#, "application/json"),
        )
        .mount(&upstream)
        .await;

    let app = build_router(state);
    let response = app
        .oneshot(get("/data.json", &format!("{token}.{BASE}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    // framing guards are scrubbed even off the rewrite path
    assert_eq!(headers.get("x-frame-options").unwrap(), "ALLOWALL");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");

    let body = body_text(response).await;
    assert_eq!(body, r#"{"ok":true}"#);
}

#[tokio::test]
async fn test_post_method_and_body_are_forwarded() {
    let upstream = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let state = upstream_test_state(&tmp, 30_000);
    let token = state.directory.token_for_domain(&authority(&upstream));

    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_string("hello=world"))
        .respond_with(ResponseTemplate::new(201).set_body_raw("created", "text/plain"))
        .mount(&upstream)
        .await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/submit")
        .header(header::HOST, format!("{token}.{BASE}"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("hello=world"))
        .unwrap();

    let app = build_router(state);
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_text(response).await, "created");
}

#[tokio::test]
async fn test_subresource_on_unknown_subdomain_served_via_referer() {
    let upstream = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let state = upstream_test_state(&tmp, 30_000);
    let token = state.directory.token_for_domain(&authority(&upstream));

    Mock::given(method("GET"))
        .and(path("/style.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("body { margin: 0 }", "text/css"))
        .mount(&upstream)
        .await;

    let request = Request::builder()
        .uri("/style.css")
        .header(header::HOST, format!("unknown.{BASE}"))
        .header(header::REFERER, format!("https://{token}.{BASE}/page"))
        .body(Body::empty())
        .unwrap();

    let app = build_router(state);
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "body { margin: 0 }");
}

#[tokio::test]
async fn test_watchdog_emits_504_before_a_stalled_upstream_answers() {
    let upstream = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    // watchdog scaled down from its 30 s default so the test stays fast
    let state = upstream_test_state(&tmp, 300);
    let token = state.directory.token_for_domain(&authority(&upstream));

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_raw("too late", "text/plain"),
        )
        .mount(&upstream)
        .await;

    let started = Instant::now();
    let app = build_router(state);
    let response = app
        .oneshot(get("/slow", &format!("{token}.{BASE}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    // the watchdog answered, not the upstream
    assert!(started.elapsed() < Duration::from_secs(2));
    let body = body_text(response).await;
    assert!(body.contains("Gateway Timeout"));
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_502_error_page() {
    // bind then drop a listener so the port is ours but nothing answers
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_authority = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    drop(listener);

    let tmp = TempDir::new().unwrap();
    let state = upstream_test_state(&tmp, 30_000);
    let token = state.directory.token_for_domain(&dead_authority);

    let app = build_router(state);
    let response = app.oneshot(get("/", &format!("{token}.{BASE}"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_text(response).await;
    assert!(body.contains("Upstream Error"));
}
