use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

use proxywarp_core::config::Settings;
use proxywarp_server::proxy::resolve_origin;
use proxywarp_server::state::AppState;
use proxywarp_server::build_router;

const BASE: &str = "proxywarp.test";

fn test_state(tmp: &TempDir, debug: bool) -> Arc<AppState> {
    let mut settings = Settings::default();
    settings.server.base_domain = BASE.to_string();
    settings.server.debug = debug;
    settings.directory.db_file = tmp.path().join("tokens.json");
    Arc::new(AppState::new(settings).expect("state"))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_home_page_renders() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app.oneshot(get("/", BASE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("ProxyWarp"));
    assert!(html.contains(BASE));
}

#[tokio::test]
async fn test_convert_allocates_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app
        .clone()
        .oneshot(get("/convert?url=https://example.com/foo?bar=1", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;

    assert_eq!(first["original"], "https://example.com/foo?bar=1");
    assert_eq!(first["domain"], "example.com");
    let token = first["token"].as_str().unwrap();
    assert!(token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    assert_eq!(
        first["proxy"],
        format!("https://{token}.{BASE}/foo?bar=1")
    );

    let response = app
        .oneshot(get("/convert?url=https://example.com/foo?bar=1", BASE))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(second["token"], first["token"]);
}

#[tokio::test]
async fn test_convert_accepts_schemeless_input() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app
        .oneshot(get("/convert?url=example.org/page", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["domain"], "example.org");
    assert!(json["proxy"].as_str().unwrap().ends_with("/page"));
}

#[tokio::test]
async fn test_convert_rejects_garbage() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    for uri in ["/convert", "/convert?url=", "/convert?url=%25%25%25"] {
        let response = app.clone().oneshot(get(uri, BASE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
        let json = body_json(response).await;
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn test_home_shortcut_redirects() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app
        .oneshot(get("/?url=https://example.com/foo", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(location.starts_with("https://"));
    assert!(location.ends_with(&format!(".{BASE}/foo")));
}

#[tokio::test]
async fn test_test_token_round_trip() {
    let tmp = TempDir::new().unwrap();
    let state = test_state(&tmp, false);
    let app = build_router(state.clone());

    let token = state.directory.token_for_domain("example.com");

    let response = app
        .clone()
        .oneshot(get(&format!("/test-token/{token}"), BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["token"], token.as_str());
    assert_eq!(json["targetInfo"]["domain"], "example.com");
    assert_eq!(json["proxyUrl"], format!("https://{token}.{BASE}/"));

    let response = app.oneshot(get("/test-token/nope42", BASE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app.oneshot(get("/health", BASE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["baseDomain"], BASE);
}

#[tokio::test]
async fn test_admin_routes_gated_by_debug() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));
    let response = app.oneshot(get("/admin/diagnostic", BASE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let tmp = TempDir::new().unwrap();
    let state = test_state(&tmp, true);
    state.directory.token_for_domain("example.com");
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(get("/admin/diagnostic", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["directory"]["entries"], 1);

    let response = app.oneshot(get("/admin/reload-tokens", BASE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["reloaded"], 1);
}

#[tokio::test]
async fn test_admin_add_test_token() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, true));

    let response = app
        .clone()
        .oneshot(get("/admin/add-test-token?domain=example.com", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["domain"], "example.com");
    assert!(json["token"].is_string());

    let response = app
        .oneshot(get("/admin/add-test-token?domain=not%20a%20domain", BASE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_subdomain_is_a_400_error_page() {
    let tmp = TempDir::new().unwrap();
    let app = build_router(test_state(&tmp, false));

    let response = app
        .oneshot(get("/some/page", &format!("zzzz99.{BASE}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let html = body_string(response).await;
    assert!(html.contains("Unknown subdomain"));
}

#[tokio::test]
async fn test_resolve_origin_recovers_from_referer() {
    let tmp = TempDir::new().unwrap();
    let state = test_state(&tmp, false);
    let token = state.directory.token_for_domain("example.com");

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(
        header::REFERER,
        format!("https://{token}.{BASE}/page").parse().unwrap(),
    );

    // sub-resource arriving on an unknown subdomain is served from the
    // referrer's upstream
    let entry = resolve_origin(&state, "unknown1", &headers).unwrap();
    assert_eq!(entry.domain, "example.com");

    // and the resolution is memoised under the incoming token
    assert_eq!(state.cache.get("token:unknown1").unwrap().domain, "example.com");
}

#[tokio::test]
async fn test_resolve_origin_without_referer_fails() {
    let tmp = TempDir::new().unwrap();
    let state = test_state(&tmp, false);
    let headers = axum::http::HeaderMap::new();
    assert!(resolve_origin(&state, "unknown1", &headers).is_none());
}
