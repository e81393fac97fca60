use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::Response;
use tracing::{debug, error, info, warn};
use url::Url;

use proxywarp_core::error::WarpError;
use proxywarp_core::models::TokenEntry;

use crate::pages;
use crate::rewrite::{is_html_content_type, Rewriter};
use crate::state::AppState;

/// Upstream response headers that would prevent embedding the proxied
/// page; always removed.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "x-frame-options",
    "content-security-policy",
    "content-security-policy-report-only",
    "feature-policy",
    "permissions-policy",
];

/// Headers the gateway sets itself on every proxied response.
const OVERRIDE_RESPONSE_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    (
        "access-control-allow-headers",
        "Origin, X-Requested-With, Content-Type, Accept, Authorization",
    ),
    ("access-control-allow-credentials", "true"),
    ("x-frame-options", "ALLOWALL"),
];

/// Entry point for the reverse-proxy path, wrapped in the hard
/// per-request watchdog.
pub async fn handle(state: Arc<AppState>, token: String, request: Request<Body>) -> Response {
    let watchdog = state.settings.proxy.watchdog_timeout();
    let debug_mode = state.settings.server.debug;
    match tokio::time::timeout(watchdog, forward(state, &token, request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%token, "request watchdog expired");
            pages::warp_error_response(
                debug_mode,
                &WarpError::Timeout(format!("no response within {}ms", watchdog.as_millis())),
            )
        }
    }
}

async fn forward(state: Arc<AppState>, token: &str, request: Request<Body>) -> Response {
    let debug_mode = state.settings.server.debug;
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let Some(entry) = resolve_origin(&state, token, &parts.headers) else {
        return pages::warp_error_response(debug_mode, &WarpError::UnknownToken(token.to_string()));
    };
    if entry.domain.is_empty() {
        error!(%token, "resolved entry has no domain");
        return pages::warp_error_response(
            debug_mode,
            &WarpError::Internal(format!("stored target for {token} has no domain")),
        );
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}://{}{}", entry.protocol, entry.domain, path_and_query);

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut upstream_req = state.http_client.request(method, &target);
    for (name, value) in parts.headers.iter() {
        if !should_forward_request_header(name.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            upstream_req = upstream_req.header(name.as_str(), v);
        }
    }
    upstream_req = upstream_req.header(reqwest::header::REFERER, entry.origin_root());
    upstream_req = upstream_req.body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(%token, upstream = %target, error = %e, "upstream request failed");
            let detail = if e.is_timeout() {
                format!("upstream timed out: {e}")
            } else if e.is_connect() {
                format!("upstream connect failed: {e}")
            } else {
                e.to_string()
            };
            return pages::warp_error_response(debug_mode, &WarpError::Upstream(detail));
        }
    };

    let status = StatusCode::from_u16(upstream_resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let upstream_headers = upstream_resp.headers().clone();
    let content_type = upstream_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let is_html = is_html_content_type(&content_type);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_headers.iter() {
        let name_str = name.as_str();
        if !should_forward_response_header(name_str) {
            continue;
        }
        // the rewriter owns the body length on the HTML path
        if is_html && name_str.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let Ok(v) = value.to_str() {
            builder = builder.header(name_str, v);
        }
    }
    for (name, value) in OVERRIDE_RESPONSE_HEADERS {
        builder = builder.header(*name, *value);
    }

    info!(
        %token,
        upstream = %target,
        status = status.as_u16(),
        html = is_html,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "proxied"
    );

    if is_html {
        let bytes = match upstream_resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%token, upstream = %target, error = %e, "failed to read upstream HTML");
                return pages::warp_error_response(
                    debug_mode,
                    &WarpError::Upstream(format!("reading the upstream body failed: {e}")),
                );
            }
        };
        let html = String::from_utf8_lossy(&bytes);
        let rewritten = Rewriter::new(token, &state.settings.server.base_domain, &entry.domain)
            .rewrite(&html);
        let body = rewritten.into_bytes();
        builder = builder.header(header::CONTENT_LENGTH, body.len());
        finish(builder, Body::from(body), debug_mode)
    } else {
        finish(builder, Body::from_stream(upstream_resp.bytes_stream()), debug_mode)
    }
}

fn finish(builder: axum::http::response::Builder, body: Body, debug_mode: bool) -> Response {
    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!("failed to assemble proxied response: {e}");
            pages::warp_error_response(
                debug_mode,
                &WarpError::Internal(format!("assembling the proxied response failed: {e}")),
            )
        }
    }
}

/// Resolve the upstream origin for a token: resolver cache, directory,
/// `Referer` recovery for sub-resources on unknown subdomains, then a
/// forced reload as the last try. Successful resolutions are memoised
/// under the incoming token.
pub fn resolve_origin(state: &AppState, token: &str, headers: &HeaderMap) -> Option<TokenEntry> {
    let cache_key = format!("token:{token}");
    if let Some(entry) = state.cache.get(&cache_key) {
        debug!(%token, "resolver cache hit");
        return Some(entry);
    }

    let mut entry = state.directory.domain_info_from_token(token);

    if entry.is_none() {
        if let Some(ref_token) = referer_token(headers, &state.settings.server.base_domain) {
            entry = state.directory.domain_info_from_token(&ref_token);
            if entry.is_some() {
                debug!(%token, referer_token = %ref_token, "origin recovered from referer");
            }
        }
    }

    if entry.is_none() {
        state.directory.force_reload();
        entry = state.directory.domain_info_from_token(token);
    }

    if let Some(ref entry) = entry {
        state.cache.insert(&cache_key, entry.clone());
    }
    entry
}

/// Token label chain of the `Referer` header when it points at another
/// proxied subdomain.
pub fn referer_token(headers: &HeaderMap, base_domain: &str) -> Option<String> {
    let referer = headers.get(header::REFERER)?.to_str().ok()?;
    let url = Url::parse(referer).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let suffix = format!(".{base_domain}");
    let token = host.strip_suffix(suffix.as_str())?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn should_forward_request_header(name: &str) -> bool {
    !matches!(
        name.to_ascii_lowercase().as_str(),
        "host"
            | "user-agent"
            | "referer"
            | "x-forwarded-host"
            | "x-forwarded-proto"
            | "x-forwarded-for"
            | "accept-encoding"
            | "content-length"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn should_forward_response_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
        return false;
    }
    // overridden below, never forwarded from upstream
    if name.starts_with("access-control-") {
        return false;
    }
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
