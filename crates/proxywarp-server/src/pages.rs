use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tracing::error;

use proxywarp_core::error::WarpError;

/// Landing page with the convert form.
pub fn render_home(base_domain: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>ProxyWarp</title>
<style>
  body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 4rem auto; padding: 0 1rem; color: #222; }}
  h1 {{ font-size: 1.6rem; }}
  form {{ display: flex; gap: .5rem; margin: 1.5rem 0; }}
  input[type=url] {{ flex: 1; padding: .6rem; font-size: 1rem; border: 1px solid #bbb; border-radius: 4px; }}
  button {{ padding: .6rem 1.2rem; font-size: 1rem; border: 0; border-radius: 4px; background: #2456d6; color: #fff; cursor: pointer; }}
  code {{ background: #f2f2f2; padding: .1rem .3rem; border-radius: 3px; }}
</style>
</head>
<body>
<h1>ProxyWarp</h1>
<p>Browse any site through a <code>*.{base_domain}</code> subdomain, embeddable anywhere.</p>
<form method="get" action="/">
  <input type="url" name="url" placeholder="https://example.com" required>
  <button type="submit">Warp</button>
</form>
<p>Or call <code>GET /convert?url=&lt;address&gt;</code> for a JSON answer.</p>
</body>
</html>
"#
    )
}

/// Shared error page. `detail` is only rendered when the gateway runs
/// in debug mode.
pub fn render_error(status: StatusCode, title: &str, message: &str, detail: Option<&str>) -> String {
    let detail_html = match detail {
        Some(detail) => format!("<pre>{}</pre>", escape_html(detail)),
        None => String::new(),
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{code} {title}</title>
<style>
  body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 4rem auto; padding: 0 1rem; color: #222; }}
  h1 {{ font-size: 1.4rem; }}
  pre {{ background: #f2f2f2; padding: 1rem; border-radius: 4px; overflow-x: auto; }}
</style>
</head>
<body>
<h1>{code} &mdash; {title}</h1>
<p>{message}</p>
{detail_html}
</body>
</html>
"#,
        code = status.as_u16(),
        title = escape_html(title),
        message = escape_html(message),
    )
}

/// Build a full error `Response` around [`render_error`].
pub fn error_response(
    debug: bool,
    status: StatusCode,
    title: &str,
    message: &str,
    detail: Option<&str>,
) -> Response {
    let html = render_error(status, title, message, if debug { detail } else { None });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_else(|e| {
            error!("failed to build error response: {e}");
            Response::new(Body::from("internal error"))
        })
}

/// Map a gateway error onto the shared error page.
pub fn warp_error_response(debug: bool, err: &WarpError) -> Response {
    let (status, title, message) = match err {
        WarpError::InvalidInput(_) => (
            StatusCode::BAD_REQUEST,
            "Invalid Request",
            "The request could not be understood.",
        ),
        WarpError::UnknownToken(_) => (
            StatusCode::BAD_REQUEST,
            "Unknown subdomain",
            "This subdomain is not mapped to any site. Convert a URL on the home page first.",
        ),
        WarpError::Upstream(_) => (
            StatusCode::BAD_GATEWAY,
            "Upstream Error",
            "The upstream site could not be reached.",
        ),
        WarpError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "Gateway Timeout",
            "The upstream site did not respond in time.",
        ),
        WarpError::Persistence(_) | WarpError::Config(_) | WarpError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "An unexpected error occurred in the gateway.",
        ),
    };
    error_response(debug, status, title, message, Some(&err.to_string()))
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_mentions_base_domain() {
        let html = render_home("proxywarp.test");
        assert!(html.contains("*.proxywarp.test"));
        assert!(html.contains("name=\"url\""));
    }

    #[test]
    fn test_error_page_escapes_content() {
        let html = render_error(
            StatusCode::BAD_REQUEST,
            "Bad <input>",
            "a & b",
            Some("<script>alert(1)</script>"),
        );
        assert!(html.contains("400"));
        assert!(html.contains("Bad &lt;input&gt;"));
        assert!(html.contains("a &amp; b"));
        assert!(!html.contains("<script>alert(1)</script>"));
    }

    #[test]
    fn test_warp_error_status_mapping() {
        let cases = [
            (WarpError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (WarpError::UnknownToken("zz".into()), StatusCode::BAD_REQUEST),
            (WarpError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (WarpError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (WarpError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(warp_error_response(false, &err).status(), status, "{err}");
        }
    }

    #[test]
    fn test_detail_hidden_without_debug() {
        let resp = error_response(false, StatusCode::INTERNAL_SERVER_ERROR, "Oops", "boom", Some("stack"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // body checked at the render level: detail only appears in debug
        let html = render_error(StatusCode::INTERNAL_SERVER_ERROR, "Oops", "boom", None);
        assert!(!html.contains("stack"));
    }
}
