use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use proxywarp_core::models::proxy_url;

use crate::script::{self, INJECTED_MARKER};

/// Absolute-path `href`/`src` attributes; the leading whitespace is
/// part of the match and is preserved in the replacement.
static PATH_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\s)(href|src)=["']/([^"']*)["']"#).expect("path attr regex")
});

static FORM_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<form([^>]*)action=["']([^"']*)["']"#).expect("form action regex")
});

static HEAD_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head[^>]*>").expect("head regex"));

static BASE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base[\s/>]").expect("base tag regex"));

/// Rewrites one upstream HTML document so every intra-origin reference
/// points back at the proxied subdomain.
///
/// The URL rules are deliberately plain regexes over the raw markup:
/// they are the rewrite contract, and swapping in a real HTML parser
/// would change behaviour on the malformed documents real sites serve.
/// All transformations are best-effort text edits; nothing here fails.
pub struct Rewriter {
    token: String,
    base_domain: String,
    domain: String,
    abs_attr_re: Regex,
}

impl Rewriter {
    pub fn new(token: &str, base_domain: &str, upstream_domain: &str) -> Self {
        let escaped = regex::escape(upstream_domain);
        // regex::escape guarantees the interpolation stays valid
        let abs_attr_re = Regex::new(&format!(
            r#"(?i)(href|src)=["'](?:https?:)?//(?:www\.)?{escaped}([^"']*)["']"#
        ))
        .expect("absolute attr regex");
        Self {
            token: token.to_string(),
            base_domain: base_domain.to_string(),
            domain: upstream_domain.to_string(),
            abs_attr_re,
        }
    }

    fn proxied(&self, path_and_query: &str) -> String {
        proxy_url(&self.base_domain, &self.token, path_and_query)
    }

    /// Apply all transformations. Running the result through the
    /// rewriter again is a no-op: mapped URLs contain the base domain
    /// and are skipped by every rule.
    pub fn rewrite(&self, html: &str) -> String {
        let html = self.rewrite_absolute_urls(html);
        let html = self.rewrite_absolute_paths(&html);
        let html = self.rewrite_form_actions(&html);
        let html = self.inject_base_tag(&html);
        self.inject_client_script(&html)
    }

    /// Rule 1: absolute URLs to the upstream origin on `href`/`src`.
    fn rewrite_absolute_urls(&self, html: &str) -> String {
        self.abs_attr_re
            .replace_all(html, |caps: &Captures<'_>| {
                format!("{}=\"{}\"", &caps[1], self.proxied(&caps[2]))
            })
            .into_owned()
    }

    /// Rule 2: absolute-path URLs on `href`/`src`.
    fn rewrite_absolute_paths(&self, html: &str) -> String {
        PATH_ATTR_RE
            .replace_all(html, |caps: &Captures<'_>| {
                format!(
                    "{}{}=\"{}\"",
                    &caps[1],
                    &caps[2],
                    self.proxied(&format!("/{}", &caps[3]))
                )
            })
            .into_owned()
    }

    /// Rule 3: `<form action=...>`.
    fn rewrite_form_actions(&self, html: &str) -> String {
        FORM_ACTION_RE
            .replace_all(html, |caps: &Captures<'_>| {
                let attrs = &caps[1];
                let action = &caps[2];
                let mapped = self.map_form_action(action);
                format!("<form{attrs}action=\"{mapped}\"")
            })
            .into_owned()
    }

    fn map_form_action(&self, action: &str) -> String {
        if action.contains(&self.base_domain) {
            return action.to_string();
        }
        if action.starts_with("http") {
            if let Ok(parsed) = Url::parse(action) {
                let host = parsed.host_str().unwrap_or("");
                if host == self.domain || host == format!("www.{}", self.domain) {
                    let mut path_and_query = parsed.path().to_string();
                    if let Some(query) = parsed.query() {
                        path_and_query.push('?');
                        path_and_query.push_str(query);
                    }
                    return self.proxied(&path_and_query);
                }
            }
            return action.to_string();
        }
        if action.starts_with('/') {
            return self.proxied(action);
        }
        action.to_string()
    }

    /// Rule 4: inject `<base>` after the first `<head...>` opening tag
    /// so relative references resolve under the proxied origin.
    fn inject_base_tag(&self, html: &str) -> String {
        if BASE_TAG_RE.is_match(html) {
            return html.to_string();
        }
        let base = format!("\n<base href=\"{}\">\n", self.proxied("/"));
        match HEAD_OPEN_RE.find(html) {
            Some(head) => {
                let mut out = String::with_capacity(html.len() + base.len());
                out.push_str(&html[..head.end()]);
                out.push_str(&base);
                out.push_str(&html[head.end()..]);
                out
            }
            None => html.to_string(),
        }
    }

    /// Rule 5: inject the client interceptor right before `</body>`,
    /// or append when the tag is missing.
    fn inject_client_script(&self, html: &str) -> String {
        if html.contains(INJECTED_MARKER) {
            return html.to_string();
        }
        let payload = script::render(&self.token, &self.base_domain, &self.domain);
        let close = match html.rfind("</body>") {
            Some(pos) => Some(pos),
            None => html.rfind("</BODY>"),
        };
        match close {
            Some(pos) => {
                let mut out = String::with_capacity(html.len() + payload.len() + 1);
                out.push_str(&html[..pos]);
                out.push_str(&payload);
                out.push('\n');
                out.push_str(&html[pos..]);
                out
            }
            None => {
                let mut out = html.to_string();
                out.push_str(&payload);
                out
            }
        }
    }
}

/// Content-type gate for the buffered rewrite path.
pub fn is_html_content_type(content_type: &str) -> bool {
    content_type.trim_start().to_ascii_lowercase().starts_with("text/html")
}
