use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(script|style)[^>]*>.*?</(script|style)>|<[^>]*>").unwrap()
});

/// Turns a configured host into a base URL.
///
/// Accepts a bare host (`knoema.com`, https is assumed) or a full base such as
/// `http://127.0.0.1:8080`.
pub(crate) fn base_url(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(Error::Config("host must not be empty".to_string()));
    }
    let raw = if host.contains("://") {
        format!("{}/", host)
    } else {
        format!("https://{}/", host)
    };
    Url::parse(&raw).map_err(|e| Error::Config(format!("invalid host {:?}: {}", host, e)))
}

/// Builds `base/path?k=v&...` with percent-encoded query pairs.
pub(crate) fn build_url(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base
        .join(path.trim_start_matches('/'))
        .map_err(|e| Error::Config(format!("invalid path {:?}: {}", path, e)))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Resolves a manifest location against the API base; absolute URLs are kept as is.
pub(crate) fn urljoin(base: &Url, location: &str) -> Result<Url> {
    base.join(location.trim())
        .map_err(|e| Error::MalformedResponse(format!("invalid file url {:?}: {}", location, e)))
}

/// Extracts readable text from an error body that may be an HTML page.
///
/// Tags (and the contents of `script`/`style` blocks) are removed, every line is
/// trimmed and blank lines are dropped.
pub(crate) fn strip_html(body: &str) -> String {
    let text = HTML_TAG.replace_all(body, "");
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
