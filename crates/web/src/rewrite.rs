//! Path prefix rewriting

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

/// Strip the first matching prefix from `path`.
///
/// A prefix only matches a whole leading segment: with `main`, `/main` and
/// `/main/app.js` are rewritten to `/` and `/app.js`, `/mainframe.js` is not.
pub fn rewrite_path(path: &str, prefixes: &[String]) -> Option<String> {
    let rel = path.strip_prefix('/')?;
    prefixes.iter().find_map(|prefix| {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return None;
        }
        let rest = rel.strip_prefix(prefix)?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    })
}

/// [`rewrite_path`] applied to a full URI, keeping its query string
pub fn rewrite_uri(uri: &Uri, prefixes: &[String]) -> Option<Uri> {
    let path = rewrite_path(uri.path(), prefixes)?;
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

pub(crate) async fn rewrite_middleware(
    State(prefixes): State<Arc<Vec<String>>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(rewritten) = rewrite_uri(req.uri(), &prefixes) {
        info!("rewrote {} to {}", req.uri(), rewritten);
        *req.uri_mut() = rewritten;
    }
    next.run(req).await
}
