//! Canonical response constructors.

use super::{Body, Response};
use crate::error::ConfigError;
use http::header::{self, HeaderValue};
use http::StatusCode;
use std::path::Path;

/// A plain `200 OK` without a body.
pub fn ok() -> Response {
    Response::new(StatusCode::OK)
}

/// A `400 Bad Request` carrying the reason as body.
pub fn bad_request(reason: &str) -> Response {
    Response::new(StatusCode::BAD_REQUEST)
        .with_header(header::CONTENT_TYPE, "text/html")
        .with_body(reason)
}

/// A `404 Not Found` naming the missing resource.
pub fn not_found(resource: &str) -> Response {
    Response::new(StatusCode::NOT_FOUND)
        .with_header(header::CONTENT_TYPE, "text/html")
        .with_body(format!("The resource '{resource}' was not found."))
}

/// A `500 Internal Server Error` with a generic message.
pub fn server_error(what: &str) -> Response {
    Response::new(StatusCode::INTERNAL_SERVER_ERROR)
        .with_header(header::CONTENT_TYPE, "text/html")
        .with_body(format!("An error occurred: '{what}'"))
}

/// A redirect to `location`.
///
/// Fails unless `status` is a 3xx code.
pub fn redirect(status: StatusCode, location: &str) -> Result<Response, ConfigError> {
    if !status.is_redirection() {
        return Err(ConfigError::InvalidRedirectStatus(status));
    }
    Ok(Response::new(status).with_header(header::LOCATION, location))
}

/// Serve the file at `base`/`rel`.
///
/// Rejects any `rel` containing `..` with a 400; answers 404 unless the
/// resolved path is a regular file. The content type is derived from the
/// file extension.
pub async fn file(base: &Path, rel: &str) -> Response {
    file_with_cache(base, rel, None).await
}

pub(crate) async fn file_with_cache(
    base: &Path,
    rel: &str,
    cache_control: Option<&str>,
) -> Response {
    if rel.contains("..") {
        return bad_request("resource path must not contain \"..\"");
    }
    let rel = rel.strip_prefix('/').unwrap_or(rel);

    let path = base.join(rel);
    let body = match Body::file(&path).await {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "file request failed");
            return not_found(rel);
        }
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut resp = Response::new(StatusCode::OK).with_body(body);
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        resp.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(cc) = cache_control {
        resp.set_header(header::CACHE_CONTROL, cc);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_validates_the_status_class() {
        let resp = redirect(StatusCode::PERMANENT_REDIRECT, "/new").unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.header(header::LOCATION), Some("/new"));

        assert!(matches!(
            redirect(StatusCode::OK, "/new"),
            Err(ConfigError::InvalidRedirectStatus(_))
        ));
    }

    #[tokio::test]
    async fn file_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let resp = file(dir.path(), "../etc/passwd").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn file_serves_regular_files_with_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();

        let resp = file(dir.path(), "/hello.txt").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.header(header::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(resp.body().content_len(), 8);

        let resp = file(dir.path(), "/absent.txt").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = file(dir.path(), "/").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
