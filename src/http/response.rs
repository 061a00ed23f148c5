//! HTTP responses.

use super::Body;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, Version};

/// An HTTP response.
///
/// Responses start out with `HTTP/1.1`, keep-alive and an empty body; the
/// router copies version and keep-alive from the request when it finalizes
/// a response for sending.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Body,
    keep_alive: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Body::Empty,
            keep_alive: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The value of the first header with the given name, as a string.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Insert a header, replacing previous values.
    pub fn set_header(&mut self, name: HeaderName, value: impl AsRef<str>) {
        if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(name, value);
        }
    }

    /// Builder-style variant of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder-style text body setter, also setting a `text/plain` content
    /// type if none is present.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        self.body = Body::Text(text.into());
        self
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Whether the connection must be closed after sending this response.
    pub(crate) fn need_eof(&self) -> bool {
        !self.keep_alive
    }

    /// Append a `Set-Cookie` header.
    pub fn add_cookie(&mut self, cookie: &cookie::Cookie<'_>) {
        if let Ok(value) = HeaderValue::from_str(&cookie.encoded().to_string()) {
            self.headers.append(header::SET_COOKIE, value);
        }
    }

    /// Assemble a response received by the client from its parsed head
    /// and materialized body.
    pub(crate) fn from_parts(head: super::wire::ResponseHead, body: Body) -> Self {
        let keep_alive = head.keep_alive();
        Self {
            status: head.status,
            version: head.version,
            headers: head.headers,
            body,
            keep_alive,
        }
    }

    /// Fix up the payload headers: sets `Content-Length` to the body size.
    pub fn prepare_payload(&mut self) {
        let len = self.body.content_len();
        self.headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&len.to_string()).unwrap_or(HeaderValue::from_static("0")),
        );
    }
}
