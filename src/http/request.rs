//! HTTP requests and their immutable header view.

use super::{Body, Target};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Version};

/// The parsed head of an HTTP request.
///
/// Field names are matched case-insensitively; repeated fields are kept as
/// multiple entries of the map.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: Target,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<Target>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    /// Whether the peer asked for the connection to stay open after the
    /// response.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match self.version {
            Version::HTTP_10 => token_list_contains(connection, "keep-alive"),
            _ => !token_list_contains(connection, "close"),
        }
    }

    /// Whether this request asks for a WebSocket upgrade.
    pub fn is_upgrade(&self) -> bool {
        let connection = self
            .headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !token_list_contains(connection, "upgrade") {
            return false;
        }
        self.headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// The value of the first header with the given name, as a string.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The value of the request cookie with the given name.
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for cookie in cookie::Cookie::split_parse_encoded(raw.to_owned()).flatten() {
                if cookie.name() == name {
                    return Some(cookie.value().to_owned());
                }
            }
        }
        None
    }
}

fn token_list_contains(list: &str, token: &str) -> bool {
    list.split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// An HTTP request with a materialized body.
#[derive(Debug)]
pub struct Request<B = Body> {
    pub head: RequestHead,
    pub body: B,
}

impl<B> Request<B> {
    pub fn new(head: RequestHead, body: B) -> Self {
        Self { head, body }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn target(&self) -> &Target {
        &self.head.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }
}

impl Request<Body> {
    /// The body as text, if it was materialized in-memory as a string.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_text()
    }
}

pub(crate) fn append_header(headers: &mut HeaderMap, name: &[u8], value: &[u8]) -> Option<()> {
    let name = header::HeaderName::from_bytes(name).ok()?;
    let value = HeaderValue::from_bytes(value).ok()?;
    headers.append(name, value);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_with(version: Version, connection: Option<&str>) -> RequestHead {
        let mut head = RequestHead::new(Method::GET, "/");
        head.version = version;
        if let Some(c) = connection {
            head.headers
                .insert(header::CONNECTION, HeaderValue::from_str(c).unwrap());
        }
        head
    }

    #[test]
    fn keep_alive_defaults_per_version() {
        assert!(head_with(Version::HTTP_11, None).keep_alive());
        assert!(!head_with(Version::HTTP_11, Some("close")).keep_alive());
        assert!(!head_with(Version::HTTP_10, None).keep_alive());
        assert!(head_with(Version::HTTP_10, Some("keep-alive")).keep_alive());
    }

    #[test]
    fn upgrade_detection_is_case_insensitive() {
        let mut head = head_with(Version::HTTP_11, Some("keep-alive, Upgrade"));
        head.headers
            .insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(head.is_upgrade());

        let plain = head_with(Version::HTTP_11, None);
        assert!(!plain.is_upgrade());
    }

    #[test]
    fn cookie_lookup() {
        let mut head = RequestHead::new(Method::GET, "/");
        head.headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; sessionId=abcdef; b=2"),
        );
        assert_eq!(head.cookie("sessionId").as_deref(), Some("abcdef"));
        assert_eq!(head.cookie("absent"), None);
    }
}
