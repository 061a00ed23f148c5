//! CORS preflight synthesis configuration.

use crate::http::{HeaderName, Method, Response, StatusCode};

/// What a synthesized `OPTIONS` preflight response advertises.
#[derive(Debug, Clone)]
pub struct PreflightConfig {
    /// Value of `Access-Control-Allow-Origin`.
    pub origin: String,
    /// Value of `Access-Control-Allow-Headers`.
    pub allowed_headers: String,
    /// Value of `Access-Control-Max-Age`, in seconds.
    pub max_age: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            origin: "*".to_owned(),
            allowed_headers: "Content-Type".to_owned(),
            max_age: 60,
        }
    }
}

impl PreflightConfig {
    /// Build the preflight response advertising `methods`.
    pub(crate) fn response(&self, methods: &[Method]) -> Response {
        let methods = methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        let mut resp = Response::new(StatusCode::OK);
        resp.set_header(
            HeaderName::from_static("access-control-allow-origin"),
            &self.origin,
        );
        resp.set_header(
            HeaderName::from_static("access-control-allow-methods"),
            methods,
        );
        resp.set_header(
            HeaderName::from_static("access-control-allow-headers"),
            &self.allowed_headers,
        );
        resp.set_header(
            HeaderName::from_static("access-control-max-age"),
            self.max_age.to_string(),
        );
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertises_methods_comma_separated() {
        let resp = PreflightConfig::default()
            .response(&[Method::GET, Method::POST, Method::DELETE]);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.header("access-control-allow-methods"),
            Some("GET, POST, DELETE")
        );
        assert_eq!(resp.header("access-control-allow-origin"), Some("*"));
        assert_eq!(resp.header("access-control-max-age"), Some("60"));
    }
}
