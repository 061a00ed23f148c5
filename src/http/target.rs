//! Decomposition of the raw request target.

use percent_encoding::percent_decode_str;
use std::fmt;

/// The request target of an HTTP request, decomposed into resource path,
/// query string and fragment.
///
/// ```
/// use wharf::http::Target;
///
/// let mut target = Target::new("/api/items?limit=10#top");
/// assert_eq!(target.resource_string(), "/api/items");
/// assert_eq!(target.query_string(), "limit=10");
/// assert_eq!(target.fragment(), "top");
///
/// assert!(target.chop_prefix("/api"));
/// assert_eq!(target.resource_string(), "/items");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    raw: String,
    resource: String,
    query: String,
    fragment: String,
}

impl Target {
    /// Parse a raw target string.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();

        let (before_fragment, fragment) = match raw.split_once('#') {
            Some((b, f)) => (b, f),
            None => (raw.as_str(), ""),
        };
        let (resource, query) = match before_fragment.split_once('?') {
            Some((r, q)) => (r, q),
            None => (before_fragment, ""),
        };

        let resource = resource.to_owned();
        let query = query.to_owned();
        let fragment = fragment.to_owned();
        Self {
            raw,
            resource,
            query,
            fragment,
        }
    }

    /// The raw target as received on the wire.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this is a target the server is willing to route.
    ///
    /// Legal targets are non-empty, start with `/` and contain no `..`
    /// segments anywhere.
    pub fn is_legal(&self) -> bool {
        !self.resource.is_empty() && self.resource.starts_with('/') && !self.raw.contains("..")
    }

    /// The resource path, without query and fragment.
    pub fn resource_string(&self) -> &str {
        &self.resource
    }

    /// The resource path split into segments.
    pub fn resource(&self) -> Vec<&str> {
        self.resource.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Whether the resource path starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.resource.starts_with(prefix)
    }

    /// Strip `prefix` from the front of the resource path.
    ///
    /// Returns `false` (and leaves the target untouched) if the resource
    /// does not start with `prefix`.
    pub fn chop_prefix(&mut self, prefix: &str) -> bool {
        if !self.resource.starts_with(prefix) {
            return false;
        }
        self.resource.drain(..prefix.len());
        true
    }

    /// The raw query string (no leading `?`).
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// The query decomposed into ordered key/value pairs, percent-decoded.
    pub fn query(&self) -> Vec<(String, String)> {
        if self.query.is_empty() {
            return Vec::new();
        }
        self.query
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(k), decode(v))
            })
            .collect()
    }

    /// The decoded value of the first query pair with the given key.
    pub fn query_value(&self, key: &str) -> Option<String> {
        self.query()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// The fragment (no leading `#`).
    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        Target::new(raw)
    }
}
