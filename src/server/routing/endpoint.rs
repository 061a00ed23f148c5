//! The endpoint variants a router can hold.

use super::preflight::PreflightConfig;
use super::rest::ErasedResource;
use crate::error::Result;
use crate::http::{generator, header, Method, RequestHead, Response, StatusCode};
use crate::server::filter::SharedFilter;
use crate::server::request_generator::RequestGenerator;
use crate::websocket::WebSocketConnection;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) type RouteHandler =
    Arc<dyn Fn(crate::http::Request, Vec<String>) -> BoxFuture<'static, Response> + Send + Sync>;

pub(crate) type WsHandler =
    Arc<dyn Fn(RequestHead, WebSocketConnection) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) type PolicyFn = Arc<dyn Fn(&RequestHead) -> Option<Response> + Send + Sync>;

pub(crate) type CacheControlFn = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

/// A route record within a router.
pub(crate) enum Endpoint {
    Regex(RegexEndpoint),
    Redirect(RedirectEndpoint),
    Files(FilesEndpoint),
    Rest(RestEndpoint),
}

pub(crate) struct RegexEndpoint {
    pub(crate) method: Method,
    pub(crate) pattern: Regex,
    pub(crate) handler: RouteHandler,
    pub(crate) filter: Option<SharedFilter>,
    pub(crate) preflight: Option<PreflightConfig>,
}

pub(crate) struct RedirectEndpoint {
    pub(crate) status: StatusCode,
    pub(crate) resource_old: String,
    pub(crate) resource_new: String,
}

pub(crate) struct FilesEndpoint {
    pub(crate) prefix: String,
    /// `None` serves from the routing context's doc root.
    pub(crate) base: Option<PathBuf>,
    pub(crate) cache_control: Option<CacheControlFn>,
}

pub(crate) struct RestEndpoint {
    pub(crate) resource: Arc<dyn ErasedResource>,
}

/// A WebSocket upgrade target; kept apart from the HTTP endpoints since
/// it is only consulted on upgrade requests.
pub(crate) struct WsEndpoint {
    pub(crate) resource: String,
    pub(crate) handler: WsHandler,
}

impl RegexEndpoint {
    pub(crate) fn matches_resource(&self, head: &RequestHead) -> bool {
        self.pattern.is_match(head.target.resource_string())
    }
}

impl RestEndpoint {
    fn matches_resource(&self, head: &RequestHead) -> bool {
        let resource = head.target.resource_string();
        match resource.strip_prefix('/') {
            Some(rest) => {
                rest == self.resource.name()
                    || rest
                        .strip_prefix(self.resource.name())
                        .is_some_and(|tail| tail.starts_with('/'))
            }
            None => false,
        }
    }
}

impl Endpoint {
    /// Whether this endpoint handles the given request.
    pub(crate) fn matches(&self, head: &RequestHead) -> bool {
        match self {
            Endpoint::Regex(ep) => ep.method == head.method && ep.matches_resource(head),
            Endpoint::Redirect(ep) => head.target.resource_string() == ep.resource_old,
            Endpoint::Files(ep) => head.target.resource_string().starts_with(&ep.prefix),
            Endpoint::Rest(ep) => ep.matches_resource(head),
        }
    }

    /// Produce the response. The endpoint decides whether and how the
    /// request body is materialized.
    pub(crate) async fn handle(
        &self,
        doc_root: &Path,
        gen: RequestGenerator<'_>,
    ) -> Result<Response> {
        match self {
            Endpoint::Regex(ep) => {
                // the full-match group is not forwarded
                let captures: Vec<String> = ep
                    .pattern
                    .captures(gen.head().target.resource_string())
                    .map(|caps| {
                        caps.iter()
                            .skip(1)
                            .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default();

                let storage: Box<dyn crate::http::BodyStorage> = match &ep.filter {
                    Some(filter) => filter.storage_for(gen.head()).await?,
                    None => Box::new(crate::http::StringStorage::new()),
                };
                let request = gen.body(storage).await?;

                let fut = (ep.handler)(request, captures);
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(resp) => Ok(resp),
                    Err(_) => {
                        tracing::error!("route handler panicked");
                        Ok(generator::server_error("the request handler failed"))
                    }
                }
            }

            Endpoint::Redirect(ep) => Ok(Response::new(ep.status)
                .with_header(header::LOCATION, &ep.resource_new)),

            Endpoint::Files(ep) => {
                let head = gen.into_head();
                let resource = head.target.resource_string();
                let rel = resource.strip_prefix(ep.prefix.as_str()).unwrap_or(resource);
                let base = ep.base.as_deref().unwrap_or(doc_root);
                let cache = ep
                    .cache_control
                    .as_ref()
                    .and_then(|provider| provider(&base.join(rel.trim_start_matches('/'))));
                Ok(generator::file_with_cache(base, rel, cache.as_deref()).await)
            }

            Endpoint::Rest(ep) => super::rest::handle(&ep.resource, gen).await,
        }
    }
}
