//! Pattern-matched request dispatch.
//!
//! A [`Router`] holds an ordered list of endpoints, nested sub-routers
//! mounted under path prefixes, and access policies. Dispatch walks
//! sub-routers first (stripping the prefix), then the policy gate, then
//! optional CORS preflight synthesis, then the endpoints in declaration
//! order; an unmatched request falls through to `400 unknown request`.

mod endpoint;
mod preflight;
pub mod rest;

pub use preflight::PreflightConfig;
pub use rest::{Resource, RestError};

use crate::error::{ConfigError, Result};
use crate::http::{generator, header, Method, Request, RequestHead, Response, Target, Version};
use crate::server::filter::RequestFilter;
use crate::server::request_generator::RequestGenerator;
use crate::websocket::WebSocketConnection;
use endpoint::{
    CacheControlFn, Endpoint, FilesEndpoint, RedirectEndpoint, RegexEndpoint, RestEndpoint,
    RouteHandler, WsEndpoint,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::StatusCode;
use regex::Regex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) use endpoint::{PolicyFn, WsHandler};

const DEFAULT_SERVER_STRING: &str = "wharf";

/// An HTTP request router.
pub struct Router {
    log_name: String,
    server_string: String,
    endpoints: Vec<Endpoint>,
    ws_endpoints: Vec<WsEndpoint>,
    sub_routers: Vec<(String, Router)>,
    policies: Vec<(Regex, PolicyFn)>,
    generate_preflights: bool,
    preflight: PreflightConfig,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("log_name", &self.log_name)
            .field("server_string", &self.server_string)
            .field("endpoints", &self.endpoints.len())
            .field("ws_endpoints", &self.ws_endpoints.len())
            .field("sub_routers", &self.sub_routers.len())
            .field("policies", &self.policies.len())
            .field("generate_preflights", &self.generate_preflights)
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            log_name: "router".to_owned(),
            server_string: DEFAULT_SERVER_STRING.to_owned(),
            endpoints: Vec::new(),
            ws_endpoints: Vec::new(),
            sub_routers: Vec::new(),
            policies: Vec::new(),
            generate_preflights: false,
            preflight: PreflightConfig::default(),
        }
    }

    /// Automatically answer `OPTIONS` requests for matching routes with a
    /// CORS preflight response.
    pub fn generate_preflights(&mut self, enabled: bool) {
        self.generate_preflights = enabled;
    }

    /// Configure what synthesized preflights advertise.
    pub fn set_preflight(&mut self, config: PreflightConfig) {
        self.preflight = config;
    }

    /// Add a handler for a method and resource pattern.
    ///
    /// The pattern is a regular expression matched against the full
    /// resource path.
    pub fn add<H, Fut>(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), ConfigError>
    where
        H: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |req, _caps| handler(req).boxed());
        self.add_regex_endpoint(method, pattern, handler, None, None)
    }

    /// Like [`add`](Self::add), additionally attaching an endpoint-level
    /// preflight configuration that overrides the router's when a
    /// preflight is synthesized for this route.
    pub fn add_with_preflight<H, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        preflight: PreflightConfig,
        handler: H,
    ) -> Result<(), ConfigError>
    where
        H: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |req, _caps| handler(req).boxed());
        self.add_regex_endpoint(method, pattern, handler, None, Some(preflight))
    }

    /// Like [`add`](Self::add), but the handler also receives the regex
    /// sub-matches (excluding the full match), in declaration order.
    pub fn add_with_captures<H, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), ConfigError>
    where
        H: Fn(Request, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |req, caps| handler(req, caps).boxed());
        self.add_regex_endpoint(method, pattern, handler, None, None)
    }

    /// Like [`add`](Self::add), with a request filter deciding where the
    /// body is materialized.
    pub fn add_filtered<F, H, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        filter: F,
        handler: H,
    ) -> Result<(), ConfigError>
    where
        F: RequestFilter,
        H: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |req, _caps| handler(req).boxed());
        self.add_regex_endpoint(method, pattern, handler, Some(Arc::new(filter)), None)
    }

    fn add_regex_endpoint(
        &mut self,
        method: Method,
        pattern: &str,
        handler: RouteHandler,
        filter: Option<Arc<dyn RequestFilter>>,
        preflight: Option<PreflightConfig>,
    ) -> Result<(), ConfigError> {
        tracing::debug!(router = %self.log_name, %method, pattern, "adding route");
        let pattern = compile_full_match(pattern)?;
        self.endpoints.push(Endpoint::Regex(RegexEndpoint {
            method,
            pattern,
            handler,
            filter,
            preflight,
        }));
        Ok(())
    }

    /// Mount `sub_router` under `prefix`.
    ///
    /// The prefix must be non-empty and start with `/`. The sub-router
    /// inherits this router's current server string.
    pub fn add_subrouter(&mut self, prefix: &str, mut sub_router: Router) -> Result<(), ConfigError> {
        if prefix.is_empty() || !prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(prefix.to_owned()));
        }
        tracing::debug!(router = %self.log_name, prefix, "adding sub-router");

        sub_router.log_name = format!("{} | {}", self.log_name, prefix);
        sub_router.set_server_string(&self.server_string);
        self.sub_routers.push((prefix.to_owned(), sub_router));
        Ok(())
    }

    /// Register an access policy for resources matching `pattern`.
    ///
    /// A policy returning a response short-circuits routing with it;
    /// returning `None` lets routing proceed. Policies run in
    /// declaration order.
    pub fn add_policy<P>(&mut self, pattern: &str, policy: P) -> Result<(), ConfigError>
    where
        P: Fn(&RequestHead) -> Option<Response> + Send + Sync + 'static,
    {
        let pattern = compile_full_match(pattern)?;
        self.policies.push((pattern, Arc::new(policy)));
        Ok(())
    }

    /// Register a redirect from `resource_old` to `resource_new`.
    ///
    /// `status` must be a 3xx code.
    pub fn add_redirect(
        &mut self,
        status: StatusCode,
        resource_old: &str,
        resource_new: &str,
    ) -> Result<(), ConfigError> {
        if !status.is_redirection() {
            return Err(ConfigError::InvalidRedirectStatus(status));
        }
        tracing::debug!(
            router = %self.log_name,
            status = status.as_u16(),
            from = resource_old,
            to = resource_new,
            "adding redirect"
        );
        self.endpoints.push(Endpoint::Redirect(RedirectEndpoint {
            status,
            resource_old: resource_old.to_owned(),
            resource_new: resource_new.to_owned(),
        }));
        Ok(())
    }

    /// Serve files below the routing context's doc root for resources
    /// under `prefix`.
    pub fn add_file_serving(&mut self, prefix: &str) -> Result<(), ConfigError> {
        self.add_files_endpoint(prefix, None, None)
    }

    /// Serve files from `base` for resources under `prefix`.
    pub fn add_file_serving_at(
        &mut self,
        prefix: &str,
        base: impl Into<PathBuf>,
    ) -> Result<(), ConfigError> {
        self.add_files_endpoint(prefix, Some(base.into()), None)
    }

    /// Like [`add_file_serving_at`](Self::add_file_serving_at) with a
    /// `Cache-Control` provider consulted per served file.
    pub fn add_file_serving_with_cache<C>(
        &mut self,
        prefix: &str,
        base: impl Into<PathBuf>,
        cache_control: C,
    ) -> Result<(), ConfigError>
    where
        C: Fn(&Path) -> Option<String> + Send + Sync + 'static,
    {
        self.add_files_endpoint(prefix, Some(base.into()), Some(Arc::new(cache_control)))
    }

    fn add_files_endpoint(
        &mut self,
        prefix: &str,
        base: Option<PathBuf>,
        cache_control: Option<CacheControlFn>,
    ) -> Result<(), ConfigError> {
        if prefix.is_empty() || !prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(prefix.to_owned()));
        }
        tracing::debug!(router = %self.log_name, prefix, "adding file serving");
        self.endpoints.push(Endpoint::Files(FilesEndpoint {
            prefix: prefix.to_owned(),
            base,
            cache_control,
        }));
        Ok(())
    }

    /// Register a WebSocket endpoint at `resource`.
    ///
    /// On upgrade the handler receives the request head and the freshly
    /// accepted connection.
    pub fn add_websocket<H, Fut>(&mut self, resource: &str, handler: H) -> Result<(), ConfigError>
    where
        H: Fn(RequestHead, WebSocketConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if resource.is_empty() || !resource.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(resource.to_owned()));
        }
        tracing::debug!(router = %self.log_name, resource, "adding websocket endpoint");
        self.ws_endpoints.push(WsEndpoint {
            resource: resource.to_owned(),
            handler: Arc::new(move |head, conn| handler(head, conn).boxed()),
        });
        Ok(())
    }

    /// Bind a REST resource under `/{name}`.
    pub fn add_rest<R: Resource>(&mut self, resource: R) -> Result<(), ConfigError> {
        tracing::debug!(router = %self.log_name, name = resource.name(), "adding REST resource");
        self.endpoints.push(Endpoint::Rest(RestEndpoint {
            resource: Arc::new(resource),
        }));
        Ok(())
    }

    /// The server string stamped on finalized responses.
    pub fn server_string(&self) -> &str {
        &self.server_string
    }

    /// Propagates recursively to all current sub-routers.
    pub(crate) fn set_server_string(&mut self, server_string: &str) {
        self.server_string = server_string.to_owned();
        for (_, sub) in &mut self.sub_routers {
            sub.set_server_string(server_string);
        }
    }

    /// Dispatch an HTTP request, returning the finalized response.
    pub(crate) fn dispatch<'a>(
        &'a self,
        doc_root: &'a Path,
        mut gen: RequestGenerator<'a>,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            // Delegate to the first matching sub-router, stripping its
            // prefix from the request.
            for (prefix, sub) in &self.sub_routers {
                if gen.head().target.starts_with(prefix) {
                    tracing::debug!(router = %self.log_name, prefix, "delegating to sub-router");
                    gen.head_mut().target.chop_prefix(prefix);
                    return sub.dispatch(doc_root, gen).await;
                }
            }

            let keep_alive = gen.head().keep_alive();
            let version = gen.head().version;
            let resource = gen.head().target.resource_string().to_owned();

            tracing::debug!(
                router = %self.log_name,
                method = %gen.head().method,
                %resource,
                "handling request"
            );

            // Policy gate.
            for (pattern, policy) in &self.policies {
                if !pattern.is_match(&resource) {
                    continue;
                }
                if let Some(resp) = policy(gen.head()) {
                    tracing::debug!(router = %self.log_name, %resource, "policy short-circuit");
                    return Ok(self.finalize(keep_alive, version, resp));
                }
            }

            // Preflight synthesis.
            if self.generate_preflights && gen.head().method == Method::OPTIONS {
                if let Some(resp) = self.preflight_response(gen.head()) {
                    tracing::debug!(router = %self.log_name, %resource, "synthesized preflight");
                    return Ok(self.finalize(keep_alive, version, resp));
                }
            }

            // Endpoints, in declaration order.
            for ep in &self.endpoints {
                if ep.matches(gen.head()) {
                    let resp = ep.handle(doc_root, gen).await?;
                    return Ok(self.finalize(keep_alive, version, resp));
                }
            }

            tracing::debug!(router = %self.log_name, %resource, "no endpoint matched");
            Ok(self.finalize(keep_alive, version, generator::bad_request("unknown request")))
        })
    }

    fn preflight_response(&self, head: &RequestHead) -> Option<Response> {
        let mut methods = Vec::new();
        let mut config = None;
        for ep in &self.endpoints {
            if let Endpoint::Regex(ep) = ep {
                if ep.matches_resource(head) {
                    if !methods.contains(&ep.method) {
                        methods.push(ep.method.clone());
                    }
                    if config.is_none() && ep.preflight.is_some() {
                        config = ep.preflight.as_ref();
                    }
                }
            }
        }
        if methods.is_empty() {
            return None;
        }
        Some(config.unwrap_or(&self.preflight).response(&methods))
    }

    /// Find the WebSocket handler for `target`, recursing through
    /// sub-routers and stripping their prefixes.
    pub(crate) fn resolve_ws(&self, target: &mut Target) -> Option<WsHandler> {
        for (prefix, sub) in &self.sub_routers {
            if target.starts_with(prefix) {
                target.chop_prefix(prefix);
                return sub.resolve_ws(target);
            }
        }
        self.ws_endpoints
            .iter()
            .find(|ep| ep.resource == target.resource_string())
            .map(|ep| Arc::clone(&ep.handler))
    }

    /// Stamp response metadata that is derived from the request and the
    /// routing context: keep-alive, HTTP version, `Server`, payload
    /// headers.
    fn finalize(&self, keep_alive: bool, version: Version, mut resp: Response) -> Response {
        resp.set_keep_alive(resp.keep_alive() && keep_alive);
        resp.set_version(version);
        resp.set_header(header::SERVER, &self.server_string);
        resp.prepare_payload();
        resp
    }
}

/// Route patterns match the whole resource, as if written `^…$`.
fn compile_full_match(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ConfigError::InvalidRoutePattern {
        pattern: pattern.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    fn get(target: &str) -> RequestGenerator<'static> {
        RequestGenerator::buffered(RequestHead::new(Method::GET, target), "")
    }

    fn with_method(method: Method, target: &str) -> RequestGenerator<'static> {
        RequestGenerator::buffered(RequestHead::new(method, target), "")
    }

    async fn dispatch(router: &Router, gen: RequestGenerator<'static>) -> Response {
        router.dispatch(Path::new("."), gen).await.unwrap()
    }

    #[tokio::test]
    async fn basic_route_and_finalization() {
        let mut router = Router::new();
        router
            .add(Method::GET, "/", |_req| async {
                Response::new(StatusCode::OK).with_text("hello")
            })
            .unwrap();

        let resp = dispatch(&router, get("/")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_text(), Some("hello"));
        assert_eq!(resp.header(header::SERVER), Some("wharf"));
        assert_eq!(resp.header(header::CONTENT_LENGTH), Some("5"));
        assert!(resp.keep_alive());
    }

    #[tokio::test]
    async fn patterns_match_the_whole_resource() {
        let mut router = Router::new();
        router
            .add(Method::GET, "/", |_req| async {
                Response::new(StatusCode::OK)
            })
            .unwrap();

        // "/" must not swallow every path by substring matching
        let resp = dispatch(&router, get("/anything")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn captures_are_forwarded_in_order() {
        let mut router = Router::new();
        router
            .add_with_captures(Method::GET, r"^/item/(\d+)$", |_req, caps| async move {
                Response::new(StatusCode::OK).with_text(caps.join(","))
            })
            .unwrap();

        let resp = dispatch(&router, get("/item/42")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_text(), Some("42"));
    }

    #[tokio::test]
    async fn method_must_match_too() {
        let mut router = Router::new();
        router
            .add(Method::POST, "/submit", |_req| async {
                Response::new(StatusCode::OK)
            })
            .unwrap();

        let resp = dispatch(&router, get("/submit")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn nested_router_strips_the_prefix() {
        let mut sub = Router::new();
        sub.add(Method::GET, "/ping", |_req| async {
            Response::new(StatusCode::OK).with_text("pong")
        })
        .unwrap();

        let mut parent = Router::new();
        parent.add_subrouter("/api", sub).unwrap();

        let resp = dispatch(&parent, get("/api/ping")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_text(), Some("pong"));

        let resp = dispatch(&parent, get("/api/absent")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subrouter_prefix_is_validated() {
        let mut router = Router::new();
        assert!(matches!(
            router.add_subrouter("", Router::new()),
            Err(ConfigError::InvalidPrefix(_))
        ));
        assert!(matches!(
            router.add_subrouter("api", Router::new()),
            Err(ConfigError::InvalidPrefix(_))
        ));
    }

    #[tokio::test]
    async fn server_string_propagates_to_children_at_add_time() {
        let mut parent = Router::new();
        parent.set_server_string("my-server/1.0");

        let mut child = Router::new();
        let grandchild = Router::new();
        child.add_subrouter("/deep", grandchild).unwrap();
        parent.add_subrouter("/api", child).unwrap();

        let (_, child) = &parent.sub_routers[0];
        assert_eq!(child.server_string(), "my-server/1.0");
        let (_, grandchild) = &child.sub_routers[0];
        assert_eq!(grandchild.server_string(), "my-server/1.0");
    }

    #[tokio::test]
    async fn policies_can_short_circuit() {
        let mut router = Router::new();
        router
            .add_policy("/admin/.+", |head| {
                if head.header(header::AUTHORIZATION).is_some() {
                    None
                } else {
                    Some(Response::new(StatusCode::UNAUTHORIZED))
                }
            })
            .unwrap();
        router
            .add(Method::GET, "/admin/panel", |_req| async {
                Response::new(StatusCode::OK).with_text("secret")
            })
            .unwrap();

        let resp = dispatch(&router, get("/admin/panel")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut head = RequestHead::new(Method::GET, "/admin/panel");
        head.headers
            .insert(header::AUTHORIZATION, "Basic Zm9vOmJhcg==".parse().unwrap());
        let resp = dispatch(&router, RequestGenerator::buffered(head, "")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn first_matching_policy_wins() {
        let mut router = Router::new();
        router
            .add_policy("/x", |_| Some(Response::new(StatusCode::UNAUTHORIZED)))
            .unwrap();
        router
            .add_policy("/x", |_| Some(Response::new(StatusCode::FORBIDDEN)))
            .unwrap();

        let resp = dispatch(&router, get("/x")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn preflight_synthesis_lists_methods() {
        let mut router = Router::new();
        router.generate_preflights(true);
        for method in [Method::GET, Method::POST, Method::DELETE] {
            router
                .add(method, "/foo", |_req| async { Response::new(StatusCode::OK) })
                .unwrap();
        }

        let resp = dispatch(&router, with_method(Method::OPTIONS, "/foo")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.header("access-control-allow-methods"),
            Some("GET, POST, DELETE")
        );

        // no matching route: falls through to the unknown-request answer
        let resp = dispatch(&router, with_method(Method::OPTIONS, "/bar")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redirects_reply_with_location() {
        let mut router = Router::new();
        router
            .add_redirect(StatusCode::PERMANENT_REDIRECT, "/old", "/new")
            .unwrap();

        let resp = dispatch(&router, get("/old")).await;
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.header(header::LOCATION), Some("/new"));

        assert!(matches!(
            router.add_redirect(StatusCode::OK, "/a", "/b"),
            Err(ConfigError::InvalidRedirectStatus(_))
        ));
    }

    #[tokio::test]
    async fn file_serving_rejects_traversal_and_serves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();

        let mut router = Router::new();
        router
            .add_file_serving_at("/static", dir.path())
            .unwrap();

        let resp = dispatch(&router, get("/static/index.html")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.header(header::CONTENT_TYPE), Some("text/html"));

        let resp = dispatch(&router, get("/static/deep/../../secret")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = dispatch(&router, get("/static/absent.css")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn panicking_handlers_become_500() {
        let mut router = Router::new();
        router
            .add(Method::GET, "/boom", |_req| async {
                panic!("handler exploded");
            })
            .unwrap();

        let resp = dispatch(&router, get("/boom")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn invalid_patterns_fail_registration() {
        let mut router = Router::new();
        let err = router
            .add(Method::GET, "(unclosed", |_req| async {
                Response::new(StatusCode::OK)
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoutePattern { .. }));
    }

    #[tokio::test]
    async fn ws_endpoints_resolve_through_subrouters() {
        let mut sub = Router::new();
        sub.add_websocket("/echo", |_head, _conn| async {}).unwrap();

        let mut parent = Router::new();
        parent.add_subrouter("/ws", sub).unwrap();

        let mut target = Target::new("/ws/echo");
        assert!(parent.resolve_ws(&mut target).is_some());
        assert_eq!(target.resource_string(), "/echo");

        let mut target = Target::new("/nope");
        assert!(parent.resolve_ws(&mut target).is_none());
    }
}
