//! The top-level holder of a router, its configuration and the optional
//! TLS context; consumed by `start` to produce a running server.

use crate::error::{ConfigError, Error, Result};
use crate::runtime::{Runtime, StopFuture};
use crate::server::connection::ConnectionConfig;
use crate::server::listener::Listener;
use crate::server::routing::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Worker threads for the I/O runtime owned by [`RoutingContext::start`].
    pub num_threads: usize,
    /// Interface to bind to.
    pub interface: String,
    /// Port to listen on; `0` lets the OS pick one.
    pub port: u16,
    /// Base path for file-serving endpoints that request it.
    pub doc_root: PathBuf,
    /// Value of the outgoing `Server` field.
    pub agent_string: String,
    /// Maximum accepted request body size in bytes.
    pub request_body_limit: u64,
    /// Per-operation read timeout.
    pub read_timeout: Duration,
    /// Per-operation write timeout.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            num_threads: 1,
            interface: "127.0.0.1".to_owned(),
            port: 8080,
            doc_root: PathBuf::from("."),
            agent_string: "wharf".to_owned(),
            request_body_limit: defaults.body_limit,
            read_timeout: defaults.read_timeout,
            write_timeout: defaults.write_timeout,
        }
    }
}

/// Holds everything needed to start serving: configuration, the router
/// tree and (optionally) a TLS context.
#[derive(Debug)]
pub struct RoutingContext {
    cfg: ServerConfig,
    router: Router,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl RoutingContext {
    /// Validates the configuration; fails fast, nothing is bound yet.
    pub fn new(cfg: ServerConfig) -> Result<Self, ConfigError> {
        if cfg.num_threads == 0 {
            return Err(ConfigError::InvalidThreadCount);
        }
        Ok(Self {
            cfg,
            router: Router::new(),
            tls: None,
        })
    }

    /// The top-level router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The top-level router, for registering endpoints.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Enable TLS from in-memory PEM material.
    pub fn init_tls(&mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<(), ConfigError> {
        let config = crate::tls::server_config(cert_pem, key_pem)?;
        self.tls = Some(Arc::new(config));
        Ok(())
    }

    /// Enable TLS from PEM files on disk.
    pub fn init_tls_files(
        &mut self,
        cert: &std::path::Path,
        key: &std::path::Path,
    ) -> Result<(), ConfigError> {
        let config = crate::tls::server_config_from_files(cert, key)?;
        self.tls = Some(Arc::new(config));
        Ok(())
    }

    /// Start serving on a runtime owned by the returned [`Server`].
    ///
    /// Bind errors surface here; nothing keeps running on failure.
    pub fn start(self) -> Result<Server> {
        let runtime = Runtime::start(self.cfg.num_threads)?;
        let handle = match runtime.block_on(self.launch()) {
            Ok(handle) => handle,
            Err(err) => return Err(err),
        };
        Ok(Server { runtime, handle })
    }

    /// Start serving on the ambient tokio runtime.
    ///
    /// This is the embeddable flavor of [`start`](Self::start): the caller
    /// keeps control of the executor.
    pub async fn start_on_current(self) -> Result<ServerHandle> {
        self.launch().await
    }

    async fn launch(mut self) -> Result<ServerHandle> {
        let addr: SocketAddr = format!("{}:{}", self.cfg.interface, self.cfg.port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidAddress(format!("{}:{}", self.cfg.interface, self.cfg.port))
            })?;

        self.router.set_server_string(&self.cfg.agent_string);

        let listener = TcpListener::bind(addr).await.map_err(|err| {
            tracing::error!(%addr, %err, "could not bind listener");
            Error::Io(err)
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, tls = self.tls.is_some(), "listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = Arc::new(ConnectionConfig {
            body_limit: self.cfg.request_body_limit,
            read_timeout: self.cfg.read_timeout,
            write_timeout: self.cfg.write_timeout,
        });

        let listener = Listener::new(
            listener,
            self.tls.take(),
            Arc::new(self.router),
            Arc::new(self.cfg.doc_root.clone()),
            cfg,
            shutdown_rx,
        );
        let task = tokio::spawn(listener.run());

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// A server running on the ambient runtime.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to end.
    ///
    /// Connections already in flight finish on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// A server owning its runtime, as produced by [`RoutingContext::start`].
#[derive(Debug)]
pub struct Server {
    runtime: Runtime,
    handle: ServerHandle,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Stop the server and its runtime. The returned future resolves once
    /// all worker threads have joined.
    pub fn stop(self) -> StopFuture {
        let _ = self.handle.shutdown.send(true);
        self.runtime.stop()
    }
}
