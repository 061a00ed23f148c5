//! Accepting connections, with optional TLS detection.

use crate::server::connection::{ConnectionConfig, HttpConnection};
use crate::server::routing::Router;
use crate::stream::TcpOrTlsStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// First byte of a TLS record of type `handshake`.
const TLS_RECORD_HANDSHAKE: u8 = 0x16;

pub(crate) struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Arc<Router>,
    doc_root: Arc<PathBuf>,
    cfg: Arc<ConnectionConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Listener {
    pub(crate) fn new(
        inner: TcpListener,
        tls: Option<Arc<rustls::ServerConfig>>,
        router: Arc<Router>,
        doc_root: Arc<PathBuf>,
        cfg: Arc<ConnectionConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner,
            tls: tls.map(TlsAcceptor::from),
            router,
            doc_root,
            cfg,
            shutdown,
        }
    }

    /// Accept until the shutdown signal fires. Accept errors are logged
    /// and never terminate the loop.
    pub(crate) async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    tracing::debug!("listener shutting down");
                    return;
                }
                accepted = self.inner.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(%err, "accept failed");
                    continue;
                }
            };
            tracing::info!(%peer, "accepted incoming connection");

            let tls = self.tls.clone();
            let router = Arc::clone(&self.router);
            let doc_root = Arc::clone(&self.doc_root);
            let cfg = Arc::clone(&self.cfg);
            tokio::spawn(async move {
                match detect(socket, tls).await {
                    Ok(stream) => {
                        HttpConnection::new(stream, router, doc_root, cfg).run().await;
                    }
                    Err(err) => {
                        tracing::warn!(%peer, %err, "connection setup failed");
                    }
                }
            });
        }
    }
}

/// Sniff the first byte of an accepted socket: a TLS handshake record is
/// routed through the acceptor, anything else is treated as plain HTTP.
async fn detect(
    socket: TcpStream,
    tls: Option<TlsAcceptor>,
) -> Result<TcpOrTlsStream, crate::error::Error> {
    let Some(acceptor) = tls else {
        return Ok(TcpOrTlsStream::Plain(socket));
    };

    let mut first = [0u8; 1];
    let n = socket.peek(&mut first).await?;
    if n == 1 && first[0] == TLS_RECORD_HANDSHAKE {
        let stream = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(socket))
            .await
            .map_err(|_| crate::error::Error::Timeout)??;
        Ok(stream.into())
    } else {
        Ok(TcpOrTlsStream::Plain(socket))
    }
}
