//! The per-connection HTTP read/write pipeline.
//!
//! One task owns the stream and loops: parse head, hand the request to
//! the router through a request generator, write the finalized response.
//! A WebSocket upgrade releases the stream (plus any surplus bytes) into
//! a fresh WebSocket connection and ends the HTTP lifecycle.

use crate::error::{Error, ProtocolError, Result};
use crate::http::wire::{self, BodyFraming, BodyReader, MAX_HEAD_BYTES};
use crate::http::{generator, header, DiscardStorage, RequestHead, Response, StatusCode};
use crate::server::request_generator::RequestGenerator;
use crate::server::routing::Router;
use crate::stream::{Rewind, TcpOrTlsStream};
use crate::websocket::WebSocketConnection;
use bytes::BytesMut;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    /// Maximum accepted request body size.
    pub(crate) body_limit: u64,
    /// Per-operation timeout for header reads and body reads.
    pub(crate) read_timeout: Duration,
    /// Per-operation timeout for writes.
    pub(crate) write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            body_limit: 100 * 1024 * 1024,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) struct HttpConnection {
    stream: TcpOrTlsStream,
    buf: BytesMut,
    router: Arc<Router>,
    doc_root: Arc<PathBuf>,
    cfg: Arc<ConnectionConfig>,
}

impl HttpConnection {
    pub(crate) fn new(
        stream: TcpOrTlsStream,
        router: Arc<Router>,
        doc_root: Arc<PathBuf>,
        cfg: Arc<ConnectionConfig>,
    ) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            router,
            doc_root,
            cfg,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let head = match self.read_head().await {
                Ok(Some(head)) => head,
                Ok(None) => {
                    // peer closed between requests
                    self.close().await;
                    return;
                }
                Err(err) => {
                    self.fail_head_read(err).await;
                    return;
                }
            };

            if head.is_upgrade() {
                self.upgrade(head).await;
                return;
            }

            if !head.target.is_legal() {
                tracing::warn!(raw_target = head.target.raw(), "illegal request target");
                let framing = BodyFraming::for_request(&head.headers).unwrap_or(BodyFraming::None);
                if self.drain_body(framing).await.is_err() {
                    self.close().await;
                    return;
                }
                let keep_alive = head.keep_alive();
                let mut resp = generator::bad_request("illegal URI");
                resp.set_keep_alive(keep_alive);
                if self.send_synthesized(resp).await.is_err() || !keep_alive {
                    self.close().await;
                    return;
                }
                continue;
            }

            let framing = match BodyFraming::for_request(&head.headers) {
                Ok(framing) => framing,
                Err(err) => {
                    tracing::warn!(%err, "unacceptable body framing");
                    let mut resp = generator::bad_request("malformed request");
                    resp.set_keep_alive(false);
                    let _ = self.send_synthesized(resp).await;
                    self.close().await;
                    return;
                }
            };

            // A declared over-limit body is refused before reading it.
            if framing.declared_len().is_some_and(|len| len > self.cfg.body_limit) {
                self.reject_payload().await;
                return;
            }

            let consumed = AtomicBool::new(false);
            let gen = RequestGenerator::new(
                head,
                &mut self.stream,
                &mut self.buf,
                framing,
                self.cfg.body_limit,
                self.cfg.read_timeout,
                &consumed,
            );

            match self.router.dispatch(self.doc_root.as_path(), gen).await {
                Ok(resp) => {
                    // an endpoint that never asked for the body leaves it
                    // on the wire; it must be consumed before the next head
                    if !consumed.load(Ordering::Relaxed)
                        && framing.has_body()
                        && self.drain_body(framing).await.is_err()
                    {
                        self.close().await;
                        return;
                    }
                    let need_eof = resp.need_eof();
                    if let Err(err) = self.write_response(&resp).await {
                        if !err.is_closed() {
                            tracing::error!(%err, "failed to write response");
                        }
                        self.close().await;
                        return;
                    }
                    if need_eof {
                        self.close().await;
                        return;
                    }
                }
                Err(Error::PayloadTooLarge) => {
                    self.reject_payload().await;
                    return;
                }
                Err(err) if err.is_closed() => {
                    tracing::info!("peer closed during request handling");
                    self.close().await;
                    return;
                }
                Err(err) => {
                    tracing::error!(%err, "request handling failed");
                    let mut resp = generator::server_error("request handling failed");
                    resp.set_keep_alive(false);
                    let _ = self.send_synthesized(resp).await;
                    self.close().await;
                    return;
                }
            }
        }
    }

    /// Incrementally read and parse the next request head.
    ///
    /// `Ok(None)` means the peer closed cleanly before sending another
    /// request.
    async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        loop {
            if let Some(head) = wire::parse_request_head(&mut self.buf)? {
                return Ok(Some(head));
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(ProtocolError::HeadTooLarge.into());
            }
            let n = tokio::time::timeout(self.cfg.read_timeout, self.stream.read_buf(&mut self.buf))
                .await
                .map_err(|_| Error::Timeout)??;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }

    async fn fail_head_read(&mut self, err: Error) {
        match &err {
            Error::Protocol(ProtocolError::HeadTooLarge) => {
                let mut resp = Response::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
                resp.set_keep_alive(false);
                let _ = self.send_synthesized(resp).await;
            }
            Error::Protocol(_) => {
                let mut resp = generator::bad_request("malformed request");
                resp.set_keep_alive(false);
                let _ = self.send_synthesized(resp).await;
            }
            Error::Timeout => {
                tracing::debug!("timed out waiting for a request head");
            }
            err if err.is_closed() => {
                tracing::info!("peer closed the connection");
            }
            err => {
                tracing::error!(%err, "failed to read request head");
            }
        }
        self.close().await;
    }

    /// Answer an over-limit body with `413` and close.
    async fn reject_payload(&mut self) {
        tracing::warn!(limit = self.cfg.body_limit, "request body over the limit");
        let mut resp = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
            .with_header(header::CONTENT_TYPE, "text/html")
            .with_body("request body exceeds the configured limit");
        resp.set_keep_alive(false);
        let _ = self.send_synthesized(resp).await;
        self.close().await;
    }

    /// Read and discard an unconsumed request body.
    async fn drain_body(&mut self, framing: BodyFraming) -> Result<()> {
        let mut discard = DiscardStorage;
        BodyReader::new(
            &mut self.stream,
            &mut self.buf,
            framing,
            self.cfg.body_limit,
            self.cfg.read_timeout,
        )
        .drive(&mut discard)
        .await
    }

    /// Finalize and write a response synthesized by the connection itself
    /// (as opposed to one finalized by the router).
    async fn send_synthesized(&mut self, mut resp: Response) -> Result<()> {
        resp.set_header(header::SERVER, self.router.server_string());
        resp.prepare_payload();
        self.write_response(&resp).await
    }

    async fn write_response(&mut self, resp: &Response) -> Result<()> {
        let head = wire::serialize_response_head(resp);
        wire::write_all_timed(&mut self.stream, &head, self.cfg.write_timeout).await?;
        wire::write_body(&mut self.stream, resp.body(), self.cfg.write_timeout).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Hand the stream over to a fresh WebSocket connection.
    async fn upgrade(mut self, head: RequestHead) {
        let mut target = head.target.clone();
        let Some(handler) = self.router.resolve_ws(&mut target) else {
            tracing::warn!(resource = head.target.resource_string(), "no websocket endpoint");
            let mut resp = generator::bad_request("unknown request");
            resp.set_keep_alive(false);
            let _ = self.send_synthesized(resp).await;
            self.close().await;
            return;
        };

        tracing::info!(
            resource = head.target.resource_string(),
            "upgrading HTTP connection to WebSocket"
        );

        // surplus bytes read past the head belong to the WebSocket layer
        let leftover = self.buf.split().freeze();
        let transport = Rewind::new(leftover, self.stream);

        match WebSocketConnection::accept(&head, transport, self.router.server_string()).await {
            Ok(conn) => handler(head, conn).await,
            Err(err) => tracing::error!(%err, "websocket accept failed"),
        }
    }

    /// Graceful shutdown; covers the TLS close-notify exchange, bounded
    /// by 30 s.
    async fn close(&mut self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.stream.shutdown()).await {
            Ok(Ok(())) => tracing::debug!("closed HTTP connection"),
            Ok(Err(err)) => tracing::debug!(%err, "shutdown failed"),
            Err(_) => tracing::warn!("shutdown timed out"),
        }
    }
}
