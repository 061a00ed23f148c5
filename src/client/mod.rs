//! The client side: HTTP requests with filtered bodies and WebSocket
//! connects, over plain TCP or TLS.

mod filter;

pub use filter::{DownloadFilter, ResponseFilter, TextResponseFilter};

use crate::error::{ConfigError, Error, ProtocolError, Result};
use crate::http::wire::{self, BodyFraming, BodyReader, MAX_HEAD_BYTES};
use crate::http::{header, Body, HeaderMap, HeaderValue, Method, Response, ResponseHead, Version};
use crate::stream::{Rewind, TcpOrTlsStream};
use crate::tls::CaSource;
use crate::websocket::WebSocketConnection;
use bytes::BytesMut;
use rustls_pki_types::ServerName;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Value of the outgoing `User-Agent` field.
    pub user_agent: String,
    /// Where TLS roots come from.
    pub tls: CaSource,
    /// Per-operation timeout (connect, handshake, read, write).
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "wharf-client".to_owned(),
            tls: CaSource::Default,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    host: String,
    port: u16,
    tls: bool,
}

struct ParsedUrl {
    tls: bool,
    websocket: bool,
    host: String,
    port: u16,
    target: String,
    host_header: String,
}

/// The high-level client controller.
///
/// Owns the TLS configuration and a small per-host cache of keep-alive
/// connections.
pub struct Controller {
    cfg: ClientConfig,
    connector: TlsConnector,
    pool: Mutex<HashMap<PoolKey, TcpOrTlsStream>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller; fails if the TLS material is unusable.
    pub fn new(cfg: ClientConfig) -> Result<Self, ConfigError> {
        let tls_config = crate::tls::client_config(&cfg.tls)?;
        Ok(Self {
            cfg,
            connector: TlsConnector::from(Arc::new(tls_config)),
            pool: Mutex::new(HashMap::new()),
        })
    }

    /// Issue a body-less request and buffer the response as text.
    pub async fn request(&self, method: Method, url: &str) -> Result<Response> {
        self.request_filtered(method, url, Body::Empty, &TextResponseFilter)
            .await
    }

    /// Issue a request carrying `body`, buffering the response as text.
    pub async fn request_with_body(
        &self,
        method: Method,
        url: &str,
        body: impl Into<Body>,
    ) -> Result<Response> {
        self.request_filtered(method, url, body, &TextResponseFilter)
            .await
    }

    /// Issue a request, letting `filter` choose the response body storage
    /// after the response header arrives.
    pub async fn request_filtered(
        &self,
        method: Method,
        url: &str,
        body: impl Into<Body>,
        filter: &dyn ResponseFilter,
    ) -> Result<Response> {
        let parsed = parse_url(url)?;
        if parsed.websocket {
            return Err(ConfigError::InvalidUrl(url.to_owned()).into());
        }
        let body = body.into();

        let key = PoolKey {
            host: parsed.host.clone(),
            port: parsed.port,
            tls: parsed.tls,
        };
        let pooled = self.pool.lock().await.remove(&key);
        let mut stream = match pooled {
            Some(stream) => {
                tracing::debug!(host = %key.host, port = key.port, "reusing pooled connection");
                stream
            }
            None => self.connect(&parsed).await?,
        };

        let result = self
            .exchange(&mut stream, &parsed, &method, &body, filter)
            .await;

        match result {
            Ok((response, reusable)) => {
                if reusable {
                    self.pool.lock().await.insert(key, stream);
                }
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }

    /// Open a WebSocket connection to a `ws://` or `wss://` URL.
    pub async fn ws_connect(&self, url: &str) -> Result<WebSocketConnection> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let parsed = parse_url(url)?;
        if !parsed.websocket {
            return Err(ConfigError::InvalidUrl(url.to_owned()).into());
        }

        let stream = self.connect(&parsed).await?;
        let transport = Rewind::new_empty(stream);

        let mut request = url
            .into_client_request()
            .map_err(Error::WebSocket)?;
        if let Ok(agent) = HeaderValue::from_str(&self.cfg.user_agent) {
            request.headers_mut().insert(header::USER_AGENT, agent);
        }

        let (ws, _response) = tokio::time::timeout(
            self.cfg.timeout,
            tokio_tungstenite::client_async(request, transport),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::WebSocket)?;

        tracing::debug!(url, "websocket connected");
        Ok(WebSocketConnection::from_upgraded(ws))
    }

    /// Resolve, connect and (for TLS schemes) handshake.
    async fn connect(&self, parsed: &ParsedUrl) -> Result<TcpOrTlsStream> {
        let tcp = tokio::time::timeout(
            self.cfg.timeout,
            TcpStream::connect((parsed.host.as_str(), parsed.port)),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        if !parsed.tls {
            return Ok(TcpOrTlsStream::Plain(tcp));
        }

        let name = ServerName::try_from(parsed.host.clone())
            .map_err(|_| ConfigError::InvalidUrl(parsed.host.clone()))?;
        let stream = tokio::time::timeout(self.cfg.timeout, self.connector.connect(name, tcp))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(stream.into())
    }

    async fn exchange(
        &self,
        stream: &mut TcpOrTlsStream,
        parsed: &ParsedUrl,
        method: &Method,
        body: &Body,
        filter: &dyn ResponseFilter,
    ) -> Result<(Response, bool)> {
        // request
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_str(&parsed.host_header)
            .map_err(|_| ConfigError::InvalidUrl(parsed.host_header.clone()))?);
        if let Ok(agent) = HeaderValue::from_str(&self.cfg.user_agent) {
            headers.insert(header::USER_AGENT, agent);
        }
        let len = body.content_len();
        if len > 0 || *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
        {
            if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
                headers.insert(header::CONTENT_LENGTH, value);
            }
        }

        let head =
            wire::serialize_request_head(method, &parsed.target, Version::HTTP_11, &headers);
        wire::write_all_timed(stream, &head, self.cfg.timeout).await?;
        wire::write_body(stream, body, self.cfg.timeout).await?;
        stream.flush().await?;

        // response
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let mut head = self.read_response_head(stream, &mut buf).await?;
        while head.status.is_informational() {
            head = self.read_response_head(stream, &mut buf).await?;
        }

        let framing = BodyFraming::for_response(&head, *method == Method::HEAD)?;
        let mut storage = filter.storage_for(&head).await?;
        BodyReader::new(stream, &mut buf, framing, u64::MAX, self.cfg.timeout)
            .drive(storage.as_mut())
            .await?;
        let body = storage.finish().await?;

        let reusable = head.keep_alive() && framing != BodyFraming::ReadToEof;
        let response = Response::from_parts(head, body);
        Ok((response, reusable))
    }

    async fn read_response_head(
        &self,
        stream: &mut TcpOrTlsStream,
        buf: &mut BytesMut,
    ) -> Result<ResponseHead> {
        loop {
            if let Some(head) = wire::parse_response_head(buf)? {
                return Ok(head);
            }
            if buf.len() > MAX_HEAD_BYTES {
                return Err(ProtocolError::MalformedResponseHead.into());
            }
            let n = tokio::time::timeout(self.cfg.timeout, stream.read_buf(buf))
                .await
                .map_err(|_| Error::Timeout)??;
            if n == 0 {
                return Err(Error::Closed);
            }
        }
    }
}

fn parse_url(url: &str) -> Result<ParsedUrl, ConfigError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| ConfigError::InvalidUrl(url.to_owned()))?;

    let scheme = uri.scheme_str().unwrap_or("");
    let (tls, websocket, default_port) = match scheme {
        "http" => (false, false, 80),
        "https" => (true, false, 443),
        "ws" => (false, true, 80),
        "wss" => (true, true, 443),
        _ => return Err(ConfigError::InvalidUrl(url.to_owned())),
    };

    let host = uri
        .host()
        .ok_or_else(|| ConfigError::InvalidUrl(url.to_owned()))?
        .to_owned();
    let port = uri.port_u16().unwrap_or(default_port);
    let target = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_owned());
    let host_header = if port == default_port {
        host.clone()
    } else {
        format!("{host}:{port}")
    };

    Ok(ParsedUrl {
        tls,
        websocket,
        host,
        port,
        target,
        host_header,
    })
}
