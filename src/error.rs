//! Error types used throughout the crate.
//!
//! Construction and configuration problems are reported as [`ConfigError`]
//! and always fail fast, before anything is bound or spawned. Everything
//! that can go wrong on a live connection is an [`Error`].

use http::StatusCode;
use std::io;

/// Errors detected while validating configuration or while registering
/// routes, before any I/O happens.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The worker thread count was zero.
    #[error("number of worker threads must be at least 1")]
    InvalidThreadCount,

    /// The I/O runtime could not be created.
    #[error("failed to start I/O runtime")]
    Runtime(#[source] io::Error),

    /// The bind target could not be parsed into a socket address.
    #[error("invalid bind address `{0}`")]
    InvalidAddress(String),

    /// Certificate or private key material was rejected.
    #[error("invalid TLS material: {0}")]
    InvalidTlsMaterial(String),

    /// A redirect was registered with a status outside the 3xx class.
    #[error("redirect status `{0}` is not a 3xx code")]
    InvalidRedirectStatus(StatusCode),

    /// A route pattern failed to compile.
    #[error("invalid route pattern `{pattern}`")]
    InvalidRoutePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A sub-router prefix was empty or did not start with `/`.
    #[error("sub-router prefix `{0}` must be non-empty and start with `/`")]
    InvalidPrefix(String),

    /// A client URL could not be decomposed into scheme/host/port.
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
}

/// Violations of the HTTP/1.1 wire protocol by a peer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("malformed request head")]
    MalformedHead,

    #[error("malformed response head")]
    MalformedResponseHead,

    #[error("request head exceeds the size cap")]
    HeadTooLarge,

    #[error("illegal request target `{0}`")]
    IllegalTarget(String),

    #[error("invalid Content-Length field")]
    InvalidContentLength,

    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,

    #[error("malformed chunked body")]
    MalformedChunk,
}

/// The error type returned by connections, the router and the client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The request body exceeded the configured limit. Connections answer
    /// this with a synthesized 413 before closing.
    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    /// A read, write, connect or handshake did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection. This is a benign terminator: it is
    /// logged at info level and ends the connection without a response.
    #[error("connection closed")]
    Closed,

    #[error("TLS failure")]
    Tls(#[from] rustls::Error),

    #[error("websocket failure")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A body filter or storage refused the request.
    #[error("body filter rejected the request: {0}")]
    Filter(String),

    /// A text-mode WebSocket send was handed a non-UTF-8 payload.
    #[error("text frame payload is not valid UTF-8")]
    InvalidUtf8,
}

impl Error {
    /// Whether this error merely signals that the peer went away.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Closed => true,
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            Error::WebSocket(err) => matches!(
                err,
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::AlreadyClosed
            ),
            _ => false,
        }
    }
}

/// Alias for a `Result` with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
