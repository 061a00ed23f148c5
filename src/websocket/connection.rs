//! The WebSocket connection state machine, serving both roles.

use super::queue::{action, ActionQueue};
use super::Message;
use crate::error::{Error, Result};
use crate::http::{header, RequestHead};
use crate::stream::{Rewind, TcpOrTlsStream};
use base64::Engine;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage, Role};
use tokio_tungstenite::WebSocketStream;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type Transport = Rewind<TcpOrTlsStream>;
type WsStream = WebSocketStream<Transport>;
type WriteHalf = SplitSink<WsStream, WsMessage>;
type ReadHalf = SplitStream<WsStream>;

/// The lifecycle state of a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Inactive = 0,
    Handshaking = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
}

struct Shared {
    state: AtomicU8,
    binary: AtomicBool,
}

impl Shared {
    fn new(state: ConnectionState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            binary: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            0 => ConnectionState::Inactive,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Active,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    // States only ever move forward.
    fn advance(&self, to: ConnectionState) {
        self.state.fetch_max(to as u8, Ordering::SeqCst);
    }
}

struct WriterState {
    sink: WriteHalf,
    shared: Arc<Shared>,
    close_sent: bool,
}

struct ReaderState {
    stream: ReadHalf,
    shared: Arc<Shared>,
    force: watch::Receiver<bool>,
}

/// A full-duplex framed message transport over an upgraded stream.
///
/// The handle is cheap to clone; all clones drive the same connection.
/// Sends and reads are serialized per direction through action queues:
/// at most one outstanding operation per direction, completions in
/// enqueue order, reads and writes concurrent with each other.
#[derive(Clone)]
pub struct WebSocketConnection {
    shared: Arc<Shared>,
    write_queue: ActionQueue<WriterState>,
    read_queue: ActionQueue<ReaderState>,
    force_tx: Arc<watch::Sender<bool>>,
    op_timeout: Option<Duration>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("state", &self.state())
            .field("binary", &self.binary())
            .finish_non_exhaustive()
    }
}

impl WebSocketConnection {
    /// Server side: answer the upgrade request on `stream` with a `101`
    /// and run the connection.
    ///
    /// The `Server` field of the handshake response carries `agent`.
    pub(crate) async fn accept(
        head: &RequestHead,
        mut stream: Transport,
        agent: &str,
    ) -> Result<Self> {
        use tokio_tungstenite::tungstenite::error::ProtocolError as WsProtocolError;

        let shared = Arc::new(Shared::new(ConnectionState::Inactive));
        shared.advance(ConnectionState::Handshaking);

        let key = head
            .header(header::SEC_WEBSOCKET_KEY)
            .ok_or(Error::WebSocket(
                WsProtocolError::MissingSecWebSocketKey.into(),
            ))?;
        let version_ok = head
            .header(header::SEC_WEBSOCKET_VERSION)
            .is_some_and(|v| v == "13");
        if !version_ok {
            return Err(Error::WebSocket(
                WsProtocolError::MissingSecWebSocketVersionHeader.into(),
            ));
        }

        let accept_key = derive_accept_key(key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {accept_key}\r\n\
             Server: {agent}\r\n\
             \r\n"
        );
        crate::http::wire::write_all_timed(&mut stream, response.as_bytes(), HANDSHAKE_TIMEOUT)
            .await?;

        let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        tracing::debug!("accepted websocket connection");
        Ok(Self::run(ws, shared))
    }

    /// Client side: adopt a stream whose handshake `tokio-tungstenite`
    /// already completed.
    pub(crate) fn from_upgraded(ws: WsStream) -> Self {
        let shared = Arc::new(Shared::new(ConnectionState::Handshaking));
        Self::run(ws, shared)
    }

    fn run(ws: WsStream, shared: Arc<Shared>) -> Self {
        let (force_tx, force_rx) = watch::channel(false);
        let (sink, stream) = ws.split();

        let writer = WriterState {
            sink,
            shared: Arc::clone(&shared),
            close_sent: false,
        };
        let reader = ReaderState {
            stream,
            shared: Arc::clone(&shared),
            force: force_rx.clone(),
        };

        let write_queue = ActionQueue::spawn(writer, force_rx.clone(), writer_finalizer);
        let read_queue = ActionQueue::spawn(reader, force_rx, reader_finalizer);

        shared.advance(ConnectionState::Active);
        Self {
            shared,
            write_queue,
            read_queue,
            force_tx: Arc::new(force_tx),
            op_timeout: None,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Switch outgoing frames between binary and text mode.
    pub fn set_binary(&self, enabled: bool) {
        self.shared.binary.store(enabled, Ordering::SeqCst);
    }

    pub fn binary(&self) -> bool {
        self.shared.binary.load(Ordering::SeqCst)
    }

    /// Bound every `send`/`read` await with a timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.op_timeout = timeout;
    }

    /// Send one message; resolves once the frame has been written.
    ///
    /// In text mode (the default) the payload must be valid UTF-8.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let rx = self.enqueue_send(payload.into())?;
        self.bounded(rx).await?
    }

    /// Callback dual of [`send`](Self::send); the payload is enqueued
    /// immediately, preserving call order.
    pub fn send_with<F>(&self, payload: impl Into<Bytes>, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        match self.enqueue_send(payload.into()) {
            Ok(rx) => {
                tokio::spawn(async move {
                    on_complete(rx.await.unwrap_or(Err(Error::Closed)));
                });
            }
            Err(err) => on_complete(Err(err)),
        }
    }

    fn enqueue_send(&self, payload: Bytes) -> Result<oneshot::Receiver<Result<()>>> {
        if self.state() >= ConnectionState::Closing {
            return Err(Error::Closed);
        }
        let binary = self.binary();
        let (tx, rx) = oneshot::channel();
        let pushed = self.write_queue.push(action(move |w: &mut WriterState| {
            Box::pin(async move {
                let _ = tx.send(write_message(w, payload, binary).await);
            })
        }));
        if !pushed {
            return Err(Error::Closed);
        }
        Ok(rx)
    }

    /// Read the next text or binary message.
    ///
    /// Resolves with [`Error::Closed`] once the peer disconnects; no
    /// completions fire after that.
    pub async fn read(&self) -> Result<Message> {
        let rx = self.enqueue_read()?;
        self.bounded(rx).await?
    }

    /// Callback dual of [`read`](Self::read).
    pub fn read_with<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        match self.enqueue_read() {
            Ok(rx) => {
                tokio::spawn(async move {
                    on_complete(rx.await.unwrap_or(Err(Error::Closed)));
                });
            }
            Err(err) => on_complete(Err(err)),
        }
    }

    fn enqueue_read(&self) -> Result<oneshot::Receiver<Result<Message>>> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let pushed = self.read_queue.push(action(move |r: &mut ReaderState| {
            Box::pin(async move {
                let _ = tx.send(read_message(r).await);
            })
        }));
        if !pushed {
            return Err(Error::Closed);
        }
        Ok(rx)
    }

    /// Gracefully close the connection.
    ///
    /// A close action is enqueued on both queues and they race; whichever
    /// runs first performs the close, the other observes the state change
    /// and becomes a no-op. Idempotent once closing.
    pub async fn disconnect(&self) {
        self.disconnect_with("").await;
    }

    /// [`disconnect`](Self::disconnect) with a close reason.
    pub async fn disconnect_with(&self, reason: impl Into<String>) {
        if self.state() >= ConnectionState::Closing {
            return;
        }
        let reason = reason.into();
        tracing::debug!(%reason, "disconnecting websocket");

        let (wtx, wrx) = oneshot::channel();
        self.write_queue.push(action(move |w: &mut WriterState| {
            Box::pin(async move {
                if w.shared.state() < ConnectionState::Closed {
                    w.shared.advance(ConnectionState::Closing);
                    send_close(w, &reason).await;
                }
                let _ = wtx.send(());
            })
        }));

        let (rtx, rrx) = oneshot::channel();
        self.read_queue.push(action(move |r: &mut ReaderState| {
            Box::pin(async move {
                r.shared.advance(ConnectionState::Closing);
                let _ = rtx.send(());
            })
        }));

        let _ = wrx.await;
        let _ = rrx.await;
    }

    /// Close immediately, bypassing both queues. Queued actions are
    /// dropped; in-flight reads resolve with [`Error::Closed`].
    pub fn force_disconnect(&self) {
        if self.state() >= ConnectionState::Closing {
            return;
        }
        tracing::debug!("force-disconnecting websocket");
        self.shared.advance(ConnectionState::Closing);
        let _ = self.force_tx.send(true);
    }

    async fn bounded<T>(&self, rx: oneshot::Receiver<Result<T>>) -> Result<Result<T>> {
        match self.op_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(res) => Ok(res.unwrap_or(Err(Error::Closed))),
                Err(_) => Err(Error::Timeout),
            },
            None => Ok(rx.await.unwrap_or(Err(Error::Closed))),
        }
    }
}

async fn write_message(w: &mut WriterState, payload: Bytes, binary: bool) -> Result<()> {
    if w.shared.state() >= ConnectionState::Closing {
        return Err(Error::Closed);
    }
    let msg = if binary {
        WsMessage::binary(payload)
    } else {
        let text = String::from_utf8(payload.to_vec()).map_err(|_| Error::InvalidUtf8)?;
        WsMessage::text(text)
    };
    w.sink.send(msg).await.map_err(map_ws_error)
}

async fn read_message(r: &mut ReaderState) -> Result<Message> {
    if r.shared.state() == ConnectionState::Closed {
        return Err(Error::Closed);
    }
    loop {
        tokio::select! {
            biased;
            _ = r.force.changed() => {
                r.shared.advance(ConnectionState::Closed);
                return Err(Error::Closed);
            }
            msg = r.stream.next() => match msg {
                None => {
                    r.shared.advance(ConnectionState::Closed);
                    return Err(Error::Closed);
                }
                Some(Err(err)) => {
                    let err = map_ws_error(err);
                    if err.is_closed() {
                        r.shared.advance(ConnectionState::Closed);
                        return Err(Error::Closed);
                    }
                    tracing::warn!(%err, "websocket read failed");
                    return Err(err);
                }
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Message::Text(text.as_str().to_owned()));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(Message::Binary(data));
                }
                Some(Ok(WsMessage::Close(_))) => {
                    r.shared.advance(ConnectionState::Closed);
                    return Err(Error::Closed);
                }
                // control frames are handled by the protocol layer
                Some(Ok(_)) => continue,
            }
        }
    }
}

async fn send_close(w: &mut WriterState, reason: &str) {
    if w.close_sent {
        return;
    }
    w.close_sent = true;
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_owned().into(),
    };
    if let Err(err) = w.sink.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(%err, "close frame could not be written");
    }
    let _ = w.sink.flush().await;
}

fn writer_finalizer(w: &mut WriterState) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if w.shared.state() < ConnectionState::Closed {
            w.shared.advance(ConnectionState::Closing);
            send_close(w, "").await;
        }
    })
}

fn reader_finalizer(r: &mut ReaderState) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        r.shared.advance(ConnectionState::Closed);
    })
}

fn map_ws_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => Error::Closed,
        WsError::Io(err) => Error::Io(err),
        other => Error::WebSocket(other),
    }
}

/// `base64(sha1(key + GUID))`, the accept token of RFC 6455 §4.2.2.
pub(crate) fn derive_accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sha1.finalize())
}
