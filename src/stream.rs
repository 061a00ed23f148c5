//! A unified read/write surface over plain and TLS-wrapped TCP streams.

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

/// Either a plain TCP stream or a TLS-wrapped one.
///
/// Both server- and client-side TLS streams are covered; the
/// [`tokio_rustls::TlsStream`] enum carries the role.
#[derive(Debug)]
pub enum TcpOrTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl TcpOrTlsStream {
    /// The address of the peer this stream is connected to.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            TcpOrTlsStream::Plain(s) => s.peer_addr(),
            TcpOrTlsStream::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }

    /// Whether the transport is TLS-wrapped.
    pub fn is_tls(&self) -> bool {
        matches!(self, TcpOrTlsStream::Tls(_))
    }
}

impl From<TcpStream> for TcpOrTlsStream {
    fn from(s: TcpStream) -> Self {
        TcpOrTlsStream::Plain(s)
    }
}

impl From<tokio_rustls::server::TlsStream<TcpStream>> for TcpOrTlsStream {
    fn from(s: tokio_rustls::server::TlsStream<TcpStream>) -> Self {
        TcpOrTlsStream::Tls(Box::new(TlsStream::Server(s)))
    }
}

impl From<tokio_rustls::client::TlsStream<TcpStream>> for TcpOrTlsStream {
    fn from(s: tokio_rustls::client::TlsStream<TcpStream>) -> Self {
        TcpOrTlsStream::Tls(Box::new(TlsStream::Client(s)))
    }
}

impl AsyncRead for TcpOrTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TcpOrTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            TcpOrTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TcpOrTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TcpOrTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            TcpOrTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TcpOrTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            TcpOrTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    // For the TLS variant this drives the close-notify exchange.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TcpOrTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            TcpOrTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A stream wrapper that replays a prefix of already-consumed bytes before
/// reading from the inner stream.
///
/// The HTTP connection reads greedily while parsing the request head; on a
/// WebSocket upgrade the surplus belongs to the WebSocket layer, which gets
/// it back through this wrapper.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn new_empty(inner: S) -> Self {
        Self {
            prefix: Bytes::new(),
            inner,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn rewind_replays_prefix_before_inner() {
        let (client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut server, b" world")
            .await
            .unwrap();
        drop(server);

        let mut stream = Rewind::new(Bytes::from_static(b"hello"), client);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
