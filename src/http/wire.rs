//! HTTP/1.1 wire plumbing shared by the server connection and the client:
//! incremental head parsing, body framing and message serialization.

use super::request::{append_header, RequestHead};
use super::{Body, BodyStorage, Response, Target};
use crate::error::{Error, ProtocolError, Result};
use bytes::{Buf, BytesMut};
use http::header::{self, HeaderMap};
use http::{Method, StatusCode, Version};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Cap on the serialized size of a message head.
pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 16 * 1024;

/// The parsed head of an HTTP response, as seen by the client.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// The value of the first header with the given name, as a string.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the server intends to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header(header::CONNECTION).unwrap_or("");
        match self.version {
            Version::HTTP_10 => connection.eq_ignore_ascii_case("keep-alive"),
            _ => !connection
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("close")),
        }
    }
}

fn parsed_version(v: Option<u8>) -> Version {
    match v {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

/// Try to parse a request head out of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the consumed
/// prefix is removed from `buf`.
pub(crate) fn parse_request_head(buf: &mut BytesMut) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let status = req
        .parse(buf)
        .map_err(|_| ProtocolError::MalformedHead)?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(ProtocolError::MalformedHead)?;
    let target = Target::new(req.path.ok_or(ProtocolError::MalformedHead)?);
    let version = parsed_version(req.version);

    let mut map = HeaderMap::new();
    for h in req.headers.iter() {
        append_header(&mut map, h.name.as_bytes(), h.value)
            .ok_or(ProtocolError::MalformedHead)?;
    }

    buf.advance(consumed);
    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers: map,
    }))
}

/// Try to parse a response head out of `buf`; counterpart of
/// [`parse_request_head`] for the client side.
pub(crate) fn parse_response_head(buf: &mut BytesMut) -> Result<Option<ResponseHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let status = resp
        .parse(buf)
        .map_err(|_| ProtocolError::MalformedResponseHead)?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let code = resp.code.ok_or(ProtocolError::MalformedResponseHead)?;
    let status_code =
        StatusCode::from_u16(code).map_err(|_| ProtocolError::MalformedResponseHead)?;
    let version = parsed_version(resp.version);

    let mut map = HeaderMap::new();
    for h in resp.headers.iter() {
        append_header(&mut map, h.name.as_bytes(), h.value)
            .ok_or(ProtocolError::MalformedResponseHead)?;
    }

    buf.advance(consumed);
    Ok(Some(ResponseHead {
        status: status_code,
        version,
        headers: map,
    }))
}

/// How the body of a message is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    None,
    ContentLength(u64),
    Chunked,
    /// Body runs until the peer closes the connection (responses only).
    ReadToEof,
}

impl BodyFraming {
    pub(crate) fn for_request(headers: &HeaderMap) -> Result<Self, ProtocolError> {
        if let Some(te) = headers.get(header::TRANSFER_ENCODING) {
            let te = te
                .to_str()
                .map_err(|_| ProtocolError::UnsupportedTransferEncoding)?;
            if te.eq_ignore_ascii_case("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            return Err(ProtocolError::UnsupportedTransferEncoding);
        }
        match headers.get(header::CONTENT_LENGTH) {
            Some(v) => {
                let len = v
                    .to_str()
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or(ProtocolError::InvalidContentLength)?;
                if len == 0 {
                    Ok(BodyFraming::None)
                } else {
                    Ok(BodyFraming::ContentLength(len))
                }
            }
            None => Ok(BodyFraming::None),
        }
    }

    pub(crate) fn for_response(head: &ResponseHead, is_head: bool) -> Result<Self, ProtocolError> {
        if is_head
            || head.status.is_informational()
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyFraming::None);
        }
        if let Some(te) = head.headers.get(header::TRANSFER_ENCODING) {
            let te = te
                .to_str()
                .map_err(|_| ProtocolError::UnsupportedTransferEncoding)?;
            if te.eq_ignore_ascii_case("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            return Err(ProtocolError::UnsupportedTransferEncoding);
        }
        match head.headers.get(header::CONTENT_LENGTH) {
            Some(v) => {
                let len = v
                    .to_str()
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or(ProtocolError::InvalidContentLength)?;
                if len == 0 {
                    Ok(BodyFraming::None)
                } else {
                    Ok(BodyFraming::ContentLength(len))
                }
            }
            None => Ok(BodyFraming::ReadToEof),
        }
    }

    pub(crate) fn has_body(&self) -> bool {
        !matches!(self, BodyFraming::None)
    }

    /// The up-front declared body size, when there is one.
    pub(crate) fn declared_len(&self) -> Option<u64> {
        match self {
            BodyFraming::ContentLength(n) => Some(*n),
            _ => None,
        }
    }
}

/// Streams one message body from `(buf, stream)` into a [`BodyStorage`].
pub(crate) struct BodyReader<'a, S> {
    stream: &'a mut S,
    buf: &'a mut BytesMut,
    framing: BodyFraming,
    limit: u64,
    timeout: Duration,
}

impl<'a, S: AsyncRead + Unpin> BodyReader<'a, S> {
    pub(crate) fn new(
        stream: &'a mut S,
        buf: &'a mut BytesMut,
        framing: BodyFraming,
        limit: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            stream,
            buf,
            framing,
            limit,
            timeout,
        }
    }

    /// Read the entire body into `storage`.
    pub(crate) async fn drive(mut self, storage: &mut dyn BodyStorage) -> Result<()> {
        match self.framing {
            BodyFraming::None => Ok(()),
            BodyFraming::ContentLength(len) => {
                if len > self.limit {
                    return Err(Error::PayloadTooLarge);
                }
                self.copy_exact(len, storage).await
            }
            BodyFraming::Chunked => self.copy_chunked(storage).await,
            BodyFraming::ReadToEof => self.copy_to_eof(storage).await,
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let n = tokio::time::timeout(self.timeout, self.stream.read_buf(self.buf))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(n)
    }

    async fn copy_exact(&mut self, mut remaining: u64, storage: &mut dyn BodyStorage) -> Result<()> {
        while remaining > 0 {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            let take = (self.buf.len() as u64).min(remaining) as usize;
            let chunk = self.buf.split_to(take);
            storage.write_chunk(&chunk).await?;
            remaining -= take as u64;
        }
        Ok(())
    }

    async fn copy_to_eof(&mut self, storage: &mut dyn BodyStorage) -> Result<()> {
        let mut total = 0u64;
        loop {
            if !self.buf.is_empty() {
                total += self.buf.len() as u64;
                if total > self.limit {
                    return Err(Error::PayloadTooLarge);
                }
                let chunk = self.buf.split();
                storage.write_chunk(&chunk).await?;
            }
            if self.fill().await? == 0 {
                return Ok(());
            }
        }
    }

    async fn copy_chunked(&mut self, storage: &mut dyn BodyStorage) -> Result<()> {
        let mut total = 0u64;
        loop {
            let line = self.read_line().await?;
            let size_str = line.split(';').next().unwrap_or("").trim();
            let size = u64::from_str_radix(size_str, 16)
                .map_err(|_| ProtocolError::MalformedChunk)?;

            if size == 0 {
                // trailer section, up to the terminating empty line
                loop {
                    if self.read_line().await?.is_empty() {
                        return Ok(());
                    }
                }
            }

            total += size;
            if total > self.limit {
                return Err(Error::PayloadTooLarge);
            }
            self.copy_exact(size, storage).await?;

            if !self.read_line().await?.is_empty() {
                return Err(ProtocolError::MalformedChunk.into());
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos);
                self.buf.advance(2);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.buf.len() > 8 * 1024 {
                return Err(ProtocolError::MalformedChunk.into());
            }
            if self.fill().await? == 0 {
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

fn serialize_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

pub(crate) fn serialize_response_head(resp: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(version_str(resp.version()).as_bytes());
    out.push(b' ');
    out.extend_from_slice(resp.status().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(
        resp.status()
            .canonical_reason()
            .unwrap_or("Unknown")
            .as_bytes(),
    );
    out.extend_from_slice(b"\r\n");
    // the connection fate is carried explicitly so both HTTP/1.0 and
    // HTTP/1.1 peers read it the same way
    if !resp.headers().contains_key(header::CONNECTION) {
        if resp.need_eof() {
            out.extend_from_slice(b"connection: close\r\n");
        } else if resp.version() == Version::HTTP_10 {
            out.extend_from_slice(b"connection: keep-alive\r\n");
        }
    }
    serialize_headers(&mut out, resp.headers());
    out
}

pub(crate) fn serialize_request_head(
    method: &Method,
    target: &str,
    version: Version,
    headers: &HeaderMap,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(version_str(version).as_bytes());
    out.extend_from_slice(b"\r\n");
    serialize_headers(&mut out, headers);
    out
}

/// Write a message body to the stream. File bodies are streamed from disk
/// in chunks.
pub(crate) async fn write_body<S: AsyncWrite + Unpin>(
    stream: &mut S,
    body: &Body,
    timeout: Duration,
) -> Result<()> {
    match body {
        Body::Empty => Ok(()),
        Body::Text(s) => write_all_timed(stream, s.as_bytes(), timeout).await,
        Body::Bytes(b) => write_all_timed(stream, b, timeout).await,
        Body::File(f) => {
            let mut file = tokio::fs::File::open(f.path()).await?;
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let n = file.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                write_all_timed(stream, &chunk[..n], timeout).await?;
            }
        }
    }
}

pub(crate) async fn write_all_timed<S: AsyncWrite + Unpin>(
    stream: &mut S,
    bytes: &[u8],
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, stream.write_all(bytes))
        .await
        .map_err(|_| Error::Timeout)??;
    Ok(())
}
