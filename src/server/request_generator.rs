//! Two-phase request materialization.
//!
//! After the head is parsed the connection does not touch the body.
//! It wraps the parse state into a [`RequestGenerator`], which exposes the
//! header synchronously; whoever handles the request picks a
//! [`BodyStorage`] and only then are the body bytes consumed. Consuming
//! `self` makes the at-most-once body rule a compile-time property.

use crate::error::Result;
use crate::http::wire::{BodyFraming, BodyReader};
use crate::http::{BodyStorage, Request, RequestHead, StringStorage};
use crate::stream::TcpOrTlsStream;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Header-first accessor for an incoming request.
pub struct RequestGenerator<'a> {
    head: RequestHead,
    source: BodySource<'a>,
}

enum BodySource<'a> {
    Connection {
        stream: &'a mut TcpOrTlsStream,
        buf: &'a mut BytesMut,
        framing: BodyFraming,
        limit: u64,
        timeout: Duration,
        consumed: &'a AtomicBool,
    },
    Buffered(Bytes),
}

impl<'a> RequestGenerator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        head: RequestHead,
        stream: &'a mut TcpOrTlsStream,
        buf: &'a mut BytesMut,
        framing: BodyFraming,
        limit: u64,
        timeout: Duration,
        consumed: &'a AtomicBool,
    ) -> Self {
        Self {
            head,
            source: BodySource::Connection {
                stream,
                buf,
                framing,
                limit,
                timeout,
                consumed,
            },
        }
    }

    /// A generator over an already-buffered body, independent of any
    /// connection.
    pub(crate) fn buffered(head: RequestHead, body: impl Into<Bytes>) -> RequestGenerator<'static> {
        RequestGenerator {
            head,
            source: BodySource::Buffered(body.into()),
        }
    }

    /// The parsed request head.
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub(crate) fn head_mut(&mut self) -> &mut RequestHead {
        &mut self.head
    }

    /// Materialize the body into `storage` and produce the full request.
    pub async fn body(self, mut storage: Box<dyn BodyStorage>) -> Result<Request> {
        let head = self.head;
        match self.source {
            BodySource::Connection {
                stream,
                buf,
                framing,
                limit,
                timeout,
                consumed,
            } => {
                consumed.store(true, Ordering::Relaxed);
                BodyReader::new(stream, buf, framing, limit, timeout)
                    .drive(storage.as_mut())
                    .await?;
            }
            BodySource::Buffered(bytes) => {
                storage.write_chunk(&bytes).await?;
            }
        }
        let body = storage.finish().await?;
        Ok(Request::new(head, body))
    }

    /// Materialize with the default in-memory string storage.
    pub async fn into_request(self) -> Result<Request> {
        self.body(Box::new(StringStorage::new())).await
    }

    /// Drop the body source and keep only the head; used for endpoints
    /// that never look at a body.
    pub(crate) fn into_head(self) -> RequestHead {
        self.head
    }
}

impl std::fmt::Debug for RequestGenerator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGenerator")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn buffered_generator_materializes_text() {
        let head = RequestHead::new(Method::POST, "/echo");
        let gen = RequestGenerator::buffered(head, "payload");
        let req = gen.into_request().await.unwrap();
        assert_eq!(req.body_text(), Some("payload"));
    }
}
