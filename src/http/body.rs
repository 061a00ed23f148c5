//! Message bodies and the storage they materialize into.
//!
//! A body is chosen *after* the header has been observed but *before* any
//! body bytes are consumed: endpoints (and client-side response filters)
//! return a [`BodyStorage`] implementation and the connection streams the
//! bytes into it. The concrete variants live in [`Body`]; new kinds of
//! storage remain addable through the trait.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A materialized message body.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// An in-memory UTF-8 body.
    Text(String),
    /// An in-memory binary body.
    Bytes(Bytes),
    /// A body stored as a file on disk; contents are streamed, never held
    /// in memory as a whole.
    File(FileBody),
}

/// Reference to an on-disk body.
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
    len: u64,
}

impl FileBody {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Body {
    pub fn text(s: impl Into<String>) -> Self {
        Body::Text(s.into())
    }

    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Body::Bytes(b.into())
    }

    /// Build a file body from an existing regular file.
    pub async fn file(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Ok(Body::File(FileBody {
            path,
            len: meta.len(),
        }))
    }

    /// The number of bytes this body serializes to.
    pub fn content_len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Text(s) => s.len() as u64,
            Body::Bytes(b) => b.len() as u64,
            Body::File(f) => f.len,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Body::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

/// Sink that body bytes are streamed into while a request (or client-side
/// response) is materialized.
#[async_trait]
pub trait BodyStorage: Send {
    /// Append a chunk of body bytes.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Finish writing and produce the materialized [`Body`].
    async fn finish(self: Box<Self>) -> Result<Body>;
}

/// Storage accumulating the body as a UTF-8 string (lossy).
#[derive(Debug, Default)]
pub struct StringStorage {
    buf: BytesMut,
}

impl StringStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BodyStorage for StringStorage {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Body> {
        Ok(Body::Text(
            String::from_utf8_lossy(&self.buf).into_owned(),
        ))
    }
}

/// Storage accumulating the body as raw bytes.
#[derive(Debug, Default)]
pub struct BytesStorage {
    buf: BytesMut,
}

impl BytesStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BodyStorage for BytesStorage {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Body> {
        Ok(Body::Bytes(self.buf.freeze()))
    }
}

/// Storage that throws the body away.
#[derive(Debug, Default)]
pub struct DiscardStorage;

#[async_trait]
impl BodyStorage for DiscardStorage {
    async fn write_chunk(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Body> {
        Ok(Body::Empty)
    }
}

/// Storage that writes the body straight to a file on disk, so large
/// uploads never pass through memory as a whole.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    file: tokio::fs::File,
    written: u64,
}

impl FileStorage {
    /// Create (or truncate) the file at `path`. Parent directories are
    /// created as needed.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
            }
        }
        let file = tokio::fs::File::create(&path).await.map_err(Error::Io)?;
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }
}

#[async_trait]
impl BodyStorage for FileStorage {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await.map_err(Error::Io)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<Body> {
        self.file.flush().await.map_err(Error::Io)?;
        Ok(Body::File(FileBody {
            path: self.path,
            len: self.written,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_storage_accumulates_chunks() {
        let mut storage: Box<dyn BodyStorage> = Box::new(StringStorage::new());
        storage.write_chunk(b"hello ").await.unwrap();
        storage.write_chunk(b"world").await.unwrap();
        let body = storage.finish().await.unwrap();
        assert_eq!(body.as_text(), Some("hello world"));
        assert_eq!(body.content_len(), 11);
    }

    #[tokio::test]
    async fn file_storage_streams_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");

        let mut storage: Box<dyn BodyStorage> = Box::new(FileStorage::create(&path).await.unwrap());
        storage.write_chunk(&[0xau8; 1024]).await.unwrap();
        storage.write_chunk(&[0xbu8; 512]).await.unwrap();
        let body = storage.finish().await.unwrap();

        match body {
            Body::File(f) => {
                assert_eq!(f.len(), 1536);
                assert_eq!(std::fs::metadata(f.path()).unwrap().len(), 1536);
            }
            other => panic!("expected file body, got {other:?}"),
        }
    }
}
