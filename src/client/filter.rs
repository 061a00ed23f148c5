//! Response filters: the client-side mirror of request filters.

use crate::error::Result;
use crate::http::{BodyStorage, FileStorage, ResponseHead, StringStorage};
use async_trait::async_trait;
use std::path::PathBuf;

/// Chooses the body storage for an incoming response after its header
/// has been read.
#[async_trait]
pub trait ResponseFilter: Send + Sync {
    async fn storage_for(&self, head: &ResponseHead) -> Result<Box<dyn BodyStorage>>;
}

/// The default: buffer the response body in memory as a string.
#[derive(Debug)]
pub struct TextResponseFilter;

#[async_trait]
impl ResponseFilter for TextResponseFilter {
    async fn storage_for(&self, _head: &ResponseHead) -> Result<Box<dyn BodyStorage>> {
        Ok(Box::new(StringStorage::new()))
    }
}

/// Stream the response body straight to a file, e.g. for downloads too
/// large to buffer.
#[derive(Debug)]
pub struct DownloadFilter {
    path: PathBuf,
}

impl DownloadFilter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResponseFilter for DownloadFilter {
    async fn storage_for(&self, _head: &ResponseHead) -> Result<Box<dyn BodyStorage>> {
        Ok(Box::new(FileStorage::create(self.path.clone()).await?))
    }
}
