//! Request filters: choosing body storage after the header, before the
//! body bytes flow.

use crate::error::{Error, Result};
use crate::http::{BodyStorage, FileStorage, RequestHead, StringStorage};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Decides where an endpoint materializes the request body.
///
/// The router consults the endpoint's filter once the header is parsed
/// and hands the returned storage to the request generator, which streams
/// the body bytes into it.
#[async_trait]
pub trait RequestFilter: Send + Sync + 'static {
    async fn storage_for(&self, head: &RequestHead) -> Result<Box<dyn BodyStorage>>;
}

/// The default filter: buffer the body in memory as a string.
#[derive(Debug)]
pub struct TextFilter;

#[async_trait]
impl RequestFilter for TextFilter {
    async fn storage_for(&self, _head: &RequestHead) -> Result<Box<dyn BodyStorage>> {
        Ok(Box::new(StringStorage::new()))
    }
}

/// A filter that streams the request body into a file under `root`,
/// named by a caller-supplied mapping from the request head.
///
/// Uploads of arbitrary size pass straight to disk without being
/// buffered in memory.
pub struct FileFilter {
    root: PathBuf,
    naming: Box<dyn Fn(&RequestHead) -> PathBuf + Send + Sync>,
}

impl std::fmt::Debug for FileFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFilter")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileFilter {
    pub fn new(
        root: impl Into<PathBuf>,
        naming: impl Fn(&RequestHead) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: root.into(),
            naming: Box::new(naming),
        }
    }

    /// Name the target file after the request path with `prefix` removed,
    /// e.g. `POST /upload/a/b.bin` with prefix `/upload` lands in
    /// `{root}/a/b.bin`.
    pub fn strip_prefix(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(root, move |head: &RequestHead| {
            let resource = head.target.resource_string();
            let tail = resource.strip_prefix(prefix.as_str()).unwrap_or(resource);
            PathBuf::from(tail.trim_start_matches('/'))
        })
    }
}

#[async_trait]
impl RequestFilter for FileFilter {
    async fn storage_for(&self, head: &RequestHead) -> Result<Box<dyn BodyStorage>> {
        let rel = (self.naming)(head);
        if !is_safe_relative(&rel) {
            return Err(Error::Filter(format!(
                "refusing upload path `{}`",
                rel.display()
            )));
        }
        let storage = FileStorage::create(self.root.join(rel)).await?;
        Ok(Box::new(storage))
    }
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Shared handle to a filter, as stored on endpoints.
pub(crate) type SharedFilter = Arc<dyn RequestFilter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn file_filter_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FileFilter::strip_prefix(dir.path(), "/upload");

        let head = RequestHead::new(Method::POST, "/upload/../../etc/passwd");
        assert!(filter.storage_for(&head).await.is_err());

        let head = RequestHead::new(Method::POST, "/upload/ok.bin");
        assert!(filter.storage_for(&head).await.is_ok());
    }
}
