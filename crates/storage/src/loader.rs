//! Per-document loaders
//!
//! A loader runs on every record a collection returns from a read. It is a
//! total function from any previously valid record shape to either the
//! current shape or `None` (record dropped from the result). Loaders are
//! never run on writes.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use docket_core::{Document, Result, Version};

/// Normalizes stored records to the current schema
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Normalize one record; `None` drops it
    async fn load(&self, document: Document) -> Result<Option<Document>>;
}

/// Passes every record through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLoader;

#[async_trait]
impl DocumentLoader for IdentityLoader {
    async fn load(&self, document: Document) -> Result<Option<Document>> {
        Ok(Some(document))
    }
}

/// Keeps records written at exactly one version, drops everything else
#[derive(Debug, Clone, Copy)]
pub struct ExactVersionLoader {
    version: Version,
}

impl ExactVersionLoader {
    /// Loader accepting only `version`
    pub fn new(version: Version) -> Self {
        Self { version }
    }
}

#[async_trait]
impl DocumentLoader for ExactVersionLoader {
    async fn load(&self, document: Document) -> Result<Option<Document>> {
        if document.version_str() == Some(self.version.to_string().as_str()) {
            Ok(Some(document))
        } else {
            Ok(None)
        }
    }
}

type LoadFn = dyn Fn(Document) -> BoxFuture<'static, Result<Option<Document>>> + Send + Sync;

/// Loader backed by an async closure
pub struct FnLoader {
    f: Box<LoadFn>,
}

#[async_trait]
impl DocumentLoader for FnLoader {
    async fn load(&self, document: Document) -> Result<Option<Document>> {
        (self.f)(document).await
    }
}

/// Build a loader from an async closure
///
/// ```ignore
/// let loader = loader_fn(|doc| async move { Ok(Some(doc)) });
/// ```
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn DocumentLoader>
where
    F: Fn(Document) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<Document>>> + Send + 'static,
{
    use futures::FutureExt;
    Arc::new(FnLoader {
        f: Box::new(move |doc| f(doc).boxed()),
    })
}
