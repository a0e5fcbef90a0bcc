//! The asset loading capability and its source-kind dispatcher

use arlink_core::{ModelSource, Renderable, SourceKind};
use async_trait::async_trait;
use thiserror::Error;

use crate::bundle::BundleLoader;
use crate::cache::CacheError;
use crate::http::HttpLoader;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Asset not found: {0}")]
    NotFound(String),
    #[error("IO error reading {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error fetching {uri}: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{uri} returned status {status}")]
    Status { uri: String, status: u16 },
    #[error("Invalid asset path: {0}")]
    InvalidPath(String),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Produces a renderable from a model source, or fails
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn fetch(&self, source: &ModelSource) -> Result<Renderable, FetchError>;
}

/// Routes bundled assets and remote URLs to their loaders
pub struct ModelFetcher {
    bundle: BundleLoader,
    http: HttpLoader,
}

impl ModelFetcher {
    pub fn new(bundle: BundleLoader, http: HttpLoader) -> Self {
        Self { bundle, http }
    }
}

#[async_trait]
impl AssetLoader for ModelFetcher {
    async fn fetch(&self, source: &ModelSource) -> Result<Renderable, FetchError> {
        match source.kind {
            SourceKind::LocalAsset => self.bundle.fetch(source).await,
            SourceKind::RemoteUrl => self.http.fetch(source).await,
        }
    }
}
