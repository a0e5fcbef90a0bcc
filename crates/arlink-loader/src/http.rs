//! Remote model fetching with cache fallback
//!
//! Every successful download is written to the [`ModelCache`]; when the
//! network is unreachable or the server answers with an error status, the
//! last cached copy of the same URL is served instead.

use arlink_core::{AssetFormat, ModelSource, Renderable};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{CachedModel, ModelCache};
use crate::loader::{AssetLoader, FetchError};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP(S) model loader
pub struct HttpLoader {
    client: reqwest::Client,
    cache: Arc<RwLock<ModelCache>>,
}

impl HttpLoader {
    pub fn new(cache: ModelCache, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http {
                uri: String::new(),
                source: e,
            })?;

        Ok(Self {
            client,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    /// Number of cached downloads
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn cached(&self, source: &ModelSource) -> Option<Renderable> {
        let cache = self.cache.read().await;
        let entry = cache.lookup_url(&source.uri).ok()?;
        Some(renderable(source, entry, cache.path_of(entry)))
    }

    async fn fallback(&self, source: &ModelSource, error: FetchError) -> Result<Renderable, FetchError> {
        match self.cached(source).await {
            Some(renderable) => {
                info!(url = %source.uri, "Serving cached model (offline fallback)");
                Ok(renderable)
            }
            None => Err(error),
        }
    }
}

#[async_trait]
impl AssetLoader for HttpLoader {
    async fn fetch(&self, source: &ModelSource) -> Result<Renderable, FetchError> {
        let url = reqwest::Url::parse(&source.uri)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| FetchError::InvalidPath(source.uri.clone()))?;

        info!(url = %url, "Fetching remote model");

        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %source.uri, error = %e, "Failed to fetch model, trying cache fallback");
                let error = FetchError::Http {
                    uri: source.uri.clone(),
                    source: e,
                };
                return self.fallback(source, error).await;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(url = %source.uri, status = %status, "Model fetch returned non-success status");
            let error = FetchError::Status {
                uri: source.uri.clone(),
                status: status.as_u16(),
            };
            return self.fallback(source, error).await;
        }

        let content = response.bytes().await.map_err(|e| FetchError::Http {
            uri: source.uri.clone(),
            source: e,
        })?;

        let mut cache = self.cache.write().await;
        let entry = cache.store(&source.uri, &content)?;
        info!(
            url = %source.uri,
            sha = %ModelCache::short_sha(&entry.sha),
            bytes = entry.byte_len,
            "Cached remote model"
        );
        let path = cache.path_of(&entry);
        Ok(renderable(source, &entry, path))
    }
}

fn renderable(source: &ModelSource, entry: &CachedModel, path: PathBuf) -> Renderable {
    Renderable {
        source: source.clone(),
        sha256: entry.sha.clone(),
        byte_len: entry.byte_len,
        format: AssetFormat::from_uri(&source.uri),
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Nothing listens on port 1, so connections are refused immediately
    const UNREACHABLE: &str = "http://127.0.0.1:1/models/Fox.glb";

    #[tokio::test]
    async fn test_offline_fallback_serves_cache() {
        let dir = TempDir::new().unwrap();
        let mut cache = ModelCache::new(dir.path().to_path_buf()).unwrap();
        cache.store(UNREACHABLE, b"cached fox").unwrap();

        let loader = HttpLoader::new(cache, Duration::from_secs(2)).unwrap();
        let renderable = loader.fetch(&ModelSource::remote(UNREACHABLE)).await.unwrap();
        assert_eq!(renderable.format, AssetFormat::Glb);
        assert_eq!(std::fs::read(&renderable.path).unwrap(), b"cached fox");
    }

    #[tokio::test]
    async fn test_offline_without_cache_fails() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::new(dir.path().to_path_buf()).unwrap();
        let loader = HttpLoader::new(cache, Duration::from_secs(2)).unwrap();

        let err = loader
            .fetch(&ModelSource::remote(UNREACHABLE))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { .. }));
        assert_eq!(loader.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::new(dir.path().to_path_buf()).unwrap();
        let loader = HttpLoader::new(cache, DEFAULT_TIMEOUT).unwrap();

        let err = loader
            .fetch(&ModelSource::remote("file:///etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidPath(_)));
    }
}
