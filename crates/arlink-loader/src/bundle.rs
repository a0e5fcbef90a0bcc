//! Assets bundled with the application, read from a local asset root

use arlink_core::{AssetFormat, ModelSource, Renderable};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::cache::sha256_hex;
use crate::loader::{AssetLoader, FetchError};

/// Loads assets relative to a fixed root directory
#[derive(Debug, Clone)]
pub struct BundleLoader {
    root: PathBuf,
}

impl BundleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an asset URI onto the root, refusing anything that leaves it
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(uri);
        if uri.is_empty() {
            return Err(FetchError::InvalidPath(uri.to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FetchError::InvalidPath(uri.to_string()));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetLoader for BundleLoader {
    async fn fetch(&self, source: &ModelSource) -> Result<Renderable, FetchError> {
        let path = self.resolve(&source.uri)?;
        let content = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(source.uri.clone()),
            _ => FetchError::Io {
                uri: source.uri.clone(),
                source: e,
            },
        })?;

        debug!(uri = %source.uri, bytes = content.len(), "Loaded bundled asset");

        Ok(Renderable {
            source: source.clone(),
            sha256: sha256_hex(&content),
            byte_len: content.len() as u64,
            format: AssetFormat::from_uri(&source.uri),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_from_root() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("models")).unwrap();
        std::fs::write(root.path().join("models/chicken.gltf"), b"{\"asset\":{}}").unwrap();

        let loader = BundleLoader::new(root.path());
        let renderable = loader
            .fetch(&ModelSource::local("models/chicken.gltf"))
            .await
            .unwrap();
        assert_eq!(renderable.format, AssetFormat::Gltf);
        assert_eq!(renderable.byte_len, 12);
        assert_eq!(renderable.sha256, sha256_hex(b"{\"asset\":{}}"));
        assert_eq!(renderable.path, root.path().join("models/chicken.gltf"));
    }

    #[tokio::test]
    async fn test_missing_asset() {
        let root = TempDir::new().unwrap();
        let loader = BundleLoader::new(root.path());
        let err = loader
            .fetch(&ModelSource::local("models/nope.gltf"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(uri) if uri == "models/nope.gltf"));
    }

    #[test]
    fn test_escaping_paths_rejected() {
        let loader = BundleLoader::new("/srv/assets");
        assert!(matches!(
            loader.resolve("../secret.glb"),
            Err(FetchError::InvalidPath(_))
        ));
        assert!(matches!(
            loader.resolve("/etc/passwd"),
            Err(FetchError::InvalidPath(_))
        ));
        assert!(matches!(loader.resolve(""), Err(FetchError::InvalidPath(_))));
        assert_eq!(
            loader.resolve("./models/a.glb").unwrap(),
            PathBuf::from("/srv/assets/models/a.glb")
        );
    }
}
