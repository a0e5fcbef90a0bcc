//! Downloaded model caching with SHA-based deduplication
//!
//! Remote models are stored by the SHA256 of their content, so a model
//! whose download later fails can still be served from disk and two URLs
//! pointing at the same bytes share one file. Blobs live under
//! `blobs/{short_sha}-{name}` next to an `index.json` describing them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const INDEX_FILE: &str = "index.json";
const BLOB_DIR: &str = "blobs";
const INDEX_FORMAT: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache index is corrupt: {0}")]
    Index(#[from] serde_json::Error),
    #[error("no cached copy of {0}")]
    NotCached(String),
}

/// One downloaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedModel {
    pub url: String,
    /// Full hex SHA256 of the content
    pub sha: String,
    /// Blob path relative to the cache directory
    pub path: String,
    pub byte_len: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Persistent record of what the cache holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default = "current_format")]
    pub format: u32,
    /// Latest download per URL
    #[serde(default)]
    pub urls: HashMap<String, CachedModel>,
    /// SHA -> blob path
    #[serde(default)]
    pub blobs: HashMap<String, String>,
}

fn current_format() -> u32 {
    INDEX_FORMAT
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            format: INDEX_FORMAT,
            urls: HashMap::new(),
            blobs: HashMap::new(),
        }
    }
}

impl CacheIndex {
    /// Read the index at `path`; a missing file is an empty index
    pub fn read(path: &Path) -> Result<Self, CacheError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file so a crash never leaves half an index
    pub fn write(&self, path: &Path) -> Result<(), CacheError> {
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Record a download, repointing its SHA at the entry's blob
    pub fn record(&mut self, entry: CachedModel) {
        self.blobs.insert(entry.sha.clone(), entry.path.clone());
        self.urls.insert(entry.url.clone(), entry);
    }
}

/// On-disk model cache
#[derive(Debug)]
pub struct ModelCache {
    dir: PathBuf,
    index: CacheIndex,
}

impl ModelCache {
    /// Open (or create) a cache rooted at `dir`
    pub fn new(dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(dir.join(BLOB_DIR))?;
        let index = CacheIndex::read(&dir.join(INDEX_FILE))?;
        if index.format != INDEX_FORMAT {
            warn!(found = index.format, expected = INDEX_FORMAT, "Unknown cache index format");
        }
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.dir.join(BLOB_DIR)
    }

    pub fn short_sha(sha: &str) -> &str {
        &sha[..8.min(sha.len())]
    }

    /// Store downloaded content and record it in the index
    pub fn store(&mut self, url: &str, content: &[u8]) -> Result<CachedModel, CacheError> {
        let sha = sha256_hex(content);

        let path = match self.blob_path(&sha) {
            Some(existing) => existing.to_string(),
            None => {
                let name = format!("{}-{}", Self::short_sha(&sha), file_name(url));
                fs::write(self.blob_dir().join(&name), content)?;
                format!("{}/{}", BLOB_DIR, name)
            }
        };

        let entry = CachedModel {
            url: url.to_string(),
            sha,
            path,
            byte_len: content.len() as u64,
            fetched_at: Utc::now(),
        };
        self.index.record(entry.clone());
        self.index.write(&self.dir.join(INDEX_FILE))?;
        Ok(entry)
    }

    /// Cached entry for a URL whose blob is still on disk
    pub fn lookup_url(&self, url: &str) -> Result<&CachedModel, CacheError> {
        self.index
            .urls
            .get(url)
            .filter(|entry| self.dir.join(&entry.path).is_file())
            .ok_or_else(|| CacheError::NotCached(url.to_string()))
    }

    pub fn has_model(&self, sha: &str) -> bool {
        self.blob_path(sha).is_some()
    }

    fn blob_path(&self, sha: &str) -> Option<&str> {
        self.index
            .blobs
            .get(sha)
            .map(String::as_str)
            .filter(|path| self.dir.join(path).is_file())
    }

    /// Absolute path of a cached entry
    pub fn path_of(&self, entry: &CachedModel) -> PathBuf {
        self.dir.join(&entry.path)
    }

    pub fn len(&self) -> usize {
        self.index.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.urls.is_empty()
    }
}

/// Last path segment of a URL, without query or fragment
fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "model.glb",
    }
}

/// Lowercase hex SHA256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
