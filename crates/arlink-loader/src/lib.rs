//! arlink Loader - Fetching models and textures for the scene
//!
//! This crate provides:
//! - The [`AssetLoader`] capability the session loads content through
//! - Bundled asset loading from a local asset root
//! - Remote model downloads with a SHA-keyed on-disk cache

pub mod bundle;
pub mod cache;
pub mod http;
pub mod loader;

pub use bundle::BundleLoader;
pub use cache::{sha256_hex, CacheError, CacheIndex, CachedModel, ModelCache};
pub use http::{HttpLoader, DEFAULT_TIMEOUT};
pub use loader::{AssetLoader, FetchError, ModelFetcher};
