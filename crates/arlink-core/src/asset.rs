//! Loaded asset handles passed from the asset loader to the engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::protocol::ModelSource;

/// File format of a loaded asset, judged from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Gltf,
    Glb,
    Texture,
    Unknown,
}

impl AssetFormat {
    pub fn from_uri(uri: &str) -> Self {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gltf" => AssetFormat::Gltf,
            "glb" => AssetFormat::Glb,
            "png" | "jpg" | "jpeg" | "ktx2" | "webp" => AssetFormat::Texture,
            _ => AssetFormat::Unknown,
        }
    }
}

/// A fetched asset, ready to hand to the rendering engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renderable {
    /// What was requested
    pub source: ModelSource,
    /// SHA256 of the content (hex)
    pub sha256: String,
    /// Content size in bytes
    pub byte_len: u64,
    pub format: AssetFormat,
    /// Local file holding the content
    pub path: PathBuf,
}
