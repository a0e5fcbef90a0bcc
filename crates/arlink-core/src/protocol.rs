//! Request and event payloads exchanged with the application layer
//!
//! Field names and numeric enums follow the wire format the application
//! side already speaks (camelCase keys, integer `type` tags).

use serde::{Deserialize, Serialize};

use crate::transform::{Matrix4, IDENTITY};

/// Where a node's model comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SourceKind {
    /// glTF asset bundled with the application
    LocalAsset,
    /// GLB file fetched over HTTP(S)
    RemoteUrl,
}

impl TryFrom<u8> for SourceKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SourceKind::LocalAsset),
            1 => Ok(SourceKind::RemoteUrl),
            other => Err(format!("unknown node type {}", other)),
        }
    }
}

impl From<SourceKind> for u8 {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::LocalAsset => 0,
            SourceKind::RemoteUrl => 1,
        }
    }
}

/// Model source: kind plus URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSource {
    pub kind: SourceKind,
    pub uri: String,
}

impl ModelSource {
    pub fn local(uri: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::LocalAsset,
            uri: uri.into(),
        }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::RemoteUrl,
            uri: uri.into(),
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Node placement request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub uri: String,
    pub name: String,
    #[serde(default = "identity")]
    pub transform: Matrix4,
}

fn identity() -> Matrix4 {
    IDENTITY
}

impl NodeDescriptor {
    pub fn source(&self) -> ModelSource {
        ModelSource {
            kind: self.kind,
            uri: self.uri.clone(),
        }
    }
}

/// Which real-world planes the tracking engine should look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlaneDetection {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl TryFrom<u8> for PlaneDetection {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PlaneDetection::None),
            1 => Ok(PlaneDetection::Horizontal),
            2 => Ok(PlaneDetection::Vertical),
            3 => Ok(PlaneDetection::Both),
            other => Err(format!("unknown plane detection mode {}", other)),
        }
    }
}

impl From<PlaneDetection> for u8 {
    fn from(mode: PlaneDetection) -> Self {
        match mode {
            PlaneDetection::None => 0,
            PlaneDetection::Horizontal => 1,
            PlaneDetection::Vertical => 2,
            PlaneDetection::Both => 3,
        }
    }
}

/// Session options set by `initSession`; every field is optional on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub show_feature_points: bool,
    #[serde(rename = "planeDetectionConfig")]
    pub plane_detection: PlaneDetection,
    pub show_planes: bool,
    pub custom_plane_texture_path: Option<String>,
    pub show_world_origin: bool,
    pub handle_taps: bool,
}

/// Environment target of a reported tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HitTarget {
    Plane,
    Point,
}

impl TryFrom<u8> for HitTarget {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HitTarget::Plane),
            2 => Ok(HitTarget::Point),
            other => Err(format!("unknown hit result type {}", other)),
        }
    }
}

impl From<HitTarget> for u8 {
    fn from(target: HitTarget) -> Self {
        match target {
            HitTarget::Plane => 1,
            HitTarget::Point => 2,
        }
    }
}

/// One serialized environment hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitResultPayload {
    #[serde(rename = "type")]
    pub target: HitTarget,
    pub transform: Matrix4,
    pub distance: f64,
}

/// Events pushed to the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum ArEvent {
    #[serde(rename = "onError")]
    Error { message: String },
    #[serde(rename = "onNodeTap")]
    NodeTap { name: String },
    #[serde(rename = "onPlaneOrPointTap")]
    PlaneOrPointTap { hits: Vec<HitResultPayload> },
}

impl ArEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ArEvent::Error {
            message: message.into(),
        }
    }
}
