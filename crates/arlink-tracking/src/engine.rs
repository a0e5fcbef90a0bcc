//! The tracking engine capability
//!
//! Each native AR engine is wrapped by one adapter implementing
//! [`TrackingEngine`]. Everything above this trait (registry, plane
//! reconciliation, content loading) is written once against it.

use arlink_core::{Matrix4, Parent, PlaneDetection, Pose, RenderTransform, Renderable, TrackingId};
use async_trait::async_trait;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::planes::PlaneChange;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("AR session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("AR session is not running")]
    NotRunning,
    #[error("Anchor rejected by tracking engine: {0}")]
    AnchorRejected(String),
}

/// How the engine delivers camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateMode {
    /// Never block on the camera; always use the newest image
    #[default]
    LatestCameraImage,
    Blocking,
}

/// Camera focus behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    #[default]
    Auto,
    Fixed,
}

/// Session configuration handed to the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub update_mode: UpdateMode,
    pub focus_mode: FocusMode,
    pub plane_detection: PlaneDetection,
}

/// Debug overlays drawn by the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugOverlays {
    pub feature_points: bool,
    pub world_origin: bool,
}

/// Point on the view, in view pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What a hit-test ray intersected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum HitKind {
    /// A detected real-world plane
    Plane,
    /// A tracked feature point
    Point,
    /// A scene node, when the engine exposes the node it hit
    Node(String),
    Other,
}

/// One ray intersection reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitCandidate {
    pub kind: HitKind,
    /// Pose of the intersection, column-major
    pub transform: Matrix4,
    /// Distance from the camera in meters
    pub distance: f64,
}

/// Kind of anchor the engine surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Plane,
    Image,
    Other,
}

/// Geometry of a detected plane, in the anchor's frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneGeometry {
    pub center: DVec3,
    /// Width along local X and length along local Z
    pub extent: [f64; 2],
    /// Boundary polygon, if the engine reports one
    #[serde(default)]
    pub boundary: Vec<DVec3>,
}

impl Default for PlaneGeometry {
    fn default() -> Self {
        Self {
            center: DVec3::ZERO,
            extent: [0.0, 0.0],
            boundary: Vec::new(),
        }
    }
}

impl PlaneGeometry {
    /// Axis-aligned rectangle around the anchor origin
    pub fn rectangle(width: f64, length: f64) -> Self {
        Self {
            center: DVec3::ZERO,
            extent: [width, length],
            boundary: Vec::new(),
        }
    }
}

/// A plane the engine is tracking right now
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSnapshot {
    pub id: TrackingId,
    pub pose: Pose,
    pub geometry: PlaneGeometry,
}

/// Anchor lifecycle and frame callbacks coming out of the engine
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    AnchorDiscovered {
        id: TrackingId,
        pose: Pose,
        kind: AnchorKind,
        geometry: Option<PlaneGeometry>,
    },
    AnchorUpdated {
        id: TrackingId,
        pose: Pose,
        geometry: Option<PlaneGeometry>,
    },
    AnchorRemoved {
        id: TrackingId,
    },
    /// Per-frame tick, timestamp in seconds
    Frame { timestamp: f64 },
}

/// Changes mirrored into the engine's native scene
#[derive(Debug, Clone, PartialEq)]
pub enum SceneChange {
    NodeSpawned {
        name: String,
        parent: Parent,
        transform: RenderTransform,
        renderable: Renderable,
    },
    NodeTransformed {
        name: String,
        transform: RenderTransform,
    },
    NodesRemoved {
        names: Vec<String>,
    },
    Plane(PlaneChange),
    Overlays(DebugOverlays),
}

/// Capability every native engine adapter provides
#[async_trait]
pub trait TrackingEngine: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Start (or reconfigure) the tracking session
    async fn run_session(&self, config: EngineConfig) -> Result<(), EngineError>;

    async fn pause(&self);

    async fn resume(&self) -> Result<(), EngineError>;

    /// Cast a ray from a view point; candidates come back nearest first
    async fn hit_test(&self, point: ScreenPoint) -> Vec<HitCandidate>;

    /// Create an engine anchor at a pose
    async fn create_anchor(&self, pose: Pose) -> Result<TrackingId, EngineError>;

    /// Stop tracking an engine anchor
    async fn detach_anchor(&self, id: &TrackingId);

    /// Subscribe to anchor lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<TrackingEvent>;

    /// Every plane currently tracked, for resynchronizing after a
    /// subscriber missed events
    async fn tracked_planes(&self) -> Vec<PlaneSnapshot>;

    /// Mirror a scene change into the native scene; must not block
    fn apply(&self, change: SceneChange);
}
