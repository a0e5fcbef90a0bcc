//! arlink Core - Transform codec, scene registry, and wire types
//!
//! This crate provides the engine-independent pieces of arlink:
//! - Decomposition of column-major 4x4 transforms with per-engine
//!   coordinate correction
//! - The scene registry holding named nodes and anchors as a forest
//! - Request/event payloads exchanged with the application layer

pub mod asset;
pub mod entity;
pub mod protocol;
pub mod registry;
pub mod transform;

pub use asset::{AssetFormat, Renderable};
pub use entity::{Anchor, EntityKind, EntityRef, Parent, SceneNode, TrackingId};
pub use protocol::{
    ArEvent, HitResultPayload, HitTarget, ModelSource, NodeDescriptor, PlaneDetection,
    SessionConfig, SourceKind,
};
pub use registry::{RegistryError, SceneGraph, SceneRegistry};
pub use transform::{
    compose, compose_with, decompose, decompose_with, identity_with_translation, Axis,
    CoordinateCorrection, Matrix4, Pose, RenderTransform, Transform, TransformError, IDENTITY,
};
