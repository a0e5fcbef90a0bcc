//! Scene entity types: nodes, anchors and their parent links

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transform::{Pose, Transform};

/// Opaque identifier the tracking engine assigns to one of its anchors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingId(pub String);

impl TrackingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TrackingId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Where an entity hangs in the scene forest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Parent {
    /// The anonymous scene root
    #[default]
    Root,
    /// An anchor, by name
    Anchor(String),
    /// Another node, by name
    Node(String),
}

impl Parent {
    /// Name of the parent entity, if it is not the root
    pub fn name(&self) -> Option<&str> {
        match self {
            Parent::Root => None,
            Parent::Anchor(name) | Parent::Node(name) => Some(name),
        }
    }
}

/// Kind of a registered entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Anchor,
}

/// A named, transformable entity in the logical scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub parent: Parent,
}

/// A named, fixed reference frame in the AR world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub name: String,
    pub pose: Pose,
    /// Engine-side anchor backing this one, when the engine created one
    pub tracking_id: Option<TrackingId>,
    /// Names of the nodes attached directly to this anchor
    #[serde(default)]
    pub children: Vec<String>,
}

/// Owned snapshot of a registered entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityRef {
    Node(SceneNode),
    Anchor(Anchor),
}

impl EntityRef {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Node(node) => &node.name,
            EntityRef::Anchor(anchor) => &anchor.name,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Node(_) => EntityKind::Node,
            EntityRef::Anchor(_) => EntityKind::Anchor,
        }
    }

    pub fn as_node(&self) -> Option<&SceneNode> {
        match self {
            EntityRef::Node(node) => Some(node),
            EntityRef::Anchor(_) => None,
        }
    }

    pub fn as_anchor(&self) -> Option<&Anchor> {
        match self {
            EntityRef::Anchor(anchor) => Some(anchor),
            EntityRef::Node(_) => None,
        }
    }
}
