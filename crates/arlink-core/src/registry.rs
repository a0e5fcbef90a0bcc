//! Scene registry: the authoritative name -> entity mapping
//!
//! Nodes and anchors share one namespace. Nodes form a forest rooted at the
//! scene root or at an anchor; anchors always hang off the root. Every
//! mutation keeps three invariants:
//! - names are unique across nodes and anchors
//! - every node has exactly one parent
//! - no node is its own ancestor
//!
//! [`SceneRegistry::check_invariants`] verifies all three on demand. After
//! each mutation it also runs through `debug_assert!`, so only debug builds
//! pay for the per-mutation check.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::entity::{Anchor, EntityKind, EntityRef, Parent, SceneNode, TrackingId};
use crate::transform::{Pose, Transform};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Name already registered: {0}")]
    NameCollision(String),
    #[error("No entity named {0}")]
    NotFound(String),
    #[error("{name} is not a {expected:?}")]
    WrongKind { name: String, expected: EntityKind },
    #[error("Attaching {name} under {parent} would create a cycle")]
    Cycle { name: String, parent: String },
    #[error("Registry invariant violated: {0}")]
    InvariantViolation(String),
}

/// Scene registry
#[derive(Debug, Clone, Default)]
pub struct SceneRegistry {
    /// All entities indexed by name
    entities: HashMap<String, EntityRef>,
    /// Children of each named parent, in attach order
    children: HashMap<String, Vec<String>>,
    /// Nodes attached directly to the scene root, in attach order
    root_nodes: Vec<String>,
}

impl SceneRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under an anchor, or under the scene root when no
    /// anchor is given
    pub fn add_node(
        &mut self,
        name: &str,
        transform: Transform,
        anchor: Option<&str>,
    ) -> Result<(), RegistryError> {
        let parent = match anchor {
            Some(anchor) => Parent::Anchor(anchor.to_string()),
            None => Parent::Root,
        };
        self.add_node_under(name, transform, parent)
    }

    /// Register a node under any parent
    pub fn add_node_under(
        &mut self,
        name: &str,
        transform: Transform,
        parent: Parent,
    ) -> Result<(), RegistryError> {
        if self.entities.contains_key(name) {
            return Err(RegistryError::NameCollision(name.to_string()));
        }
        self.validate_parent(&parent)?;

        self.entities.insert(
            name.to_string(),
            EntityRef::Node(SceneNode {
                name: name.to_string(),
                transform,
                parent: parent.clone(),
            }),
        );
        self.link(name, &parent);

        debug!(node = %name, parent = ?parent, "Node registered");
        self.debug_check();
        Ok(())
    }

    /// Move an existing node under a new parent, detaching it from the old one
    pub fn attach(&mut self, name: &str, parent: Parent) -> Result<(), RegistryError> {
        let current = match self.entities.get(name) {
            Some(EntityRef::Node(node)) => node.parent.clone(),
            Some(EntityRef::Anchor(_)) => {
                return Err(RegistryError::WrongKind {
                    name: name.to_string(),
                    expected: EntityKind::Node,
                })
            }
            None => return Err(RegistryError::NotFound(name.to_string())),
        };
        self.validate_parent(&parent)?;

        if let Parent::Node(target) = &parent {
            if target == name || self.is_descendant_of(target, name) {
                return Err(RegistryError::Cycle {
                    name: name.to_string(),
                    parent: target.clone(),
                });
            }
        }

        if current == parent {
            return Ok(());
        }

        self.unlink(name, &current);
        self.link(name, &parent);
        if let Some(EntityRef::Node(node)) = self.entities.get_mut(name) {
            node.parent = parent;
        }

        self.debug_check();
        Ok(())
    }

    /// Remove a node and all of its descendants
    ///
    /// Returns the removed names, descendants first.
    pub fn remove_node(&mut self, name: &str) -> Result<Vec<String>, RegistryError> {
        let parent = match self.entities.get(name) {
            Some(EntityRef::Node(node)) => node.parent.clone(),
            Some(EntityRef::Anchor(_)) => {
                return Err(RegistryError::WrongKind {
                    name: name.to_string(),
                    expected: EntityKind::Node,
                })
            }
            None => return Err(RegistryError::NotFound(name.to_string())),
        };

        self.unlink(name, &parent);
        let removed = self.remove_subtree(name);

        debug!(node = %name, removed = removed.len(), "Node removed");
        self.debug_check();
        Ok(removed)
    }

    /// Replace a node's transform without touching its parentage
    pub fn update_transform(
        &mut self,
        name: &str,
        transform: Transform,
    ) -> Result<(), RegistryError> {
        match self.entities.get_mut(name) {
            Some(EntityRef::Node(node)) => {
                node.transform = transform;
                Ok(())
            }
            Some(EntityRef::Anchor(_)) => Err(RegistryError::WrongKind {
                name: name.to_string(),
                expected: EntityKind::Node,
            }),
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Register an anchor
    pub fn add_anchor(
        &mut self,
        name: &str,
        pose: Pose,
        tracking_id: Option<TrackingId>,
    ) -> Result<(), RegistryError> {
        if self.entities.contains_key(name) {
            return Err(RegistryError::NameCollision(name.to_string()));
        }
        self.entities.insert(
            name.to_string(),
            EntityRef::Anchor(Anchor {
                name: name.to_string(),
                pose,
                tracking_id,
                children: Vec::new(),
            }),
        );
        self.children.insert(name.to_string(), Vec::new());

        debug!(anchor = %name, "Anchor registered");
        self.debug_check();
        Ok(())
    }

    /// Remove an anchor together with every node it owns
    ///
    /// Returns the removed anchor and the removed node names.
    pub fn remove_anchor(&mut self, name: &str) -> Result<(Anchor, Vec<String>), RegistryError> {
        match self.entities.get(name) {
            Some(EntityRef::Anchor(_)) => {}
            Some(EntityRef::Node(_)) => {
                return Err(RegistryError::WrongKind {
                    name: name.to_string(),
                    expected: EntityKind::Anchor,
                })
            }
            None => return Err(RegistryError::NotFound(name.to_string())),
        }

        let owned = self.children.remove(name).unwrap_or_default();
        let mut removed = Vec::new();
        for child in &owned {
            removed.extend(self.remove_subtree(child));
        }

        let anchor = match self.entities.remove(name) {
            Some(EntityRef::Anchor(anchor)) => Anchor {
                children: owned,
                ..anchor
            },
            _ => return Err(RegistryError::NotFound(name.to_string())),
        };

        debug!(anchor = %name, removed = removed.len(), "Anchor removed");
        self.debug_check();
        Ok((anchor, removed))
    }

    /// Resolve a name to an owned snapshot of the entity
    ///
    /// Anchor snapshots list the nodes the anchor currently owns.
    pub fn lookup(&self, name: &str) -> Option<EntityRef> {
        self.entities.get(name).map(|entity| self.snapshot(entity))
    }

    fn snapshot(&self, entity: &EntityRef) -> EntityRef {
        match entity {
            EntityRef::Anchor(anchor) => EntityRef::Anchor(Anchor {
                children: self.children_of(&anchor.name),
                ..anchor.clone()
            }),
            EntityRef::Node(node) => EntityRef::Node(node.clone()),
        }
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Check whether a node with this name is registered
    pub fn contains_node(&self, name: &str) -> bool {
        matches!(self.entities.get(name), Some(EntityRef::Node(_)))
    }

    /// Check whether an anchor with this name is registered
    pub fn contains_anchor(&self, name: &str) -> bool {
        matches!(self.entities.get(name), Some(EntityRef::Anchor(_)))
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Parent of a node; anchors always report the root
    pub fn parent_of(&self, name: &str) -> Option<Parent> {
        match self.entities.get(name)? {
            EntityRef::Node(node) => Some(node.parent.clone()),
            EntityRef::Anchor(_) => Some(Parent::Root),
        }
    }

    /// Direct children of a named entity
    pub fn children_of(&self, name: &str) -> Vec<String> {
        self.children.get(name).cloned().unwrap_or_default()
    }

    /// All descendants of a named entity, depth first
    pub fn descendants_of(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut stack: Vec<String> = self.children_of(name).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            for child in self.children_of(&current).into_iter().rev() {
                stack.push(child);
            }
            result.push(current);
        }
        result
    }

    /// Check whether `name` sits somewhere below `ancestor`
    pub fn is_descendant_of(&self, name: &str, ancestor: &str) -> bool {
        let mut current = self.parent_of(name);
        let mut steps = 0;
        while let Some(parent) = current {
            match parent.name() {
                None => return false,
                Some(p) if p == ancestor => return true,
                Some(p) => {
                    steps += 1;
                    if steps > self.entities.len() {
                        return false;
                    }
                    current = self.parent_of(p);
                }
            }
        }
        false
    }

    /// Verify uniqueness, single-parent and acyclicity
    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        let violation = |msg: String| Err(RegistryError::InvariantViolation(msg));

        for (key, entity) in &self.entities {
            if key != entity.name() {
                return violation(format!("{} indexed under {}", entity.name(), key));
            }
        }

        // Every child slot must point at a node whose parent agrees
        let mut seen: HashSet<&str> = HashSet::new();
        let root = self.root_nodes.iter().map(|c| (Parent::Root, c));
        let named = self.children.iter().flat_map(|(parent, kids)| {
            let link = match self.entities.get(parent) {
                Some(EntityRef::Anchor(_)) => Parent::Anchor(parent.clone()),
                _ => Parent::Node(parent.clone()),
            };
            kids.iter().map(move |c| (link.clone(), c))
        });
        for (link, child) in root.chain(named) {
            match self.entities.get(child) {
                Some(EntityRef::Node(node)) if node.parent == link => {}
                _ => return violation(format!("stale child link {:?} -> {}", link, child)),
            }
            if !seen.insert(child.as_str()) {
                return violation(format!("{} has more than one parent", child));
            }
        }

        for entity in self.entities.values() {
            let EntityRef::Node(node) = entity else {
                continue;
            };
            if !seen.contains(node.name.as_str()) {
                return violation(format!("{} missing from its parent's children", node.name));
            }
            if let Some(parent) = node.parent.name() {
                if !self.entities.contains_key(parent) {
                    return violation(format!("{} has dangling parent {}", node.name, parent));
                }
            }
            if self.is_descendant_of(&node.name, &node.name) {
                return violation(format!("{} is its own ancestor", node.name));
            }
        }

        Ok(())
    }

    /// Serializable snapshot of the whole scene
    pub fn to_graph(&self) -> SceneGraph {
        let mut anchors: Vec<Anchor> = Vec::new();
        let mut nodes: Vec<SceneNode> = Vec::new();
        for entity in self.entities.values() {
            match self.snapshot(entity) {
                EntityRef::Anchor(anchor) => anchors.push(anchor),
                EntityRef::Node(node) => nodes.push(node),
            }
        }
        anchors.sort_by(|a, b| a.name.cmp(&b.name));
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        SceneGraph {
            anchors,
            nodes,
            root: self.root_nodes.clone(),
        }
    }

    fn validate_parent(&self, parent: &Parent) -> Result<(), RegistryError> {
        let (name, expected) = match parent {
            Parent::Root => return Ok(()),
            Parent::Anchor(name) => (name, EntityKind::Anchor),
            Parent::Node(name) => (name, EntityKind::Node),
        };
        match self.entities.get(name) {
            None => Err(RegistryError::NotFound(name.clone())),
            Some(entity) if entity.kind() != expected => Err(RegistryError::WrongKind {
                name: name.clone(),
                expected,
            }),
            Some(_) => Ok(()),
        }
    }

    fn link(&mut self, name: &str, parent: &Parent) {
        match parent.name() {
            None => self.root_nodes.push(name.to_string()),
            Some(p) => self
                .children
                .entry(p.to_string())
                .or_default()
                .push(name.to_string()),
        }
    }

    fn unlink(&mut self, name: &str, parent: &Parent) {
        let siblings = match parent.name() {
            None => Some(&mut self.root_nodes),
            Some(p) => self.children.get_mut(p),
        };
        if let Some(siblings) = siblings {
            siblings.retain(|c| c != name);
        }
    }

    /// Remove a node and its subtree from the entity table and child index.
    /// The caller unlinks the subtree root from its parent.
    fn remove_subtree(&mut self, name: &str) -> Vec<String> {
        let mut removed = self.descendants_of(name);
        removed.reverse();
        removed.push(name.to_string());
        for gone in &removed {
            self.entities.remove(gone);
            self.children.remove(gone);
        }
        removed
    }

    fn debug_check(&self) {
        debug_assert!(
            self.check_invariants().is_ok(),
            "{:?}",
            self.check_invariants()
        );
    }
}

/// Serializable registry snapshot for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneGraph {
    pub anchors: Vec<Anchor>,
    pub nodes: Vec<SceneNode>,
    /// Nodes attached directly to the scene root
    pub root: Vec<String>,
}
