//! Reconciliation of engine-detected planes into visualization records
//!
//! Planes are keyed by the engine's tracking id and never enter the named
//! scene registry. Every operation returns the list of visual changes the
//! engine has to apply; unknown ids produce an empty list.

use arlink_core::{Pose, Renderable, TrackingId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::engine::{AnchorKind, PlaneGeometry, PlaneSnapshot};

/// How plane visuals are drawn
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlaneAppearance {
    /// The engine's built-in plane material
    #[default]
    Default,
    /// A custom texture tiled over the plane
    Textured(Renderable),
}

/// Visual change for the engine to apply
#[derive(Debug, Clone, PartialEq)]
pub enum PlaneChange {
    /// Attach the visual under the plane's anchor
    Show {
        id: TrackingId,
        pose: Pose,
        geometry: PlaneGeometry,
        appearance: PlaneAppearance,
    },
    /// Regenerate the visual's geometry in place
    Reshape {
        id: TrackingId,
        geometry: PlaneGeometry,
    },
    /// Swap the visual's material
    Restyle {
        id: TrackingId,
        appearance: PlaneAppearance,
    },
    /// Detach the visual but keep it around
    Hide { id: TrackingId },
    /// Plane lost; drop the visual
    Discard { id: TrackingId },
}

/// Visualization record for one detected plane
#[derive(Debug, Clone, Serialize)]
pub struct TrackedPlane {
    pub id: TrackingId,
    pub pose: Pose,
    pub geometry: PlaneGeometry,
    /// Whether the visual is currently attached to the anchor
    pub attached: bool,
    pub last_updated: DateTime<Utc>,
}

/// Custom plane texture state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TextureState {
    #[default]
    Default,
    Loading(String),
    Ready { descriptor: String, texture: Renderable },
}

/// Plane tracking adapter
#[derive(Debug, Default)]
pub struct PlaneTracker {
    planes: HashMap<TrackingId, TrackedPlane>,
    visible: bool,
    texture: TextureState,
}

impl PlaneTracker {
    pub fn new(visible: bool) -> Self {
        Self {
            planes: HashMap::new(),
            visible,
            texture: TextureState::Default,
        }
    }

    /// Engine surfaced a new anchor
    pub fn on_anchor_discovered(
        &mut self,
        id: TrackingId,
        pose: Pose,
        kind: AnchorKind,
        geometry: Option<PlaneGeometry>,
    ) -> Vec<PlaneChange> {
        if kind != AnchorKind::Plane {
            debug!(id = %id, kind = ?kind, "Ignoring non-plane anchor");
            return Vec::new();
        }
        if self.planes.contains_key(&id) {
            debug!(id = %id, "Plane discovered twice, treating as update");
            return self.on_anchor_updated(&id, pose, geometry);
        }

        let geometry = geometry.unwrap_or_default();
        let plane = TrackedPlane {
            id: id.clone(),
            pose,
            geometry: geometry.clone(),
            attached: self.visible,
            last_updated: Utc::now(),
        };
        self.planes.insert(id.clone(), plane);
        debug!(id = %id, visible = self.visible, "Tracking plane");

        if self.visible {
            vec![PlaneChange::Show {
                id,
                pose,
                geometry,
                appearance: self.appearance(),
            }]
        } else {
            Vec::new()
        }
    }

    /// Engine refined an anchor's pose or geometry
    pub fn on_anchor_updated(
        &mut self,
        id: &TrackingId,
        pose: Pose,
        geometry: Option<PlaneGeometry>,
    ) -> Vec<PlaneChange> {
        let Some(plane) = self.planes.get_mut(id) else {
            debug!(id = %id, "Update for untracked plane ignored");
            return Vec::new();
        };

        plane.pose = pose;
        plane.last_updated = Utc::now();
        match geometry {
            Some(geometry) => {
                plane.geometry = geometry.clone();
                vec![PlaneChange::Reshape {
                    id: id.clone(),
                    geometry,
                }]
            }
            None => Vec::new(),
        }
    }

    /// Engine stopped tracking an anchor
    pub fn on_anchor_removed(&mut self, id: &TrackingId) -> Vec<PlaneChange> {
        match self.planes.remove(id) {
            Some(_) => {
                debug!(id = %id, "Plane lost");
                vec![PlaneChange::Discard { id: id.clone() }]
            }
            None => {
                debug!(id = %id, "Removal for untracked plane ignored");
                Vec::new()
            }
        }
    }

    /// Reconcile against the engine's full plane list
    ///
    /// Planes the engine no longer reports are discarded, the rest are
    /// added or refreshed as if freshly discovered.
    pub fn resync(&mut self, current: Vec<PlaneSnapshot>) -> Vec<PlaneChange> {
        let live: HashSet<&TrackingId> = current.iter().map(|plane| &plane.id).collect();
        let mut lost: Vec<TrackingId> = self
            .planes
            .keys()
            .filter(|id| !live.contains(id))
            .cloned()
            .collect();
        lost.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let mut changes = Vec::new();
        for id in &lost {
            changes.extend(self.on_anchor_removed(id));
        }
        for plane in current {
            changes.extend(self.on_anchor_discovered(
                plane.id,
                plane.pose,
                AnchorKind::Plane,
                Some(plane.geometry),
            ));
        }
        info!(lost = lost.len(), tracked = self.planes.len(), "Planes resynchronized");
        changes
    }

    /// Attach or detach every plane's visual
    pub fn set_visible(&mut self, visible: bool) -> Vec<PlaneChange> {
        if self.visible == visible {
            return Vec::new();
        }
        self.visible = visible;
        info!(visible = visible, planes = self.planes.len(), "Plane visibility changed");

        let appearance = self.appearance();
        let mut changes: Vec<PlaneChange> = self
            .planes
            .values_mut()
            .filter(|plane| plane.attached != visible)
            .map(|plane| {
                plane.attached = visible;
                if visible {
                    PlaneChange::Show {
                        id: plane.id.clone(),
                        pose: plane.pose,
                        geometry: plane.geometry.clone(),
                        appearance: appearance.clone(),
                    }
                } else {
                    PlaneChange::Hide {
                        id: plane.id.clone(),
                    }
                }
            })
            .collect();
        changes.sort_by(|a, b| change_id(a).cmp(change_id(b)));
        changes
    }

    /// Ask for a custom texture
    ///
    /// Returns true when the caller has to start loading `descriptor`.
    pub fn request_texture(&mut self, descriptor: &str) -> bool {
        match &self.texture {
            TextureState::Loading(current) if current == descriptor => false,
            TextureState::Ready { descriptor: current, .. } if current == descriptor => false,
            _ => {
                self.texture = TextureState::Loading(descriptor.to_string());
                true
            }
        }
    }

    /// Go back to the default plane material
    pub fn clear_texture(&mut self) -> Vec<PlaneChange> {
        let was_textured = matches!(self.texture, TextureState::Ready { .. });
        self.texture = TextureState::Default;
        if was_textured {
            self.restyle_all()
        } else {
            Vec::new()
        }
    }

    /// A texture load finished; stale results are dropped
    pub fn texture_ready(&mut self, descriptor: &str, texture: Renderable) -> Vec<PlaneChange> {
        if !self.is_loading(descriptor) {
            debug!(texture = %descriptor, "Stale plane texture ignored");
            return Vec::new();
        }
        self.texture = TextureState::Ready {
            descriptor: descriptor.to_string(),
            texture,
        };
        info!(texture = %descriptor, planes = self.planes.len(), "Plane texture ready");
        self.restyle_all()
    }

    /// A texture load failed; planes keep the default look
    pub fn texture_failed(&mut self, descriptor: &str) {
        if self.is_loading(descriptor) {
            self.texture = TextureState::Default;
        }
    }

    /// Appearance new visuals are created with
    pub fn appearance(&self) -> PlaneAppearance {
        match &self.texture {
            TextureState::Ready { texture, .. } => PlaneAppearance::Textured(texture.clone()),
            _ => PlaneAppearance::Default,
        }
    }

    pub fn texture_state(&self) -> &TextureState {
        &self.texture
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn plane(&self, id: &TrackingId) -> Option<&TrackedPlane> {
        self.planes.get(id)
    }

    pub fn planes(&self) -> impl Iterator<Item = &TrackedPlane> {
        self.planes.values()
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    fn is_loading(&self, descriptor: &str) -> bool {
        matches!(&self.texture, TextureState::Loading(current) if current == descriptor)
    }

    fn restyle_all(&self) -> Vec<PlaneChange> {
        let appearance = self.appearance();
        let mut ids: Vec<&TrackingId> = self.planes.keys().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.into_iter()
            .map(|id| PlaneChange::Restyle {
                id: id.clone(),
                appearance: appearance.clone(),
            })
            .collect()
    }
}

fn change_id(change: &PlaneChange) -> &str {
    match change {
        PlaneChange::Show { id, .. }
        | PlaneChange::Reshape { id, .. }
        | PlaneChange::Restyle { id, .. }
        | PlaneChange::Hide { id }
        | PlaneChange::Discard { id } => id.as_str(),
    }
}
