//! Tap classification
//!
//! Turns the hit-test candidates for a touch into exactly one outward
//! event: a node tap when the nearest candidate is a registered node,
//! otherwise an environment tap listing plane and point hits.

use arlink_core::{ArEvent, HitResultPayload, HitTarget};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{HitCandidate, HitKind};

/// Touch gesture phase as reported by the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchPhase {
    Down,
    Move,
    Up,
    Cancel,
}

/// Gate plus classifier for tap input
#[derive(Debug, Default)]
pub struct InteractionDispatcher {
    enabled: bool,
    gesture_active: bool,
}

impl InteractionDispatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            gesture_active: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.gesture_active = false;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Feed a touch phase; true only for the first `Down` of a gesture
    pub fn begins_gesture(&mut self, phase: TouchPhase) -> bool {
        match phase {
            TouchPhase::Down => {
                if !self.enabled || self.gesture_active {
                    return false;
                }
                self.gesture_active = true;
                true
            }
            TouchPhase::Move => false,
            TouchPhase::Up | TouchPhase::Cancel => {
                self.gesture_active = false;
                false
            }
        }
    }

    /// Classify the candidates of a dispatched touch
    pub fn dispatch<F>(&self, candidates: &[HitCandidate], is_registered: F) -> ArEvent
    where
        F: Fn(&str) -> bool,
    {
        classify(candidates, is_registered)
    }
}

/// Pure tap classification over nearest-first candidates
pub fn classify<F>(candidates: &[HitCandidate], is_registered: F) -> ArEvent
where
    F: Fn(&str) -> bool,
{
    if let Some(HitCandidate {
        kind: HitKind::Node(name),
        ..
    }) = candidates.first()
    {
        if is_registered(name) {
            return ArEvent::NodeTap { name: name.clone() };
        }
        debug!(node = %name, "Hit on unregistered node treated as environment");
    }

    let hits = candidates
        .iter()
        .filter_map(|candidate| {
            let target = match candidate.kind {
                HitKind::Plane => HitTarget::Plane,
                HitKind::Point => HitTarget::Point,
                HitKind::Node(_) | HitKind::Other => return None,
            };
            Some(HitResultPayload {
                target,
                transform: candidate.transform,
                distance: candidate.distance,
            })
        })
        .collect();

    ArEvent::PlaneOrPointTap { hits }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arlink_core::{identity_with_translation, IDENTITY};

    fn hit(kind: HitKind, distance: f64) -> HitCandidate {
        HitCandidate {
            kind,
            transform: identity_with_translation(0.0, 0.0, -distance),
            distance,
        }
    }

    #[test]
    fn test_node_hit_short_circuits() {
        let candidates = vec![hit(HitKind::Node("foo".into()), 0.5), hit(HitKind::Plane, 1.0)];
        let event = classify(&candidates, |name| name == "foo");
        assert_eq!(event, ArEvent::NodeTap { name: "foo".into() });
    }

    #[test]
    fn test_environment_hits_filtered_in_order() {
        let candidates = vec![
            hit(HitKind::Plane, 1.0),
            hit(HitKind::Other, 1.5),
            hit(HitKind::Point, 2.0),
        ];
        let event = classify(&candidates, |_| false);
        let ArEvent::PlaneOrPointTap { hits } = event else {
            panic!("expected environment tap");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].target, HitTarget::Plane);
        assert_eq!(hits[0].distance, 1.0);
        assert_eq!(hits[1].target, HitTarget::Point);
    }

    #[test]
    fn test_plane_then_other_keeps_only_plane() {
        let candidates = vec![hit(HitKind::Plane, 1.0), hit(HitKind::Other, 2.0)];
        let event = classify(&candidates, |_| false);
        assert_eq!(
            event,
            ArEvent::PlaneOrPointTap {
                hits: vec![HitResultPayload {
                    target: HitTarget::Plane,
                    transform: identity_with_translation(0.0, 0.0, -1.0),
                    distance: 1.0,
                }]
            }
        );
    }

    #[test]
    fn test_unregistered_node_is_dropped() {
        let candidates = vec![hit(HitKind::Node("ghost".into()), 0.3), hit(HitKind::Point, 0.8)];
        let event = classify(&candidates, |_| false);
        let ArEvent::PlaneOrPointTap { hits } = event else {
            panic!("expected environment tap");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, HitTarget::Point);
    }

    #[test]
    fn test_no_candidates_gives_empty_list() {
        assert_eq!(
            classify(&[], |_| true),
            ArEvent::PlaneOrPointTap { hits: vec![] }
        );
        // Node behind a plane does not count
        let candidates = vec![
            HitCandidate {
                kind: HitKind::Plane,
                transform: IDENTITY,
                distance: 0.2,
            },
            hit(HitKind::Node("foo".into()), 0.5),
        ];
        assert!(matches!(
            classify(&candidates, |_| true),
            ArEvent::PlaneOrPointTap { .. }
        ));
    }

    #[test]
    fn test_only_first_down_dispatches() {
        let mut dispatcher = InteractionDispatcher::new(true);
        assert!(dispatcher.begins_gesture(TouchPhase::Down));
        assert!(!dispatcher.begins_gesture(TouchPhase::Move));
        assert!(!dispatcher.begins_gesture(TouchPhase::Down));
        assert!(!dispatcher.begins_gesture(TouchPhase::Up));
        assert!(dispatcher.begins_gesture(TouchPhase::Down));
        assert!(!dispatcher.begins_gesture(TouchPhase::Cancel));
    }

    #[test]
    fn test_disabled_dispatcher_ignores_taps() {
        let mut dispatcher = InteractionDispatcher::default();
        assert!(!dispatcher.begins_gesture(TouchPhase::Down));
        dispatcher.set_enabled(true);
        assert!(dispatcher.begins_gesture(TouchPhase::Down));
    }
}
