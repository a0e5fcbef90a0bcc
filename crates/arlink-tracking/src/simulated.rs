//! In-process tracking engine
//!
//! Stands in for a native engine: anchor events and hit-test results are
//! scripted by the caller, and every scene change the session mirrors into
//! the engine is recorded for inspection.

use arlink_core::{Pose, TrackingId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::engine::{
    AnchorKind, EngineConfig, EngineError, HitCandidate, PlaneGeometry, PlaneSnapshot, SceneChange,
    ScreenPoint, TrackingEngine, TrackingEvent,
};

#[derive(Debug, Default)]
struct SimState {
    config: Option<EngineConfig>,
    running: bool,
    refuse_start: Option<String>,
    hits: Vec<HitCandidate>,
    changes: Vec<SceneChange>,
    detached: Vec<TrackingId>,
    planes: HashMap<TrackingId, PlaneSnapshot>,
}

impl SimState {
    /// Keep the plane table in step with the events sent out
    fn track(&mut self, event: &TrackingEvent) {
        match event {
            TrackingEvent::AnchorDiscovered {
                id,
                pose,
                kind: AnchorKind::Plane,
                geometry,
            } => {
                self.planes.insert(
                    id.clone(),
                    PlaneSnapshot {
                        id: id.clone(),
                        pose: *pose,
                        geometry: geometry.clone().unwrap_or_default(),
                    },
                );
            }
            TrackingEvent::AnchorUpdated { id, pose, geometry } => {
                if let Some(plane) = self.planes.get_mut(id) {
                    plane.pose = *pose;
                    if let Some(geometry) = geometry {
                        plane.geometry = geometry.clone();
                    }
                }
            }
            TrackingEvent::AnchorRemoved { id } => {
                self.planes.remove(id);
            }
            _ => {}
        }
    }
}

/// Scriptable engine used by tests and by the daemon without a native adapter
pub struct SimulatedEngine {
    state: Mutex<SimState>,
    events: broadcast::Sender<TrackingEvent>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `run_session` fail
    pub fn refuse_start(&self, reason: impl Into<String>) {
        self.state().refuse_start = Some(reason.into());
    }

    /// Candidates returned by every following hit test
    pub fn script_hits(&self, hits: Vec<HitCandidate>) {
        self.state().hits = hits;
    }

    /// Push a tracking event to subscribers; returns the receiver count
    pub fn emit(&self, event: TrackingEvent) -> usize {
        self.state().track(&event);
        self.events.send(event).unwrap_or(0)
    }

    pub fn discover_plane(&self, id: impl Into<TrackingId>, pose: Pose, geometry: PlaneGeometry) {
        self.emit(TrackingEvent::AnchorDiscovered {
            id: id.into(),
            pose,
            kind: AnchorKind::Plane,
            geometry: Some(geometry),
        });
    }

    pub fn update_plane(&self, id: impl Into<TrackingId>, pose: Pose, geometry: PlaneGeometry) {
        self.emit(TrackingEvent::AnchorUpdated {
            id: id.into(),
            pose,
            geometry: Some(geometry),
        });
    }

    pub fn lose_anchor(&self, id: impl Into<TrackingId>) {
        self.emit(TrackingEvent::AnchorRemoved { id: id.into() });
    }

    /// Snapshot of every change applied so far
    pub fn changes(&self) -> Vec<SceneChange> {
        self.state().changes.clone()
    }

    pub fn take_changes(&self) -> Vec<SceneChange> {
        std::mem::take(&mut self.state().changes)
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn config(&self) -> Option<EngineConfig> {
        self.state().config
    }

    pub fn detached_anchors(&self) -> Vec<TrackingId> {
        self.state().detached.clone()
    }
}

#[async_trait]
impl TrackingEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run_session(&self, config: EngineConfig) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Some(reason) = state.refuse_start.take() {
            return Err(EngineError::SessionUnavailable(reason));
        }
        info!(
            update_mode = ?config.update_mode,
            focus_mode = ?config.focus_mode,
            planes = ?config.plane_detection,
            "Simulated session running"
        );
        state.config = Some(config);
        state.running = true;
        Ok(())
    }

    async fn pause(&self) {
        self.state().running = false;
    }

    async fn resume(&self) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.config.is_none() {
            return Err(EngineError::NotRunning);
        }
        state.running = true;
        Ok(())
    }

    async fn hit_test(&self, point: ScreenPoint) -> Vec<HitCandidate> {
        let state = self.state();
        debug!(x = point.x, y = point.y, hits = state.hits.len(), "Simulated hit test");
        state.hits.clone()
    }

    async fn create_anchor(&self, _pose: Pose) -> Result<TrackingId, EngineError> {
        if self.state().config.is_none() {
            return Err(EngineError::NotRunning);
        }
        Ok(TrackingId::generate())
    }

    async fn detach_anchor(&self, id: &TrackingId) {
        self.state().detached.push(id.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    async fn tracked_planes(&self) -> Vec<PlaneSnapshot> {
        let mut planes: Vec<PlaneSnapshot> = self.state().planes.values().cloned().collect();
        planes.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        planes
    }

    fn apply(&self, change: SceneChange) {
        self.state().changes.push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arlink_core::PlaneDetection;

    #[tokio::test]
    async fn test_refused_start() {
        let engine = SimulatedEngine::new();
        engine.refuse_start("camera permission denied");
        let err = engine.run_session(EngineConfig::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionUnavailable(_)));
        assert!(!engine.is_running());

        // Refusal applies once
        engine.run_session(EngineConfig::default()).await.unwrap();
        assert!(engine.is_running());
    }

    #[tokio::test]
    async fn test_anchor_requires_session() {
        let engine = SimulatedEngine::new();
        assert_eq!(
            engine.create_anchor(Pose::default()).await,
            Err(EngineError::NotRunning)
        );

        engine
            .run_session(EngineConfig {
                plane_detection: PlaneDetection::Horizontal,
                ..Default::default()
            })
            .await
            .unwrap();
        let a = engine.create_anchor(Pose::default()).await.unwrap();
        let b = engine.create_anchor(Pose::default()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.config().unwrap().plane_detection, PlaneDetection::Horizontal);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let engine = SimulatedEngine::new();
        let mut rx = engine.subscribe();
        engine.discover_plane(7u64, Pose::default(), PlaneGeometry::rectangle(1.0, 1.0));
        engine.lose_anchor(7u64);

        assert!(matches!(
            rx.recv().await.unwrap(),
            TrackingEvent::AnchorDiscovered { kind: AnchorKind::Plane, .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            TrackingEvent::AnchorRemoved {
                id: TrackingId::from(7)
            }
        );
    }

    #[tokio::test]
    async fn test_plane_table_follows_events() {
        let engine = SimulatedEngine::new();
        engine.discover_plane(1u64, Pose::default(), PlaneGeometry::rectangle(1.0, 1.0));
        engine.discover_plane(2u64, Pose::default(), PlaneGeometry::rectangle(1.0, 1.0));
        engine.update_plane(2u64, Pose::default(), PlaneGeometry::rectangle(4.0, 4.0));
        engine.lose_anchor(1u64);
        // Updates for unknown planes do not create them
        engine.update_plane(9u64, Pose::default(), PlaneGeometry::default());

        let planes = engine.tracked_planes().await;
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].id, TrackingId::from(2));
        assert_eq!(planes[0].geometry.extent, [4.0, 4.0]);
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let engine = SimulatedEngine::new();
        assert_eq!(engine.resume().await, Err(EngineError::NotRunning));
        engine.run_session(EngineConfig::default()).await.unwrap();
        engine.pause().await;
        assert!(!engine.is_running());
        engine.resume().await.unwrap();
        assert!(engine.is_running());
    }
}
