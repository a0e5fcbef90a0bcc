//! Session handle
//!
//! [`ArSession`] is a cheap, cloneable front for the scene worker. Every
//! call becomes a [`SceneCommand`] with a oneshot reply; events pushed to
//! the application are fanned out over a broadcast channel.

use arlink_core::{
    ArEvent, CoordinateCorrection, EntityRef, Matrix4, NodeDescriptor, SceneGraph, SessionConfig,
};
use arlink_loader::AssetLoader;
use arlink_tracking::{ScreenPoint, TouchPhase, TrackedPlane, TrackingEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::load::{LoadHandle, LoadOrchestrator, PendingSummary};
use crate::worker::{SceneCommand, SceneWorker};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Not started yet
    #[default]
    Idle,
    Active,
    /// Host paused; requests are still accepted but taps are ignored
    Suspended,
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub correction: CoordinateCorrection,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            correction: CoordinateCorrection::default(),
            command_buffer: 64,
            event_buffer: 100,
        }
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub config: SessionConfig,
    pub graph: SceneGraph,
    pub planes: Vec<TrackedPlane>,
    pub pending: Vec<PendingSummary>,
}

/// Handle to a running AR session
#[derive(Clone)]
pub struct ArSession {
    commands: mpsc::Sender<SceneCommand>,
    events: broadcast::Sender<ArEvent>,
}

impl ArSession {
    /// Start the scene worker for an engine and loader
    pub fn spawn(
        engine: Arc<dyn TrackingEngine>,
        loader: Arc<dyn AssetLoader>,
        settings: SessionSettings,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(settings.command_buffer);
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(settings.event_buffer);

        let worker = SceneWorker::new(
            engine,
            LoadOrchestrator::new(loader, completions),
            settings.correction,
            events.clone(),
            command_rx,
            completion_rx,
        );
        let task = tokio::spawn(worker.run());

        (Self { commands, events }, task)
    }

    /// Subscribe to `onError`, `onNodeTap` and `onPlaneOrPointTap`
    pub fn subscribe(&self) -> broadcast::Receiver<ArEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SceneCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn init_session(&self, config: SessionConfig) -> Result<(), SessionError> {
        self.request(|reply| SceneCommand::Init { config, reply })
            .await?
    }

    pub async fn suspend(&self) -> Result<(), SessionError> {
        self.request(|reply| SceneCommand::Suspend { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| SceneCommand::Resume { reply }).await?
    }

    /// Request a node under the scene root
    ///
    /// Returns as soon as the fetch has started; await the handle for the
    /// terminal outcome.
    pub async fn add_node(&self, descriptor: NodeDescriptor) -> Result<LoadHandle, SessionError> {
        self.request(|reply| SceneCommand::AddNode {
            descriptor,
            anchor: None,
            reply,
        })
        .await?
    }

    /// Request a node under a named anchor
    pub async fn add_node_to_anchor(
        &self,
        descriptor: NodeDescriptor,
        anchor: &str,
    ) -> Result<LoadHandle, SessionError> {
        let anchor = Some(anchor.to_string());
        self.request(|reply| SceneCommand::AddNode {
            descriptor,
            anchor,
            reply,
        })
        .await?
    }

    /// Remove a node and its descendants, or cancel its in-flight load
    pub async fn remove_node(&self, name: &str) -> Result<Vec<String>, SessionError> {
        let name = name.to_string();
        self.request(|reply| SceneCommand::RemoveNode { name, reply })
            .await?
    }

    pub async fn update_node_transform(
        &self,
        name: &str,
        matrix: Matrix4,
    ) -> Result<(), SessionError> {
        let name = name.to_string();
        self.request(|reply| SceneCommand::UpdateTransform {
            name,
            matrix,
            reply,
        })
        .await?
    }

    pub async fn add_plane_anchor(&self, matrix: Matrix4, name: &str) -> Result<(), SessionError> {
        let name = name.to_string();
        self.request(|reply| SceneCommand::AddPlaneAnchor {
            name,
            matrix,
            reply,
        })
        .await?
    }

    /// Remove an anchor and every node attached under it
    pub async fn remove_anchor(&self, name: &str) -> Result<Vec<String>, SessionError> {
        let name = name.to_string();
        self.request(|reply| SceneCommand::RemoveAnchor { name, reply })
            .await?
    }

    /// Feed a touch; returns the event emitted for it, if any
    pub async fn touch(
        &self,
        point: ScreenPoint,
        phase: TouchPhase,
    ) -> Result<Option<ArEvent>, SessionError> {
        self.request(|reply| SceneCommand::Touch {
            point,
            phase,
            reply,
        })
        .await
    }

    pub async fn lookup(&self, name: &str) -> Result<Option<EntityRef>, SessionError> {
        let name = name.to_string();
        self.request(|reply| SceneCommand::Lookup { name, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SceneCommand::Snapshot { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{AttachFailure, LoadOutcome};
    use arlink_core::{
        identity_with_translation, AssetFormat, ModelSource, Parent, Renderable, SourceKind,
        IDENTITY,
    };
    use arlink_loader::FetchError;
    use arlink_tracking::{
        DebugOverlays, HitCandidate, HitKind, PlaneAppearance, PlaneChange, PlaneGeometry,
        SceneChange, SimulatedEngine,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Loader that fails for `broken*` URIs and can be held until released
    #[derive(Default)]
    struct StubLoader {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl AssetLoader for StubLoader {
        async fn fetch(&self, source: &ModelSource) -> Result<Renderable, FetchError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if source.uri.starts_with("broken") {
                return Err(FetchError::NotFound(source.uri.clone()));
            }
            Ok(Renderable {
                source: source.clone(),
                sha256: "ab".repeat(32),
                byte_len: 16,
                format: AssetFormat::from_uri(&source.uri),
                path: PathBuf::from(&source.uri),
            })
        }
    }

    struct Harness {
        session: ArSession,
        engine: Arc<SimulatedEngine>,
        gate: Arc<Notify>,
        worker: JoinHandle<()>,
    }

    fn harness(gated: bool) -> Harness {
        let engine = Arc::new(SimulatedEngine::new());
        let gate = Arc::new(Notify::new());
        let loader = StubLoader {
            gate: gated.then(|| gate.clone()),
        };
        let (session, worker) =
            ArSession::spawn(engine.clone(), Arc::new(loader), SessionSettings::default());
        Harness {
            session,
            engine,
            gate,
            worker,
        }
    }

    async fn started(gated: bool, config: SessionConfig) -> Harness {
        let h = harness(gated);
        h.session.init_session(config).await.unwrap();
        h
    }

    fn model(name: &str, uri: &str) -> NodeDescriptor {
        NodeDescriptor {
            kind: SourceKind::LocalAsset,
            uri: uri.to_string(),
            name: name.to_string(),
            transform: IDENTITY,
        }
    }

    async fn wait_for<F>(session: &ArSession, condition: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        for _ in 0..200 {
            let snapshot = session.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn wait_for_changes<F>(engine: &SimulatedEngine, condition: F) -> Vec<SceneChange>
    where
        F: Fn(&[SceneChange]) -> bool,
    {
        for _ in 0..200 {
            let changes = engine.changes();
            if condition(&changes) {
                return changes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine changes not reached");
    }

    fn restyled_with_texture(changes: &[SceneChange]) -> usize {
        changes
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    SceneChange::Plane(PlaneChange::Restyle {
                        appearance: PlaneAppearance::Textured(_),
                        ..
                    })
                )
            })
            .count()
    }

    #[tokio::test]
    async fn test_anchor_scenario() {
        let h = started(false, SessionConfig::default()).await;

        h.session
            .add_plane_anchor(identity_with_translation(0.0, 0.0, -1.0), "anchor1")
            .await
            .unwrap();

        let handle = h
            .session
            .add_node_to_anchor(model("obj1", "model.glb"), "anchor1")
            .await
            .unwrap();
        assert_eq!(
            handle.outcome().await,
            LoadOutcome::Attached {
                name: "obj1".into(),
                parent: Parent::Anchor("anchor1".into())
            }
        );

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.graph.nodes.len(), 1);
        assert_eq!(snapshot.graph.nodes[0].parent, Parent::Anchor("anchor1".into()));
        assert!((snapshot.graph.anchors[0].pose.position.z + 1.0).abs() < 1e-9);

        let removed = h.session.remove_anchor("anchor1").await.unwrap();
        assert_eq!(removed, vec!["obj1".to_string()]);
        assert!(h.session.lookup("anchor1").await.unwrap().is_none());
        assert!(h.session.lookup("obj1").await.unwrap().is_none());
        assert_eq!(h.engine.detached_anchors().len(), 1);

        let changes = h.engine.changes();
        assert!(changes
            .iter()
            .any(|c| matches!(c, SceneChange::NodeSpawned { name, .. } if name == "obj1")));
        assert!(changes.iter().any(
            |c| matches!(c, SceneChange::NodesRemoved { names } if names == &vec!["obj1".to_string()])
        ));
    }

    #[tokio::test]
    async fn test_missing_anchor_never_creates_node() {
        let h = started(false, SessionConfig::default()).await;
        let mut events = h.session.subscribe();

        let handle = h
            .session
            .add_node_to_anchor(model("obj1", "model.glb"), "nowhere")
            .await
            .unwrap();
        assert_eq!(
            handle.outcome().await,
            LoadOutcome::AttachFailed {
                name: "obj1".into(),
                reason: AttachFailure::AnchorMissing("nowhere".into())
            }
        );
        assert!(h.session.lookup("obj1").await.unwrap().is_none());
        assert!(matches!(events.recv().await.unwrap(), ArEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_anchor_removed_during_fetch() {
        let h = started(true, SessionConfig::default()).await;
        h.session.add_plane_anchor(IDENTITY, "anchor1").await.unwrap();
        let handle = h
            .session
            .add_node_to_anchor(model("obj1", "model.glb"), "anchor1")
            .await
            .unwrap();

        h.session.remove_anchor("anchor1").await.unwrap();
        h.gate.notify_one();

        assert_eq!(
            handle.outcome().await,
            LoadOutcome::AttachFailed {
                name: "obj1".into(),
                reason: AttachFailure::AnchorMissing("anchor1".into())
            }
        );
        let snapshot = h.session.snapshot().await.unwrap();
        assert!(snapshot.graph.nodes.is_empty());
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_error() {
        let h = started(false, SessionConfig::default()).await;
        let mut events = h.session.subscribe();

        let handle = h.session.add_node(model("obj1", "broken.glb")).await.unwrap();
        let outcome = handle.outcome().await;
        assert!(matches!(
            outcome,
            LoadOutcome::FetchFailed { ref source, .. } if source.uri == "broken.glb"
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ArEvent::error("Unable to load renderable broken.glb")
        );
        assert!(h.session.lookup("obj1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_names_unique_including_in_flight() {
        let h = started(true, SessionConfig::default()).await;

        let first = h.session.add_node(model("obj1", "model.glb")).await.unwrap();
        let err = h.session.add_node(model("obj1", "other.glb")).await.unwrap_err();
        assert!(err.is_collision());
        let err = h.session.add_plane_anchor(IDENTITY, "obj1").await.unwrap_err();
        assert!(err.is_collision());

        h.gate.notify_one();
        assert!(first.outcome().await.is_attached());

        let err = h.session.add_node(model("obj1", "model.glb")).await.unwrap_err();
        assert!(err.is_collision());
        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.graph.nodes.len(), 1);
        assert!(snapshot.graph.anchors.is_empty());
    }

    #[tokio::test]
    async fn test_remove_cancels_in_flight_load() {
        let h = started(true, SessionConfig::default()).await;
        let handle = h.session.add_node(model("obj1", "model.glb")).await.unwrap();

        assert_eq!(h.session.remove_node("obj1").await.unwrap(), Vec::<String>::new());
        assert_eq!(
            handle.outcome().await,
            LoadOutcome::AttachFailed {
                name: "obj1".into(),
                reason: AttachFailure::Cancelled
            }
        );

        // The name is free again and the next load is unaffected
        let again = h.session.add_node(model("obj1", "model.glb")).await.unwrap();
        h.gate.notify_one();
        assert!(again.outcome().await.is_attached());
        assert!(h.session.lookup("obj1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_every_load_resolves_once() {
        let h = started(false, SessionConfig::default()).await;
        h.session.add_plane_anchor(IDENTITY, "a").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..12 {
            let uri = if i % 3 == 0 { "broken.glb" } else { "model.glb" };
            let descriptor = model(&format!("n{}", i), uri);
            let handle = if i % 2 == 0 {
                h.session.add_node_to_anchor(descriptor, "a").await.unwrap()
            } else {
                h.session.add_node(descriptor).await.unwrap()
            };
            handles.push(handle);
        }

        let mut attached = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.outcome().await {
                LoadOutcome::Attached { .. } => attached += 1,
                LoadOutcome::FetchFailed { .. } => failed += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(attached, 8);
        assert_eq!(failed, 4);

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.graph.nodes.len(), 8);
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_update_transform() {
        let h = started(false, SessionConfig::default()).await;
        let handle = h.session.add_node(model("obj1", "model.glb")).await.unwrap();
        assert!(handle.outcome().await.is_attached());

        h.session
            .update_node_transform("obj1", identity_with_translation(1.0, 2.0, 3.0))
            .await
            .unwrap();
        let node = h.session.lookup("obj1").await.unwrap().unwrap();
        let node = node.as_node().unwrap();
        assert!((node.transform.position.x - 1.0).abs() < 1e-9);
        assert_eq!(node.parent, Parent::Root);

        let mut degenerate = IDENTITY;
        degenerate[0] = 0.0;
        let err = h
            .session
            .update_node_transform("obj1", degenerate)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transform(_)));

        let err = h
            .session
            .update_node_transform("ghost", IDENTITY)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_unknown_names() {
        let h = started(false, SessionConfig::default()).await;
        assert!(h.session.remove_node("ghost").await.unwrap_err().is_not_found());
        assert!(h.session.remove_anchor("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_taps_classified() {
        let config = SessionConfig {
            handle_taps: true,
            ..Default::default()
        };
        let h = started(false, config).await;
        let handle = h.session.add_node(model("foo", "model.glb")).await.unwrap();
        assert!(handle.outcome().await.is_attached());
        let mut events = h.session.subscribe();

        h.engine.script_hits(vec![
            HitCandidate {
                kind: HitKind::Node("foo".into()),
                transform: IDENTITY,
                distance: 0.4,
            },
            HitCandidate {
                kind: HitKind::Plane,
                transform: IDENTITY,
                distance: 1.0,
            },
        ]);
        let point = ScreenPoint::new(100.0, 200.0);
        let event = h.session.touch(point, TouchPhase::Down).await.unwrap();
        assert_eq!(event, Some(ArEvent::NodeTap { name: "foo".into() }));
        assert_eq!(
            events.recv().await.unwrap(),
            ArEvent::NodeTap { name: "foo".into() }
        );

        // Rest of the gesture is ignored
        assert_eq!(h.session.touch(point, TouchPhase::Move).await.unwrap(), None);
        assert_eq!(h.session.touch(point, TouchPhase::Up).await.unwrap(), None);

        h.engine.script_hits(vec![
            HitCandidate {
                kind: HitKind::Plane,
                transform: IDENTITY,
                distance: 1.0,
            },
            HitCandidate {
                kind: HitKind::Other,
                transform: IDENTITY,
                distance: 2.0,
            },
        ]);
        let event = h.session.touch(point, TouchPhase::Down).await.unwrap();
        let Some(ArEvent::PlaneOrPointTap { hits }) = event else {
            panic!("expected environment tap");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[tokio::test]
    async fn test_taps_gated_by_config_and_state() {
        let h = started(false, SessionConfig::default()).await;
        h.engine.script_hits(vec![HitCandidate {
            kind: HitKind::Plane,
            transform: IDENTITY,
            distance: 1.0,
        }]);
        let point = ScreenPoint::new(0.0, 0.0);
        assert_eq!(h.session.touch(point, TouchPhase::Down).await.unwrap(), None);

        h.session
            .init_session(SessionConfig {
                handle_taps: true,
                ..Default::default()
            })
            .await
            .unwrap();
        h.session.suspend().await.unwrap();
        assert_eq!(h.session.touch(point, TouchPhase::Down).await.unwrap(), None);

        h.session.resume().await.unwrap();
        assert!(h
            .session
            .touch(point, TouchPhase::Down)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_plane_lifecycle() {
        let config = SessionConfig {
            show_planes: true,
            ..Default::default()
        };
        let h = started(false, config).await;

        h.engine
            .discover_plane(7u64, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        wait_for(&h.session, |s| s.planes.len() == 1).await;

        h.engine
            .update_plane(7u64, Default::default(), PlaneGeometry::rectangle(2.0, 2.0));
        wait_for(&h.session, |s| s.planes[0].geometry.extent == [2.0, 2.0]).await;

        h.engine.lose_anchor(7u64);
        // Unknown ids are ignored
        h.engine.lose_anchor(99u64);
        let snapshot = wait_for(&h.session, |s| s.planes.is_empty()).await;
        assert!(snapshot.graph.anchors.is_empty());

        let plane_changes: Vec<_> = h
            .engine
            .changes()
            .into_iter()
            .filter_map(|c| match c {
                SceneChange::Plane(change) => Some(change),
                _ => None,
            })
            .collect();
        assert!(matches!(plane_changes[0], PlaneChange::Show { .. }));
        assert!(matches!(plane_changes[1], PlaneChange::Reshape { .. }));
        assert!(matches!(plane_changes[2], PlaneChange::Discard { .. }));
        assert_eq!(plane_changes.len(), 3);
    }

    #[tokio::test]
    async fn test_plane_loss_keeps_named_anchors() {
        let h = started(false, SessionConfig::default()).await;
        h.session.add_plane_anchor(IDENTITY, "anchor1").await.unwrap();
        let tracking_id = h
            .session
            .snapshot()
            .await
            .unwrap()
            .graph
            .anchors[0]
            .tracking_id
            .clone()
            .unwrap();

        h.engine.lose_anchor(tracking_id);
        h.engine
            .discover_plane(1u64, Default::default(), PlaneGeometry::default());
        // Once the later event is visible the earlier one was processed too
        let snapshot = wait_for(&h.session, |s| s.planes.len() == 1).await;
        assert_eq!(snapshot.graph.anchors.len(), 1);
    }

    #[tokio::test]
    async fn test_missed_plane_events_are_recovered() {
        let h = started(false, SessionConfig::default()).await;
        for id in 0..200u64 {
            h.engine
                .discover_plane(id, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        }
        wait_for(&h.session, |s| s.planes.len() == 200).await;

        // More events than the tracking channel holds, sent without yielding
        for id in 0..150u64 {
            h.engine.lose_anchor(id);
        }
        for round in 0..6u64 {
            for id in 150..200u64 {
                let size = if round == 5 { 5.0 } else { 2.0 };
                h.engine
                    .update_plane(id, Default::default(), PlaneGeometry::rectangle(size, size));
            }
        }

        let snapshot = wait_for(&h.session, |s| {
            s.planes.len() == 50 && s.planes.iter().all(|p| p.geometry.extent == [5.0, 5.0])
        })
        .await;
        assert!(snapshot.planes.iter().all(|p| {
            let id: u64 = p.id.as_str().parse().unwrap();
            id >= 150
        }));

        for id in 150..200u64 {
            h.engine.lose_anchor(id);
        }
        wait_for(&h.session, |s| s.planes.is_empty()).await;
        assert!(h.engine.tracked_planes().await.is_empty());
    }

    #[tokio::test]
    async fn test_debug_overlays_follow_config() {
        let h = started(
            false,
            SessionConfig {
                show_feature_points: true,
                show_world_origin: true,
                ..Default::default()
            },
        )
        .await;
        h.session
            .init_session(SessionConfig {
                show_world_origin: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let overlays: Vec<DebugOverlays> = h
            .engine
            .changes()
            .into_iter()
            .filter_map(|c| match c {
                SceneChange::Overlays(overlays) => Some(overlays),
                _ => None,
            })
            .collect();
        assert_eq!(
            overlays,
            vec![
                DebugOverlays {
                    feature_points: true,
                    world_origin: true
                },
                DebugOverlays {
                    feature_points: false,
                    world_origin: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_custom_plane_texture_restyles_planes() {
        let h = started(
            true,
            SessionConfig {
                show_planes: true,
                custom_plane_texture_path: Some("images/triangle.png".into()),
                ..Default::default()
            },
        )
        .await;

        // Planes found while the texture loads get the default look
        h.engine
            .discover_plane(1u64, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        h.engine
            .discover_plane(2u64, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        wait_for(&h.session, |s| s.planes.len() == 2).await;
        assert!(h.engine.changes().iter().all(|c| !matches!(
            c,
            SceneChange::Plane(PlaneChange::Show {
                appearance: PlaneAppearance::Textured(_),
                ..
            })
        )));

        h.gate.notify_one();
        let changes = wait_for_changes(&h.engine, |c| restyled_with_texture(c) == 2).await;
        assert_eq!(restyled_with_texture(&changes), 2);

        // New planes are shown textured straight away
        h.engine
            .discover_plane(3u64, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        wait_for_changes(&h.engine, |c| {
            c.iter().any(|c| {
                matches!(
                    c,
                    SceneChange::Plane(PlaneChange::Show {
                        appearance: PlaneAppearance::Textured(_),
                        ..
                    })
                )
            })
        })
        .await;

        // Dropping the texture path restores the default material
        h.session
            .init_session(SessionConfig {
                show_planes: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let defaults = h
            .engine
            .changes()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    SceneChange::Plane(PlaneChange::Restyle {
                        appearance: PlaneAppearance::Default,
                        ..
                    })
                )
            })
            .count();
        assert_eq!(defaults, 3);
    }

    #[tokio::test]
    async fn test_plane_texture_failure_reports_error() {
        let h = harness(false);
        let mut events = h.session.subscribe();
        h.session
            .init_session(SessionConfig {
                show_planes: true,
                custom_plane_texture_path: Some("broken.png".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ArEvent::error("Unable to load texture broken.png")
        );

        h.engine
            .discover_plane(1u64, Default::default(), PlaneGeometry::rectangle(1.0, 1.0));
        wait_for(&h.session, |s| s.planes.len() == 1).await;
        assert_eq!(restyled_with_texture(&h.engine.changes()), 0);
        assert!(h.engine.changes().iter().any(|c| matches!(
            c,
            SceneChange::Plane(PlaneChange::Show {
                appearance: PlaneAppearance::Default,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_session_unavailable() {
        let h = harness(false);
        h.engine.refuse_start("camera permission denied");
        let err = h
            .session
            .init_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Engine(_)));
        assert_eq!(
            h.session.snapshot().await.unwrap().state,
            SessionState::Idle
        );
        assert!(h.session.suspend().await.is_err());
    }

    #[tokio::test]
    async fn test_suspend_resume() {
        let h = started(false, SessionConfig::default()).await;
        h.session.suspend().await.unwrap();
        assert!(!h.engine.is_running());
        assert_eq!(
            h.session.snapshot().await.unwrap().state,
            SessionState::Suspended
        );

        // Requests are still served while suspended
        h.session.add_plane_anchor(IDENTITY, "a").await.unwrap();

        h.session.resume().await.unwrap();
        assert!(h.engine.is_running());
        assert_eq!(h.session.snapshot().await.unwrap().state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_shutdown_resolves_pending_loads() {
        let h = started(true, SessionConfig::default()).await;
        let handle = h.session.add_node(model("obj1", "model.glb")).await.unwrap();

        drop(h.session);
        h.worker.await.unwrap();
        assert_eq!(
            handle.outcome().await,
            LoadOutcome::AttachFailed {
                name: "obj1".into(),
                reason: AttachFailure::SessionClosed
            }
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = SessionSnapshot {
            state: SessionState::Active,
            config: SessionConfig::default(),
            graph: arlink_core::SceneRegistry::new().to_graph(),
            planes: Vec::new(),
            pending: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["config"]["planeDetectionConfig"], 0);
    }
}
