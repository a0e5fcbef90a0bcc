//! The session worker: sole owner of the scene
//!
//! Application requests, fetch completions and tracking callbacks all land
//! in one task, so the registry, the plane tracker and the pending loads
//! are only ever mutated from here.

use arlink_core::{
    decompose_with, ArEvent, CoordinateCorrection, EntityRef, Matrix4, ModelSource, NodeDescriptor,
    RegistryError, SceneRegistry, SessionConfig,
};
use arlink_tracking::{
    DebugOverlays, EngineConfig, EngineError, InteractionDispatcher, PlaneChange, PlaneTracker,
    SceneChange, ScreenPoint, TouchPhase, TrackingEngine, TrackingEvent,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::load::{AttachFailure, Completion, LoadHandle, LoadOrchestrator, LoadOutcome};
use crate::session::{SessionSnapshot, SessionState};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests handled by the worker
#[derive(Debug)]
pub enum SceneCommand {
    Init {
        config: SessionConfig,
        reply: Reply<()>,
    },
    Suspend {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    AddNode {
        descriptor: NodeDescriptor,
        anchor: Option<String>,
        reply: Reply<LoadHandle>,
    },
    RemoveNode {
        name: String,
        reply: Reply<Vec<String>>,
    },
    UpdateTransform {
        name: String,
        matrix: Matrix4,
        reply: Reply<()>,
    },
    AddPlaneAnchor {
        name: String,
        matrix: Matrix4,
        reply: Reply<()>,
    },
    RemoveAnchor {
        name: String,
        reply: Reply<Vec<String>>,
    },
    Touch {
        point: ScreenPoint,
        phase: TouchPhase,
        reply: oneshot::Sender<Option<ArEvent>>,
    },
    Lookup {
        name: String,
        reply: oneshot::Sender<Option<EntityRef>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

pub struct SceneWorker {
    engine: Arc<dyn TrackingEngine>,
    correction: CoordinateCorrection,
    registry: SceneRegistry,
    planes: PlaneTracker,
    dispatcher: InteractionDispatcher,
    loads: LoadOrchestrator,
    state: SessionState,
    config: SessionConfig,
    events: broadcast::Sender<ArEvent>,
    commands: mpsc::Receiver<SceneCommand>,
    completions: mpsc::UnboundedReceiver<Completion>,
    tracking: broadcast::Receiver<TrackingEvent>,
}

impl SceneWorker {
    pub(crate) fn new(
        engine: Arc<dyn TrackingEngine>,
        loads: LoadOrchestrator,
        correction: CoordinateCorrection,
        events: broadcast::Sender<ArEvent>,
        commands: mpsc::Receiver<SceneCommand>,
        completions: mpsc::UnboundedReceiver<Completion>,
    ) -> Self {
        let tracking = engine.subscribe();
        Self {
            engine,
            correction,
            registry: SceneRegistry::new(),
            planes: PlaneTracker::new(false),
            dispatcher: InteractionDispatcher::new(false),
            loads,
            state: SessionState::Idle,
            config: SessionConfig::default(),
            events,
            commands,
            completions,
            tracking,
        }
    }

    /// Process messages until every session handle is dropped
    pub async fn run(mut self) {
        info!(engine = %self.engine.name(), "Scene worker started");
        let mut tracking_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                event = self.tracking.recv(), if tracking_open => match event {
                    Ok(event) => self.on_tracking(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Tracking events dropped, resynchronizing planes");
                        self.resync_planes().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Tracking engine event stream closed");
                        tracking_open = false;
                    }
                },
            }
        }

        self.loads.close_all();
        if self.state == SessionState::Active {
            self.engine.pause().await;
        }
        info!("Scene worker stopped");
    }

    async fn handle(&mut self, command: SceneCommand) {
        match command {
            SceneCommand::Init { config, reply } => {
                let _ = reply.send(self.init(config).await);
            }
            SceneCommand::Suspend { reply } => {
                let _ = reply.send(self.suspend().await);
            }
            SceneCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            SceneCommand::AddNode {
                descriptor,
                anchor,
                reply,
            } => {
                let _ = reply.send(self.add_node(descriptor, anchor));
            }
            SceneCommand::RemoveNode { name, reply } => {
                let _ = reply.send(self.remove_node(&name));
            }
            SceneCommand::UpdateTransform {
                name,
                matrix,
                reply,
            } => {
                let _ = reply.send(self.update_transform(&name, &matrix));
            }
            SceneCommand::AddPlaneAnchor {
                name,
                matrix,
                reply,
            } => {
                let _ = reply.send(self.add_plane_anchor(&name, &matrix).await);
            }
            SceneCommand::RemoveAnchor { name, reply } => {
                let _ = reply.send(self.remove_anchor(&name).await);
            }
            SceneCommand::Touch {
                point,
                phase,
                reply,
            } => {
                let _ = reply.send(self.touch(point, phase).await);
            }
            SceneCommand::Lookup { name, reply } => {
                let _ = reply.send(self.registry.lookup(&name));
            }
            SceneCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn init(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        let engine_config = EngineConfig {
            plane_detection: config.plane_detection,
            ..Default::default()
        };
        if let Err(e) = self.engine.run_session(engine_config).await {
            warn!(engine = %self.engine.name(), error = %e, "AR session could not be started");
            return Err(e.into());
        }

        self.state = SessionState::Active;
        self.engine.apply(SceneChange::Overlays(DebugOverlays {
            feature_points: config.show_feature_points,
            world_origin: config.show_world_origin,
        }));
        self.dispatcher.set_enabled(config.handle_taps);

        let changes = self.planes.set_visible(config.show_planes);
        self.apply_planes(changes);

        match &config.custom_plane_texture_path {
            Some(path) => {
                if self.planes.request_texture(path) {
                    self.loads.fetch_texture(path, ModelSource::local(path.as_str()));
                }
            }
            None => {
                let changes = self.planes.clear_texture();
                self.apply_planes(changes);
            }
        }

        info!(
            planes = ?config.plane_detection,
            show_planes = config.show_planes,
            handle_taps = config.handle_taps,
            "AR session active"
        );
        self.config = config;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Err(EngineError::NotRunning.into()),
            SessionState::Suspended => Ok(()),
            SessionState::Active => {
                self.engine.pause().await;
                self.state = SessionState::Suspended;
                info!("AR session suspended");
                Ok(())
            }
        }
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Err(EngineError::NotRunning.into()),
            SessionState::Active => Ok(()),
            SessionState::Suspended => {
                self.engine.resume().await?;
                self.state = SessionState::Active;
                info!("AR session resumed");
                Ok(())
            }
        }
    }

    fn add_node(
        &mut self,
        descriptor: NodeDescriptor,
        anchor: Option<String>,
    ) -> Result<LoadHandle, SessionError> {
        let name = descriptor.name.clone();
        if self.registry.contains(&name) || self.loads.is_pending(&name) {
            warn!(node = %name, "Node name already in use");
            return Err(RegistryError::NameCollision(name).into());
        }

        let transform = match decompose_with(&descriptor.transform, self.correction) {
            Ok(transform) => transform,
            Err(e) => {
                self.emit(ArEvent::error(format!("Invalid transform for node {}: {}", name, e)));
                return Err(e.into());
            }
        };

        if let Some(anchor_name) = &anchor {
            if !self.registry.contains_anchor(anchor_name) {
                self.emit(ArEvent::error(format!(
                    "Unable to attach {}: anchor {} not found",
                    name, anchor_name
                )));
                return Ok(LoadHandle::resolved(
                    &name,
                    LoadOutcome::AttachFailed {
                        name: name.clone(),
                        reason: AttachFailure::AnchorMissing(anchor_name.clone()),
                    },
                ));
            }
        }

        Ok(self.loads.request(&name, descriptor.source(), anchor, transform))
    }

    fn remove_node(&mut self, name: &str) -> Result<Vec<String>, SessionError> {
        if self.loads.cancel(name) {
            return Ok(Vec::new());
        }

        let removed = self.registry.remove_node(name)?;
        info!(node = %name, removed = removed.len(), "Node removed");
        self.engine.apply(SceneChange::NodesRemoved {
            names: removed.clone(),
        });
        Ok(removed)
    }

    fn update_transform(&mut self, name: &str, matrix: &Matrix4) -> Result<(), SessionError> {
        let transform = decompose_with(matrix, self.correction)?;
        self.registry.update_transform(name, transform)?;
        self.engine.apply(SceneChange::NodeTransformed {
            name: name.to_string(),
            transform: transform.to_render(),
        });
        Ok(())
    }

    async fn add_plane_anchor(&mut self, name: &str, matrix: &Matrix4) -> Result<(), SessionError> {
        if self.registry.contains(name) || self.loads.is_pending(name) {
            warn!(anchor = %name, "Anchor name already in use");
            return Err(RegistryError::NameCollision(name.to_string()).into());
        }
        let pose = decompose_with(matrix, self.correction)?.pose();

        let tracking_id = self.engine.create_anchor(pose).await?;
        if let Err(e) = self.registry.add_anchor(name, pose, Some(tracking_id.clone())) {
            self.engine.detach_anchor(&tracking_id).await;
            return Err(e.into());
        }

        info!(anchor = %name, id = %tracking_id, "Plane anchor added");
        Ok(())
    }

    async fn remove_anchor(&mut self, name: &str) -> Result<Vec<String>, SessionError> {
        let (anchor, removed) = self.registry.remove_anchor(name)?;
        if let Some(id) = &anchor.tracking_id {
            self.engine.detach_anchor(id).await;
        }
        if !removed.is_empty() {
            self.engine.apply(SceneChange::NodesRemoved {
                names: removed.clone(),
            });
        }

        info!(anchor = %name, removed = removed.len(), "Anchor removed");
        Ok(removed)
    }

    async fn touch(&mut self, point: ScreenPoint, phase: TouchPhase) -> Option<ArEvent> {
        if self.state != SessionState::Active {
            debug!(state = ?self.state, "Touch ignored, session not active");
            return None;
        }
        if !self.dispatcher.begins_gesture(phase) {
            return None;
        }

        let candidates = self.engine.hit_test(point).await;
        let registry = &self.registry;
        let event = self
            .dispatcher
            .dispatch(&candidates, |name| registry.contains_node(name));
        self.emit(event.clone());
        Some(event)
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Model { id, name, result } => {
                let Some(load) = self.loads.take_fetched(&name, id) else {
                    return;
                };

                let renderable = match result {
                    Ok(renderable) => renderable,
                    Err(e) => {
                        warn!(node = %name, uri = %load.source, error = %e, "Model fetch failed");
                        self.emit(ArEvent::error(format!(
                            "Unable to load renderable {}",
                            load.source.uri
                        )));
                        let source = load.source.clone();
                        load.resolve(LoadOutcome::FetchFailed {
                            source,
                            reason: e.to_string(),
                        });
                        return;
                    }
                };

                let attached = match &load.anchor {
                    Some(anchor) if !self.registry.contains_anchor(anchor) => {
                        Err(AttachFailure::AnchorMissing(anchor.clone()))
                    }
                    anchor => self
                        .registry
                        .add_node(&name, load.transform, anchor.as_deref())
                        .map_err(AttachFailure::Rejected),
                };

                match attached {
                    Ok(()) => {
                        let parent = self.registry.parent_of(&name).unwrap_or_default();
                        self.engine.apply(SceneChange::NodeSpawned {
                            name: name.clone(),
                            parent: parent.clone(),
                            transform: load.transform.to_render(),
                            renderable,
                        });
                        info!(node = %name, parent = ?parent, "Node attached");
                        load.resolve(LoadOutcome::Attached { name, parent });
                    }
                    Err(reason) => {
                        self.emit(ArEvent::error(format!("Unable to attach {}: {}", name, reason)));
                        load.resolve(LoadOutcome::AttachFailed { name, reason });
                    }
                }
            }
            Completion::Texture { descriptor, result } => match result {
                Ok(texture) => {
                    let changes = self.planes.texture_ready(&descriptor, texture);
                    self.apply_planes(changes);
                }
                Err(e) => {
                    warn!(texture = %descriptor, error = %e, "Plane texture failed to load");
                    self.planes.texture_failed(&descriptor);
                    self.emit(ArEvent::error(format!("Unable to load texture {}", descriptor)));
                }
            },
        }
    }

    fn on_tracking(&mut self, event: TrackingEvent) {
        let changes = match event {
            TrackingEvent::AnchorDiscovered {
                id,
                pose,
                kind,
                geometry,
            } => self.planes.on_anchor_discovered(id, pose, kind, geometry),
            TrackingEvent::AnchorUpdated { id, pose, geometry } => {
                self.planes.on_anchor_updated(&id, pose, geometry)
            }
            TrackingEvent::AnchorRemoved { id } => self.planes.on_anchor_removed(&id),
            TrackingEvent::Frame { timestamp } => {
                trace!(timestamp = timestamp, "Frame");
                Vec::new()
            }
        };
        self.apply_planes(changes);
    }

    async fn resync_planes(&mut self) {
        let current = self.engine.tracked_planes().await;
        let changes = self.planes.resync(current);
        self.apply_planes(changes);
    }

    fn apply_planes(&self, changes: Vec<PlaneChange>) {
        for change in changes {
            self.engine.apply(SceneChange::Plane(change));
        }
    }

    fn emit(&self, event: ArEvent) {
        if let ArEvent::Error { message } = &event {
            warn!(message = %message, "onError");
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut planes: Vec<_> = self.planes.planes().cloned().collect();
        planes.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        SessionSnapshot {
            state: self.state,
            config: self.config.clone(),
            graph: self.registry.to_graph(),
            planes,
            pending: self.loads.summaries(),
        }
    }
}
