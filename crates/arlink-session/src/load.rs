//! In-flight content loads
//!
//! Each requested node gets one [`PendingLoad`] holding the reply side of
//! a oneshot channel. The fetch itself runs on its own task and reports back
//! through the completion channel; resolving a load consumes it, so a
//! caller is notified exactly once.

use arlink_core::{ModelSource, Parent, RegistryError, Renderable, Transform};
use arlink_loader::{AssetLoader, FetchError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Where a load is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Requested,
    Fetching,
    Attaching,
    Completed,
    FetchFailed,
    AttachFailed,
}

/// Why a fetched model could not be placed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttachFailure {
    #[error("anchor {0} no longer exists")]
    AnchorMissing(String),
    #[error("registry rejected node: {0}")]
    Rejected(RegistryError),
    #[error("load cancelled")]
    Cancelled,
    #[error("session closed")]
    SessionClosed,
}

/// Terminal result of one load request
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Attached { name: String, parent: Parent },
    FetchFailed { source: ModelSource, reason: String },
    AttachFailed { name: String, reason: AttachFailure },
}

impl LoadOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, LoadOutcome::Attached { .. })
    }

    pub fn state(&self) -> LoadState {
        match self {
            LoadOutcome::Attached { .. } => LoadState::Completed,
            LoadOutcome::FetchFailed { .. } => LoadState::FetchFailed,
            LoadOutcome::AttachFailed { .. } => LoadState::AttachFailed,
        }
    }
}

/// Caller side of a load request
#[derive(Debug)]
pub struct LoadHandle {
    name: String,
    rx: oneshot::Receiver<LoadOutcome>,
}

impl LoadHandle {
    /// A handle that is already resolved
    pub fn resolved(name: &str, outcome: LoadOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self {
            name: name.to_string(),
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the terminal outcome
    pub async fn outcome(self) -> LoadOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => LoadOutcome::AttachFailed {
                name: self.name,
                reason: AttachFailure::SessionClosed,
            },
        }
    }
}

/// Fetch results flowing back into the session worker
#[derive(Debug)]
pub enum Completion {
    Model {
        id: u64,
        name: String,
        result: Result<Renderable, FetchError>,
    },
    Texture {
        descriptor: String,
        result: Result<Renderable, FetchError>,
    },
}

/// One in-flight load
#[derive(Debug)]
pub struct PendingLoad {
    pub id: u64,
    pub name: String,
    pub source: ModelSource,
    pub anchor: Option<String>,
    pub transform: Transform,
    pub state: LoadState,
    pub requested_at: DateTime<Utc>,
    task: Option<AbortHandle>,
    reply: oneshot::Sender<LoadOutcome>,
}

impl PendingLoad {
    /// Deliver the terminal outcome, consuming the load
    pub fn resolve(mut self, outcome: LoadOutcome) {
        self.state = outcome.state();
        debug!(
            node = %self.name,
            state = ?self.state,
            elapsed_ms = (Utc::now() - self.requested_at).num_milliseconds(),
            "Load resolved"
        );
        // The caller may have stopped waiting
        let _ = self.reply.send(outcome);
    }
}

/// Summary of a pending load for snapshots
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub name: String,
    pub uri: String,
    pub anchor: Option<String>,
    pub state: LoadState,
    pub requested_at: DateTime<Utc>,
}

/// Tracks every in-flight load and spawns the fetches
pub struct LoadOrchestrator {
    loader: Arc<dyn AssetLoader>,
    completions: mpsc::UnboundedSender<Completion>,
    pending: HashMap<String, PendingLoad>,
    next_id: u64,
}

impl LoadOrchestrator {
    pub fn new(loader: Arc<dyn AssetLoader>, completions: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            loader,
            completions,
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Start fetching a model for `name`
    ///
    /// The caller has already checked that the name is free.
    pub fn request(
        &mut self,
        name: &str,
        source: ModelSource,
        anchor: Option<String>,
        transform: Transform,
    ) -> LoadHandle {
        let id = self.next_id;
        self.next_id += 1;

        let (reply, rx) = oneshot::channel();
        let mut load = PendingLoad {
            id,
            name: name.to_string(),
            source: source.clone(),
            anchor,
            transform,
            state: LoadState::Requested,
            requested_at: Utc::now(),
            task: None,
            reply,
        };

        let loader = self.loader.clone();
        let completions = self.completions.clone();
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            let result = loader.fetch(&source).await;
            let _ = completions.send(Completion::Model {
                id,
                name: task_name,
                result,
            });
        });
        load.task = Some(task.abort_handle());
        load.state = LoadState::Fetching;

        info!(node = %name, uri = %load.source, anchor = ?load.anchor, "Load requested");
        self.pending.insert(name.to_string(), load);

        LoadHandle {
            name: name.to_string(),
            rx,
        }
    }

    /// Claim a load whose fetch finished
    ///
    /// Returns `None` for completions of loads that were cancelled or
    /// replaced in the meantime.
    pub fn take_fetched(&mut self, name: &str, id: u64) -> Option<PendingLoad> {
        match self.pending.get(name) {
            Some(load) if load.id == id => {
                let mut load = self.pending.remove(name)?;
                load.task = None;
                load.state = LoadState::Attaching;
                Some(load)
            }
            _ => {
                debug!(node = %name, id = id, "Stale load completion dropped");
                None
            }
        }
    }

    /// Abort an in-flight load; resolves it as cancelled
    pub fn cancel(&mut self, name: &str) -> bool {
        let Some(mut load) = self.pending.remove(name) else {
            return false;
        };
        if let Some(task) = load.task.take() {
            task.abort();
        }
        info!(node = %name, "In-flight load cancelled");
        load.resolve(LoadOutcome::AttachFailed {
            name: name.to_string(),
            reason: AttachFailure::Cancelled,
        });
        true
    }

    /// Resolve every pending load as failed because the session is ending
    pub fn close_all(&mut self) {
        for (name, mut load) in self.pending.drain() {
            if let Some(task) = load.task.take() {
                task.abort();
            }
            load.resolve(LoadOutcome::AttachFailed {
                name,
                reason: AttachFailure::SessionClosed,
            });
        }
    }

    /// Start fetching a plane texture
    pub fn fetch_texture(&self, descriptor: &str, source: ModelSource) {
        let loader = self.loader.clone();
        let completions = self.completions.clone();
        let descriptor = descriptor.to_string();
        info!(texture = %descriptor, "Loading plane texture");
        tokio::spawn(async move {
            let result = loader.fetch(&source).await;
            let _ = completions.send(Completion::Texture { descriptor, result });
        });
    }

    pub fn summaries(&self) -> Vec<PendingSummary> {
        let mut summaries: Vec<PendingSummary> = self
            .pending
            .values()
            .map(|load| PendingSummary {
                name: load.name.clone(),
                uri: load.source.uri.clone(),
                anchor: load.anchor.clone(),
                state: load.state,
                requested_at: load.requested_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}
