//! Application state management

use anyhow::{Context, Result};
use arlink_core::ArEvent;
use arlink_loader::{BundleLoader, HttpLoader, ModelCache, ModelFetcher};
use arlink_session::{ArSession, SessionSettings};
use arlink_tracking::{SimulatedEngine, TrackingEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Handle to the scene worker
    pub session: ArSession,
    /// Tracking engine the session drives
    pub engine: Arc<dyn TrackingEngine>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create state backed by the in-process engine
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        Self::with_engine(config, Arc::new(SimulatedEngine::new())).await
    }

    /// Create state driving the given engine
    pub async fn with_engine(config: Config, engine: Arc<dyn TrackingEngine>) -> Result<Arc<Self>> {
        let cache = ModelCache::new(PathBuf::from(&config.assets.cache_dir))
            .context("Failed to open model cache")?;
        let http = HttpLoader::new(cache, Duration::from_secs(config.assets.http_timeout_secs))
            .context("Failed to create HTTP client")?;
        let fetcher = ModelFetcher::new(BundleLoader::new(&config.assets.root), http);

        let settings = SessionSettings {
            correction: config.engine.coordinate_correction,
            ..Default::default()
        };
        let (session, worker) = ArSession::spawn(engine.clone(), Arc::new(fetcher), settings);
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Scene worker panicked");
            }
        });

        info!(
            engine = %engine.name(),
            assets = %config.assets.root,
            cache = %config.assets.cache_dir,
            "AR session worker started"
        );

        Ok(Arc::new(Self {
            session,
            engine,
            config,
        }))
    }

    /// Apply the configured session defaults
    pub async fn start_session(&self) {
        if let Err(e) = self.session.init_session(self.config.session.clone()).await {
            warn!(error = %e, "Default AR session could not be started");
        }
    }

    /// Subscribe to events for the application layer
    pub fn subscribe(&self) -> broadcast::Receiver<ArEvent> {
        self.session.subscribe()
    }
}
