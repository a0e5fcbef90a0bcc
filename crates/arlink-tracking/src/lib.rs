//! arlink Tracking - Engine capability and event reconciliation
//!
//! This crate provides:
//! - The [`TrackingEngine`] trait every native AR engine adapter implements
//! - A scriptable [`SimulatedEngine`]
//! - Plane reconciliation from anchor lifecycle events
//! - Tap classification over hit-test candidates

pub mod dispatch;
pub mod engine;
pub mod planes;
pub mod simulated;

pub use dispatch::{classify, InteractionDispatcher, TouchPhase};
pub use engine::{
    AnchorKind, DebugOverlays, EngineConfig, EngineError, FocusMode, HitCandidate, HitKind,
    PlaneGeometry, PlaneSnapshot, SceneChange, ScreenPoint, TrackingEngine, TrackingEvent, UpdateMode,
};
pub use planes::{PlaneAppearance, PlaneChange, PlaneTracker, TextureState, TrackedPlane};
pub use simulated::SimulatedEngine;
