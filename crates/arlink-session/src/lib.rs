//! arlink Session - Single-writer owner of the AR scene
//!
//! One worker task owns the scene registry, the plane tracker, the tap
//! dispatcher and every in-flight content load. Application requests reach
//! it through [`ArSession`]; tracking callbacks and fetch completions are
//! consumed by the same task, so scene mutations never interleave.

pub mod error;
pub mod load;
pub mod session;
pub mod worker;

pub use error::SessionError;
pub use load::{AttachFailure, LoadHandle, LoadOrchestrator, LoadOutcome, LoadState, PendingSummary};
pub use session::{ArSession, SessionSettings, SessionSnapshot, SessionState};
pub use worker::{SceneCommand, SceneWorker};
