//! Reconciliation lifecycle for desired-state resources
//!
//! A [`LifecycleManager`] drives one resource instance per call through an
//! ordered list of [`Subroutine`]s:
//! - finalizer tokens are registered before processing and released once
//!   cleanup has converged
//! - per-subroutine and aggregate `Ready` conditions are maintained when the
//!   resource type supports them
//! - routine reconciles can be spread over a 12-24h window
//! - status is written back only when it actually changed

#![deny(missing_docs)]

pub mod clock;
pub mod conditions;
pub mod controller;
pub mod finalizer;
pub mod manager;
pub mod metrics;
pub mod report;
pub mod resource;
pub mod retry;
pub mod spread;
pub mod store;
pub mod subroutine;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use controller::{run_controller, ControllerContext};
pub use manager::{LifecycleManager, LifecycleManagerBuilder};
pub use report::{ErrorReporter, ReportTags, TracingReporter};
pub use resource::{HasConditions, LifecycleObject, ResourceId, SpreadReconcileStatus};
pub use retry::{retry_update, retry_update_status, ConflictRetry};
pub use spread::SpreadScheduler;
pub use store::{KubeStore, ResourceStore};
pub use subroutine::{ReconcileContext, ReconcileOutcome, Subroutine, SubroutinePhase};
