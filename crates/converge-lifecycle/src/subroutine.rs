//! Subroutine contract and the requeue signal it produces

use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use converge_common::OperatorError;

use crate::resource::{LifecycleObject, ResourceId};

/// Requeue request returned by a subroutine and by a whole reconcile
///
/// `requeue_after == Duration::ZERO` means no delayed requeue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Reconcile again as soon as possible
    pub requeue: bool,
    /// Reconcile again after this delay
    pub requeue_after: Duration,
}

impl ReconcileOutcome {
    /// Work converged; nothing left to do until the next change
    pub fn done() -> Self {
        Self::default()
    }

    /// Ask to be reconciled again immediately
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: Duration::ZERO,
        }
    }

    /// Ask to be reconciled again after `after`
    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: after,
        }
    }

    /// True when no further requeue of any kind is requested
    pub fn is_done(&self) -> bool {
        !self.requeue && self.requeue_after.is_zero()
    }

    /// Fold another outcome into this one
    ///
    /// An immediate requeue is sticky; among delayed requeues the shortest
    /// non-zero delay wins.
    pub fn merge(&mut self, other: ReconcileOutcome) {
        if other.requeue {
            self.requeue = true;
        }
        if !other.requeue_after.is_zero()
            && (self.requeue_after.is_zero() || other.requeue_after < self.requeue_after)
        {
            self.requeue_after = other.requeue_after;
        }
    }

    /// Translate into the action understood by `kube::runtime::Controller`
    pub fn into_action(self) -> Action {
        if self.requeue {
            Action::requeue(Duration::ZERO)
        } else if !self.requeue_after.is_zero() {
            Action::requeue(self.requeue_after)
        } else {
            Action::await_change()
        }
    }
}

/// Which step of a subroutine is running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubroutinePhase {
    /// Converging a live resource
    Process,
    /// Cleaning up a resource marked for deletion
    Finalize,
}

impl SubroutinePhase {
    /// Suffix of the per-subroutine condition type for this phase
    pub fn condition_suffix(&self) -> &'static str {
        match self {
            Self::Process => "Ready",
            Self::Finalize => "Finalize",
        }
    }

    /// Noun used in condition messages
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Process => "subroutine",
            Self::Finalize => "subroutine finalization",
        }
    }
}

/// Per-reconcile context handed to subroutines
#[derive(Clone, Debug)]
pub struct ReconcileContext {
    /// Correlation id shared by every log line and span of this reconcile
    pub reconcile_id: Uuid,
    /// Identity of the resource being reconciled
    pub resource: ResourceId,
    /// Cancellation signal from the caller; long-running subroutines should
    /// check it between steps
    pub cancel: CancellationToken,
}

impl ReconcileContext {
    /// Build a context for a fresh reconcile of `resource`
    pub fn new(resource: ResourceId, cancel: CancellationToken) -> Self {
        Self {
            reconcile_id: Uuid::new_v4(),
            resource,
            cancel,
        }
    }
}

/// A named, idempotent unit of work run once per reconcile
///
/// `process` converges a live resource; `finalize` cleans up after it when the
/// resource is deleted. Both may mutate the resource's status block, which the
/// manager persists when it changed.
#[async_trait]
pub trait Subroutine<K: LifecycleObject>: Send + Sync {
    /// Unique name within one manager; used in condition types and logs
    fn name(&self) -> &str;

    /// Finalizer tokens this subroutine owns
    fn finalizers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Converge the resource toward its desired state
    async fn process(
        &self,
        ctx: &ReconcileContext,
        instance: &mut K,
    ) -> Result<ReconcileOutcome, OperatorError>;

    /// Release whatever `process` acquired
    async fn finalize(
        &self,
        ctx: &ReconcileContext,
        instance: &mut K,
    ) -> Result<ReconcileOutcome, OperatorError>;
}
