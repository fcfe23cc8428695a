//! Lifecycle manager
//!
//! One call to [`LifecycleManager::reconcile`] loads a resource, runs every
//! subroutine once in registration order, maintains conditions and the spread
//! schedule, and writes the status back only when it changed. Retries are not
//! performed here: the returned [`ReconcileOutcome`] or error tells the caller
//! when to run the whole cycle again.

mod builder;
mod runner;


use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use converge_common::crd::{Condition, ConditionStatus};
use converge_common::{Error, Result};

use crate::clock::Clock;
use crate::conditions::ConditionLedger;
use crate::finalizer;
use crate::metrics::{ReconcileResult, ReconcileTimer};
use crate::report::{report, ErrorReporter, ReportTags};
use crate::resource::{is_being_deleted, LifecycleObject, ResourceId};
use crate::spread::{self, SpreadScheduler};
use crate::store::ResourceStore;
use crate::subroutine::{ReconcileContext, ReconcileOutcome, Subroutine, SubroutinePhase};

pub use builder::LifecycleManagerBuilder;

/// Condition accessor captured from [`crate::HasConditions`] at build time
struct ConditionAccess<K> {
    conditions_mut: fn(&mut K) -> &mut Vec<Condition>,
}

/// How a reconcile finished, before it is reduced to an outcome
enum Finished {
    NotFound,
    Skipped(ReconcileOutcome),
    Reconciled(ReconcileOutcome),
}

impl Finished {
    fn metric(&self) -> ReconcileResult {
        match self {
            Finished::NotFound => ReconcileResult::NotFound,
            Finished::Skipped(_) => ReconcileResult::Skipped,
            Finished::Reconciled(outcome) if outcome.is_done() => ReconcileResult::Success,
            Finished::Reconciled(_) => ReconcileResult::Requeue,
        }
    }

    fn outcome(self) -> ReconcileOutcome {
        match self {
            Finished::NotFound => ReconcileOutcome::done(),
            Finished::Skipped(outcome) | Finished::Reconciled(outcome) => outcome,
        }
    }
}

/// Drives resources of kind `K` through an ordered list of subroutines
pub struct LifecycleManager<K: LifecycleObject> {
    operator: String,
    controller: String,
    store: Arc<dyn ResourceStore<K>>,
    subroutines: Vec<Arc<dyn Subroutine<K>>>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    conditions: Option<ConditionAccess<K>>,
    spread: Option<SpreadScheduler<K>>,
}

impl<K: LifecycleObject> LifecycleManager<K> {
    /// Start configuring a manager
    pub fn builder(
        operator: impl Into<String>,
        controller: impl Into<String>,
        store: Arc<dyn ResourceStore<K>>,
    ) -> LifecycleManagerBuilder<K> {
        LifecycleManagerBuilder::new(operator, controller, store)
    }

    /// Operator name
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Controller name
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Reconcile the resource identified by `id`
    ///
    /// A resource that no longer exists is a successful no-op. Errors carry
    /// their own retry and report classification; a cancelled reconcile
    /// returns [`Error::Cancelled`].
    pub async fn reconcile(
        &self,
        id: &ResourceId,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let ctx = ReconcileContext::new(id.clone(), cancel.clone());
        let tags = ReportTags::new(&self.operator, &self.controller, id, ctx.reconcile_id);
        let span = info_span!(
            "reconcile",
            operator = %self.operator,
            controller = %self.controller,
            namespace = %id.namespace,
            name = %id.name,
            reconcile_id = %ctx.reconcile_id,
        );

        let timer = ReconcileTimer::start(&self.controller);
        let result = self.run(&ctx, &tags).instrument(span).await;
        match result {
            Ok(finished) => {
                timer.finish(finished.metric());
                Ok(finished.outcome())
            }
            Err(err) => {
                timer.finish(ReconcileResult::Error);
                Err(err)
            }
        }
    }

    async fn run(&self, ctx: &ReconcileContext, tags: &ReportTags) -> Result<Finished> {
        info!("start reconcile");

        let fetched = self.guarded(ctx, self.store.get(&ctx.resource)).await;
        let mut instance = match fetched {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                info!("instance not found, it was likely deleted");
                return Ok(Finished::NotFound);
            }
            Err(err) => return Err(self.client_error("failed to retrieve instance", err, tags)),
        };

        let snapshot = instance.status().cloned().unwrap_or_default();
        let deleting = is_being_deleted(&instance);
        let now = self.clock.now();

        if let (Some(spread), false) = (&self.spread, deleting) {
            if let Some(remaining) = spread.should_skip(&instance, now) {
                debug!(
                    minutes_till_next_execution = remaining.as_secs() / 60,
                    "completed reconciliation, no processing needed"
                );
                return Ok(Finished::Skipped(ReconcileOutcome::requeue_after(remaining)));
            }
        }

        self.update_conditions(&mut instance, now, |ledger| ledger.set_unknown_if_absent());

        let phase = if deleting {
            SubroutinePhase::Finalize
        } else {
            SubroutinePhase::Process
        };

        let mut outcome = ReconcileOutcome::done();
        for subroutine in &self.subroutines {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let name = subroutine.name();
            if deleting && !finalizer::is_registered(&instance, &subroutine.finalizers()) {
                debug!(subroutine = name, "no finalizer registered, skipping finalization");
                continue;
            }

            self.update_conditions(&mut instance, now, |ledger| {
                ledger.subroutine_processing(name, phase)
            });

            match self
                .run_subroutine(ctx, &mut instance, subroutine.as_ref(), tags)
                .await
            {
                Ok(result) => {
                    outcome.merge(result);
                    if result.is_done() {
                        self.update_conditions(&mut instance, now, |ledger| {
                            ledger.subroutine_complete(name, phase)
                        });
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    let message = failure_message(&err);
                    self.update_conditions(&mut instance, now, |ledger| {
                        let failed = ledger.subroutine_failed(name, phase, &message);
                        ledger.set_ready_error(&message) || failed
                    });
                    if let Err(persist_err) =
                        self.persist_status(ctx, &snapshot, &mut instance, tags).await
                    {
                        warn!(error = %persist_err, "status not persisted after subroutine failure");
                    }
                    return Err(err);
                }
            }
        }

        if outcome.is_done() {
            if let (Some(spread), false) = (&self.spread, deleting) {
                spread.schedule_next(&mut instance, now);
            }
            self.update_conditions(&mut instance, now, |ledger| {
                ledger.set_ready(ConditionStatus::True)
            });
        } else {
            self.update_conditions(&mut instance, now, |ledger| {
                ledger.set_ready(ConditionStatus::False)
            });
        }

        self.persist_status(ctx, &snapshot, &mut instance, tags).await?;

        if self.spread.is_some() && !deleting && spread::clear_refresh_marker(&mut instance) {
            debug!("removing refresh label");
            if let Err(err) = self.update_metadata(ctx, &mut instance).await {
                return Err(self.client_error("failed to update instance", err, tags));
            }
        }

        info!(
            requeue = outcome.requeue,
            requeue_after_secs = outcome.requeue_after.as_secs(),
            "end reconcile"
        );
        Ok(Finished::Reconciled(outcome))
    }

    /// Apply `update` to the condition list when condition management is on
    fn update_conditions(
        &self,
        instance: &mut K,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut ConditionLedger<'_>) -> bool,
    ) -> bool {
        let Some(access) = &self.conditions else {
            return false;
        };
        let mut ledger = ConditionLedger::new((access.conditions_mut)(instance), now);
        update(&mut ledger)
    }

    /// Write the status back when it differs from `snapshot`
    async fn persist_status(
        &self,
        ctx: &ReconcileContext,
        snapshot: &K::Status,
        instance: &mut K,
        tags: &ReportTags,
    ) -> Result<()> {
        let current = instance.status().cloned().unwrap_or_default();
        if &current == snapshot {
            info!("skipping status update, since they are equal");
            return Ok(());
        }

        info!("updating resource status");
        match self.guarded(ctx, self.store.update_status(instance)).await {
            Ok(updated) => {
                adopt_resource_version(instance, &updated);
                Ok(())
            }
            Err(err)
                if err.is_not_found()
                    && is_being_deleted(instance)
                    && instance.finalizers().is_empty() =>
            {
                debug!("resource removed after its last finalizer was released");
                Ok(())
            }
            Err(err) => Err(self.client_error(
                "cannot update reconciliation conditions, kubernetes client error",
                err,
                tags,
            )),
        }
    }

    /// Write metadata (finalizers, labels) and adopt the new resourceVersion
    async fn update_metadata(&self, ctx: &ReconcileContext, instance: &mut K) -> Result<()> {
        let updated = self.guarded(ctx, self.store.update(instance)).await?;
        adopt_resource_version(instance, &updated);
        Ok(())
    }

    /// Run `fut` unless the reconcile is cancelled first
    async fn guarded<T>(
        &self,
        ctx: &ReconcileContext,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    /// Log and report a store failure at the point it happened
    fn client_error(&self, msg: &str, err: Error, tags: &ReportTags) -> Error {
        if !matches!(err, Error::Cancelled) {
            error!(error = %err, "{}", msg);
        }
        report(self.reporter.as_ref(), &err, tags);
        err
    }
}

fn adopt_resource_version<K: Resource>(instance: &mut K, updated: &K) {
    instance.meta_mut().resource_version = updated.meta().resource_version.clone();
}

/// Message recorded on conditions for a failed step
fn failure_message(err: &Error) -> String {
    match err {
        Error::Subroutine { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
