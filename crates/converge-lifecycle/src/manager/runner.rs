use tracing::{debug, error, info_span, Instrument};

use converge_common::{Error, OperatorError, Result};

use crate::finalizer;
use crate::metrics::record_subroutine_error;
use crate::report::{report, ReportTags};
use crate::resource::{is_being_deleted, LifecycleObject};
use crate::subroutine::{ReconcileContext, ReconcileOutcome, Subroutine};

use super::LifecycleManager;

impl<K: LifecycleObject> LifecycleManager<K> {
    /// Run one subroutine's process or finalize step
    ///
    /// While the resource is being deleted the finalize step runs and the
    /// subroutine's finalizers are released once it is idle. Otherwise the
    /// finalizers are registered first and the process step runs. Failures
    /// are reported here, once, and returned to the caller.
    pub(super) async fn run_subroutine(
        &self,
        ctx: &ReconcileContext,
        instance: &mut K,
        subroutine: &dyn Subroutine<K>,
        tags: &ReportTags,
    ) -> Result<ReconcileOutcome> {
        let name = subroutine.name();
        let span = info_span!("subroutine", subroutine = name);

        async move {
            debug!("start subroutine");
            let tokens = subroutine.finalizers();

            let result = if is_being_deleted(instance) {
                let result = self.invoke(ctx, subroutine.finalize(ctx, instance)).await?;
                if finalizer::release_if_idle(instance, &tokens, &result) {
                    debug!("releasing finalizers");
                    self.persist_finalizers(ctx, instance, tags).await?;
                }
                result
            } else {
                if finalizer::ensure_registered(instance, &tokens) {
                    debug!("registering finalizers");
                    self.persist_finalizers(ctx, instance, tags).await?;
                }
                self.invoke(ctx, subroutine.process(ctx, instance)).await?
            };

            match result {
                Ok(outcome) => {
                    debug!(
                        requeue = outcome.requeue,
                        requeue_after_secs = outcome.requeue_after.as_secs(),
                        "end subroutine"
                    );
                    Ok(outcome)
                }
                Err(op) => {
                    record_subroutine_error(&self.controller, name, op.retry());
                    error!(
                        error = %op,
                        retry = op.retry(),
                        "subroutine ended with error"
                    );
                    let err = Error::subroutine(name, op);
                    report(self.reporter.as_ref(), &err, tags);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Await a subroutine step unless the reconcile is cancelled first
    async fn invoke(
        &self,
        ctx: &ReconcileContext,
        step: impl std::future::Future<Output = std::result::Result<ReconcileOutcome, OperatorError>>,
    ) -> Result<std::result::Result<ReconcileOutcome, OperatorError>> {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = step => Ok(result),
        }
    }

    async fn persist_finalizers(
        &self,
        ctx: &ReconcileContext,
        instance: &mut K,
        tags: &ReportTags,
    ) -> Result<()> {
        self.update_metadata(ctx, instance)
            .await
            .map_err(|err| self.client_error("failed to update instance", err, tags))
    }
}
