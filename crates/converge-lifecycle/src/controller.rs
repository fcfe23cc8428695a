//! Wiring a [`LifecycleManager`] into `kube::runtime::Controller`

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::{self, Action};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use converge_common::config::OperatorConfig;
use converge_common::{Error, Result, DEBUG_LABEL};

use crate::manager::LifecycleManager;
use crate::resource::{LifecycleObject, ResourceId};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Shared state handed to every reconcile of one controller
pub struct ControllerContext<K: LifecycleObject> {
    /// The manager doing the work
    pub manager: Arc<LifecycleManager<K>>,
    /// Delay before a retryable failure is reconciled again
    pub error_requeue: Duration,
    /// Cancelled when the operator shuts down
    pub cancel: CancellationToken,
}

impl<K: LifecycleObject> ControllerContext<K> {
    /// Create a context
    pub fn new(
        manager: Arc<LifecycleManager<K>>,
        error_requeue: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            error_requeue,
            cancel,
        }
    }
}

/// Reconcile entry point for `Controller::run`
pub async fn reconcile<K: LifecycleObject>(
    object: Arc<K>,
    ctx: Arc<ControllerContext<K>>,
) -> Result<Action> {
    let id = ResourceId::of(object.as_ref());
    let outcome = ctx.manager.reconcile(&id, &ctx.cancel).await?;
    Ok(outcome.into_action())
}

/// Requeue retryable failures after a fixed delay; wait for a change otherwise
pub fn error_policy<K: LifecycleObject>(
    object: Arc<K>,
    error: &Error,
    ctx: Arc<ControllerContext<K>>,
) -> Action {
    if error.is_retryable() {
        warn!(
            error = %error,
            namespace = %object.namespace().unwrap_or_default(),
            name = %object.name_any(),
            "reconciliation failed, retrying"
        );
        Action::requeue(ctx.error_requeue)
    } else {
        error!(
            error = %error,
            namespace = %object.namespace().unwrap_or_default(),
            name = %object.name_any(),
            "reconciliation failed permanently, waiting for a change"
        );
        Action::await_change()
    }
}

/// Label selector implementing the debug-resource filter
///
/// With a value, only resources labelled `converge.dev/debug=<value>` are
/// watched. Without one, resources carrying the label at all are left to a
/// debug instance of the controller.
pub fn debug_label_selector(debug_label_value: &str) -> String {
    if debug_label_value.is_empty() {
        format!("!{DEBUG_LABEL}")
    } else {
        format!("{DEBUG_LABEL}={debug_label_value}")
    }
}

/// Watcher configuration for a controller with the given debug label value
pub fn watcher_config(debug_label_value: &str) -> WatcherConfig {
    WatcherConfig::default()
        .labels(&debug_label_selector(debug_label_value))
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Run a controller for `api` until shutdown
///
/// Stops on SIGTERM/SIGINT or when `cancel` fires; cancellation also aborts
/// reconciles that are still in flight.
pub async fn run_controller<K: LifecycleObject>(
    api: Api<K>,
    manager: Arc<LifecycleManager<K>>,
    config: &OperatorConfig,
    cancel: CancellationToken,
) {
    let controller_name = manager.controller().to_string();
    info!(
        controller = %controller_name,
        concurrency = config.max_concurrent_reconciles,
        debug_label_value = %config.debug_label_value,
        "starting controller"
    );

    let ctx = Arc::new(ControllerContext::new(
        manager,
        config.error_requeue(),
        cancel.clone(),
    ));

    Controller::new(api, watcher_config(&config.debug_label_value))
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .take_until(cancel.cancelled_owned())
        .for_each(|result| {
            match result {
                Ok((object, action)) => debug!(
                    controller = %controller_name,
                    object = %object,
                    ?action,
                    "reconciliation completed"
                ),
                Err(e) => debug!(controller = %controller_name, error = %e, "controller error"),
            }
            std::future::ready(())
        })
        .await;

    info!(controller = %controller_name, "controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStore;
    use crate::subroutine::ReconcileOutcome;
    use crate::testing::{test_resource, FakeStore, TestResource, TestSubroutine};
    use converge_common::OperatorError;

    fn context(
        store: Arc<FakeStore>,
        subroutine: TestSubroutine,
    ) -> Arc<ControllerContext<TestResource>> {
        let store: Arc<dyn ResourceStore<TestResource>> = store;
        let manager = LifecycleManager::builder("op", "ctrl", store)
            .subroutine(subroutine)
            .build()
            .unwrap();
        Arc::new(ControllerContext::new(
            Arc::new(manager),
            Duration::from_secs(7),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn test_debug_label_selector() {
        assert_eq!(debug_label_selector(""), "!converge.dev/debug");
        assert_eq!(debug_label_selector("alice"), "converge.dev/debug=alice");
    }

    #[test]
    fn test_watcher_config_applies_selector_and_timeout() {
        let config = watcher_config("alice");
        assert_eq!(config.label_selector.as_deref(), Some("converge.dev/debug=alice"));
        assert_eq!(config.timeout, Some(WATCH_TIMEOUT_SECS));
    }

    #[tokio::test]
    async fn test_reconcile_maps_outcome_to_action() {
        let resource = test_resource("ns", "r");
        let store = FakeStore::with(resource.clone());
        let ctx = context(
            store,
            TestSubroutine::new("dns")
                .on_process(|_| Ok(ReconcileOutcome::requeue_after(Duration::from_secs(10)))),
        );

        let action = reconcile(Arc::new(resource), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_reconcile_done_awaits_change() {
        let resource = test_resource("ns", "r");
        let store = FakeStore::with(resource.clone());
        let ctx = context(store, TestSubroutine::new("dns"));

        let action = reconcile(Arc::new(resource), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn test_error_policy_follows_retry_classification() {
        let store = Arc::new(FakeStore::default());
        let ctx = context(store, TestSubroutine::new("dns"));
        let object = Arc::new(test_resource("ns", "r"));

        let retryable = Error::subroutine("dns", OperatorError::retryable("zone busy"));
        assert_eq!(
            error_policy(object.clone(), &retryable, ctx.clone()),
            Action::requeue(Duration::from_secs(7))
        );

        let permanent = Error::subroutine("dns", OperatorError::permanent("bad zone"));
        assert_eq!(
            error_policy(object.clone(), &permanent, ctx.clone()),
            Action::await_change()
        );

        assert_eq!(error_policy(object, &Error::Cancelled, ctx), Action::await_change());
    }
}
