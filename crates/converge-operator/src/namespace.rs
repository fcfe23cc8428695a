//! Namespace subroutine
//!
//! Creates the namespace a workspace asks for and deletes it again when the
//! workspace goes away. Namespace deletion is asynchronous, so finalization
//! requeues until the API server reports the namespace gone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, info};

use converge_common::OperatorError;
use converge_lifecycle::{LifecycleObject, ReconcileContext, ReconcileOutcome, Subroutine};

use crate::crd::Workspace;

/// Field manager for server-side apply
const FIELD_MANAGER: &str = "converge-operator";

/// Finalizer owned by the namespace subroutine
pub const NAMESPACE_FINALIZER: &str = "converge.dev/namespace";

/// Label pointing from a namespace back to its workspace (`<ns>.<name>`)
pub const WORKSPACE_LABEL: &str = "converge.dev/workspace";

/// Poll interval while a namespace is terminating
const TERMINATING_REQUEUE: Duration = Duration::from_secs(5);

/// Namespace operations the subroutine needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceClient: Send + Sync {
    /// Create or update a namespace with the given labels
    async fn apply(&self, name: &str, labels: &BTreeMap<String, String>)
        -> Result<(), kube::Error>;

    /// Request deletion; returns true once the namespace no longer exists
    async fn delete(&self, name: &str) -> Result<bool, kube::Error>;
}

/// [`NamespaceClient`] backed by the Kubernetes API
pub struct KubeNamespaceClient {
    api: Api<Namespace>,
}

impl KubeNamespaceClient {
    /// Create a client for cluster-scoped namespaces
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceClient for KubeNamespaceClient {
    async fn apply(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error> {
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": labels },
        });
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api.patch(name, &params, &Patch::Apply(&namespace)).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, kube::Error> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(either) => Ok(either.is_right()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Provisions the namespace named in a workspace spec
pub struct NamespaceSubroutine {
    client: Arc<dyn NamespaceClient>,
}

impl NamespaceSubroutine {
    /// Create the subroutine
    pub fn new(client: Arc<dyn NamespaceClient>) -> Self {
        Self { client }
    }
}

fn workspace_labels(workspace: &Workspace) -> BTreeMap<String, String> {
    let mut labels = workspace.spec.labels.clone();
    labels.insert(
        WORKSPACE_LABEL.to_string(),
        format!(
            "{}.{}",
            workspace.namespace().unwrap_or_default(),
            workspace.name_any()
        ),
    );
    labels
}

#[async_trait]
impl Subroutine<Workspace> for NamespaceSubroutine {
    fn name(&self) -> &str {
        "namespace"
    }

    fn finalizers(&self) -> Vec<String> {
        vec![NAMESPACE_FINALIZER.to_string()]
    }

    async fn process(
        &self,
        _ctx: &ReconcileContext,
        workspace: &mut Workspace,
    ) -> Result<ReconcileOutcome, OperatorError> {
        let target = workspace.spec.namespace.trim().to_string();
        if target.is_empty() {
            return Err(OperatorError::permanent("spec.namespace must not be empty"));
        }

        self.client
            .apply(&target, &workspace_labels(workspace))
            .await
            .map_err(OperatorError::retryable)?;
        debug!(namespace = %target, "namespace applied");

        workspace.status_mut().namespace = Some(target);
        Ok(ReconcileOutcome::done())
    }

    async fn finalize(
        &self,
        _ctx: &ReconcileContext,
        workspace: &mut Workspace,
    ) -> Result<ReconcileOutcome, OperatorError> {
        let Some(target) = workspace
            .status
            .as_ref()
            .and_then(|s| s.namespace.clone())
        else {
            return Ok(ReconcileOutcome::done());
        };

        let gone = self
            .client
            .delete(&target)
            .await
            .map_err(OperatorError::retryable)?;
        if gone {
            info!(namespace = %target, "namespace deleted");
            Ok(ReconcileOutcome::done())
        } else {
            debug!(namespace = %target, "namespace still terminating");
            Ok(ReconcileOutcome::requeue_after(TERMINATING_REQUEUE))
        }
    }
}
