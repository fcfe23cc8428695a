//! Workspace operator
//!
//! A `Workspace` provisions one namespace per team. The namespace is owned
//! through a finalizer, so deleting the workspace deletes the namespace.

#![deny(missing_docs)]

pub mod crd;
pub mod namespace;

use std::sync::Arc;

use kube::Client;

use converge_common::Result;
use converge_lifecycle::{KubeStore, LifecycleManager, ResourceStore};

use crate::crd::Workspace;
use crate::namespace::{KubeNamespaceClient, NamespaceSubroutine};

/// Controller name used in logs, metrics and reports
pub const CONTROLLER_NAME: &str = "workspace";

/// Build the workspace lifecycle manager
pub fn workspace_manager(client: Client, operator: &str) -> Result<LifecycleManager<Workspace>> {
    let store: Arc<dyn ResourceStore<Workspace>> = Arc::new(KubeStore::new(client.clone()));
    LifecycleManager::builder(operator, CONTROLLER_NAME, store)
        .subroutine(NamespaceSubroutine::new(Arc::new(KubeNamespaceClient::new(
            client,
        ))))
        .with_condition_management()
        .with_spread_reconciles()
        .build()
}
