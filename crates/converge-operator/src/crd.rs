//! Workspace custom resource

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use converge_common::crd::Condition;
use converge_lifecycle::{HasConditions, LifecycleObject, SpreadReconcileStatus};

/// A namespace provisioned and owned on behalf of a team
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "ws",
    namespaced,
    status = "WorkspaceStatus",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Namespace to create
    pub namespace: String,

    /// Extra labels applied to the namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Workspace status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// Namespace that was provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Lifecycle conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation observed by the last successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Earliest time of the next routine reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reconcile_time: Option<DateTime<Utc>>,
}

impl LifecycleObject for Workspace {
    type Status = WorkspaceStatus;

    fn status(&self) -> Option<&WorkspaceStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut WorkspaceStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl HasConditions for Workspace {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}

impl SpreadReconcileStatus for Workspace {
    fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.status_mut().observed_generation = Some(generation);
    }

    fn next_reconcile_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.next_reconcile_time)
    }

    fn set_next_reconcile_time(&mut self, time: DateTime<Utc>) {
        self.status_mut().next_reconcile_time = Some(time);
    }
}
