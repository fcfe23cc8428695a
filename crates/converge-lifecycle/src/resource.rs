//! Capabilities a resource type offers to the lifecycle manager
//!
//! Features of the manager are unlocked per resource type at compile time:
//! `with_condition_management` needs [`HasConditions`], and
//! `with_spread_reconciles` needs [`SpreadReconcileStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use converge_common::crd::Condition;

/// A namespaced resource whose status block the lifecycle manager owns
///
/// The manager mutates finalizers, labels and the status block; it never
/// touches `.spec`.
pub trait LifecycleObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Status block type; compared structurally to decide whether to persist
    type Status: Clone + fmt::Debug + Default + PartialEq + Serialize + Send + Sync;

    /// Current status, if one has been written
    fn status(&self) -> Option<&Self::Status>;

    /// Mutable status, created with defaults when absent
    fn status_mut(&mut self) -> &mut Self::Status;
}

/// Resources that carry a list of conditions in their status
pub trait HasConditions: LifecycleObject {
    /// Conditions currently recorded
    fn conditions(&self) -> &[Condition];

    /// Mutable access to the condition list
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Resources that record when they were last fully reconciled
pub trait SpreadReconcileStatus: LifecycleObject {
    /// Generation recorded by the last successful reconcile
    fn observed_generation(&self) -> Option<i64>;

    /// Record the generation that was just reconciled
    fn set_observed_generation(&mut self, generation: i64);

    /// Earliest time a routine reconcile should run again
    fn next_reconcile_time(&self) -> Option<DateTime<Utc>>;

    /// Store the earliest time a routine reconcile should run again
    fn set_next_reconcile_time(&mut self, time: DateTime<Utc>);
}

/// Stable identity of a namespaced resource
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
}

impl ResourceId {
    /// Create an identity from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an existing resource object
    pub fn of<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// True when the resource carries a deletion timestamp
pub fn is_being_deleted<K: Resource>(resource: &K) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// Current spec generation (0 when the store has not assigned one)
pub fn generation<K: Resource>(resource: &K) -> i64 {
    resource.meta().generation.unwrap_or(0)
}
