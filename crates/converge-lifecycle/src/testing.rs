//! Test fixtures: a custom resource implementing every capability, an
//! in-memory store and scriptable subroutines.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{CustomResource, Resource, ResourceExt};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use converge_common::crd::Condition;
use converge_common::{Error, OperatorError, Result};

use crate::clock::Clock;
use crate::resource::{
    is_being_deleted, HasConditions, LifecycleObject, ResourceId, SpreadReconcileStatus,
};
use crate::store::ResourceStore;
use crate::subroutine::{ReconcileContext, ReconcileOutcome, Subroutine};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "test.converge.dev",
    version = "v1alpha1",
    kind = "TestResource",
    namespaced,
    status = "TestResourceStatus"
)]
pub struct TestResourceSpec {
    pub replicas: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub some: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reconcile_time: Option<DateTime<Utc>>,
}

impl LifecycleObject for TestResource {
    type Status = TestResourceStatus;

    fn status(&self) -> Option<&TestResourceStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut TestResourceStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl HasConditions for TestResource {
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

impl SpreadReconcileStatus for TestResource {
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

/// A bare resource with no finalizers, labels or status
pub fn test_resource(namespace: &str, name: &str) -> TestResource {
    let mut resource = TestResource::new(name, TestResourceSpec { replicas: 1 });
    resource.metadata.namespace = Some(namespace.to_string());
    resource
}

/// Mark a resource as deleted
pub fn mark_deleted(resource: &mut TestResource, at: DateTime<Utc>) {
    resource.metadata.deletion_timestamp =
        Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(at));
}

/// Build a kube API error with the given HTTP status code
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} from fake store"),
        reason: reason.to_string(),
        code,
    }))
}

/// Clock frozen at one instant
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct FakeStoreState {
    objects: BTreeMap<ResourceId, TestResource>,
    revision: u64,
    get_error: Option<u16>,
    update_error: Option<u16>,
    status_error: Option<u16>,
}

/// In-memory store that behaves like the API server for the calls the
/// manager makes
///
/// Writes are checked against `resourceVersion`; a resource being deleted is
/// removed once its last finalizer is gone.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeStoreState>,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
}

impl FakeStore {
    pub fn with(resource: TestResource) -> Arc<Self> {
        let store = Arc::new(Self::default());
        store.insert(resource);
        store
    }

    pub fn insert(&self, mut resource: TestResource) {
        let mut state = self.state.lock();
        state.revision += 1;
        resource.metadata.resource_version = Some(state.revision.to_string());
        state.objects.insert(ResourceId::of(&resource), resource);
    }

    pub fn stored(&self, id: &ResourceId) -> Option<TestResource> {
        self.state.lock().objects.get(id).cloned()
    }

    pub fn fail_get(&self, code: u16) {
        self.state.lock().get_error = Some(code);
    }

    pub fn fail_update(&self, code: u16) {
        self.state.lock().update_error = Some(code);
    }

    pub fn fail_status(&self, code: u16) {
        self.state.lock().status_error = Some(code);
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }
}

fn check_version(stored: &TestResource, incoming: &TestResource) -> Result<()> {
    if stored.resource_version() != incoming.resource_version() {
        return Err(api_error(409, "Conflict"));
    }
    Ok(())
}

#[async_trait]
impl ResourceStore<TestResource> for FakeStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<TestResource>> {
        let state = self.state.lock();
        if let Some(code) = state.get_error {
            return Err(api_error(code, "InternalError"));
        }
        Ok(state.objects.get(id).cloned())
    }

    async fn update(&self, instance: &TestResource) -> Result<TestResource> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(code) = state.update_error {
            return Err(api_error(code, "InternalError"));
        }
        let id = ResourceId::of(instance);
        let stored = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))?;
        check_version(&stored, instance)?;

        state.revision += 1;
        let mut updated = stored;
        updated.metadata.finalizers = instance.metadata.finalizers.clone();
        updated.metadata.labels = instance.metadata.labels.clone();
        updated.metadata.resource_version = Some(state.revision.to_string());

        if is_being_deleted(&updated) && updated.finalizers().is_empty() {
            state.objects.remove(&id);
        } else {
            state.objects.insert(id, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, instance: &TestResource) -> Result<TestResource> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(code) = state.status_error {
            return Err(api_error(code, "InternalError"));
        }
        let id = ResourceId::of(instance);
        let stored = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))?;
        check_version(&stored, instance)?;

        state.revision += 1;
        let mut updated = stored;
        updated.status = instance.status.clone();
        updated.meta_mut().resource_version = Some(state.revision.to_string());
        state.objects.insert(id, updated.clone());
        Ok(updated)
    }
}

type Step = Box<dyn Fn(&mut TestResource) -> std::result::Result<ReconcileOutcome, OperatorError> + Send + Sync>;

/// Subroutine whose process and finalize steps are closures
pub struct TestSubroutine {
    name: String,
    finalizers: Vec<String>,
    process: Step,
    finalize: Step,
    process_calls: Arc<AtomicUsize>,
    finalize_calls: Arc<AtomicUsize>,
}

impl TestSubroutine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            finalizers: Vec::new(),
            process: Box::new(|_| Ok(ReconcileOutcome::done())),
            finalize: Box::new(|_| Ok(ReconcileOutcome::done())),
            process_calls: Arc::default(),
            finalize_calls: Arc::default(),
        }
    }

    pub fn finalizer(mut self, token: &str) -> Self {
        self.finalizers.push(token.to_string());
        self
    }

    pub fn on_process(
        mut self,
        step: impl Fn(&mut TestResource) -> std::result::Result<ReconcileOutcome, OperatorError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.process = Box::new(step);
        self
    }

    pub fn on_finalize(
        mut self,
        step: impl Fn(&mut TestResource) -> std::result::Result<ReconcileOutcome, OperatorError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.finalize = Box::new(step);
        self
    }

    pub fn process_calls(&self) -> Arc<AtomicUsize> {
        self.process_calls.clone()
    }

    pub fn finalize_calls(&self) -> Arc<AtomicUsize> {
        self.finalize_calls.clone()
    }
}

#[async_trait]
impl Subroutine<TestResource> for TestSubroutine {
    fn name(&self) -> &str {
        &self.name
    }

    fn finalizers(&self) -> Vec<String> {
        self.finalizers.clone()
    }

    async fn process(
        &self,
        _ctx: &ReconcileContext,
        instance: &mut TestResource,
    ) -> std::result::Result<ReconcileOutcome, OperatorError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        (self.process)(instance)
    }

    async fn finalize(
        &self,
        _ctx: &ReconcileContext,
        instance: &mut TestResource,
    ) -> std::result::Result<ReconcileOutcome, OperatorError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        (self.finalize)(instance)
    }
}
