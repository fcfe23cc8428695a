//! Resource store abstraction
//!
//! The manager only needs three calls from the cluster: load an object,
//! write its metadata (finalizers, labels) and write its status. The trait
//! lets tests replace the API server with an in-memory store or a mock.

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use converge_common::Result;

use crate::resource::{LifecycleObject, ResourceId};

/// Load and persist resources of one kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore<K: LifecycleObject>: Send + Sync {
    /// Fetch a resource; `None` when it does not exist
    async fn get(&self, id: &ResourceId) -> Result<Option<K>>;

    /// Write metadata (finalizers, labels) and return the stored object
    async fn update(&self, instance: &K) -> Result<K>;

    /// Write the status block and return the stored object
    async fn update_status(&self, instance: &K) -> Result<K>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: LifecycleObject> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K: LifecycleObject> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, id: &ResourceId) -> Result<Option<K>> {
        Ok(self.api(&id.namespace).get_opt(&id.name).await?)
    }

    async fn update(&self, instance: &K) -> Result<K> {
        let id = ResourceId::of(instance);
        let updated = self
            .api(&id.namespace)
            .replace(&id.name, &PostParams::default(), instance)
            .await?;
        Ok(updated)
    }

    async fn update_status(&self, instance: &K) -> Result<K> {
        let id = ResourceId::of(instance);
        // resourceVersion makes the API server reject stale writes with 409
        let patch = json!({
            "metadata": { "resourceVersion": instance.resource_version() },
            "status": instance.status(),
        });
        let updated = self
            .api(&id.namespace)
            .patch_status(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }
}
