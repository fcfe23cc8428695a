//! Conflict retries for writes made outside a reconcile
//!
//! The lifecycle manager never retries a store write: a conflict fails the
//! reconcile and the next one starts from a fresh read. Code that writes a
//! resource outside that cycle (webhooks, one-off jobs, tests driving a live
//! cluster) can use [`retry_update`] and [`retry_update_status`] instead. Each
//! attempt re-reads the resource, applies the mutation and writes it back;
//! only 409 conflicts are retried.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use converge_common::Result;

use crate::resource::{LifecycleObject, ResourceId};
use crate::store::ResourceStore;

/// Backoff for conflicting writes
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictRetry {
    /// Attempts before the conflict is returned (at least one is made)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Write {
    Metadata,
    Status,
}

impl Write {
    fn as_str(self) -> &'static str {
        match self {
            Write::Metadata => "update",
            Write::Status => "status update",
        }
    }
}

/// Mutate and write a resource, retrying on conflict
///
/// Returns `None` when the resource no longer exists.
pub async fn retry_update<K, F>(
    store: &dyn ResourceStore<K>,
    id: &ResourceId,
    config: &ConflictRetry,
    mutate: F,
) -> Result<Option<K>>
where
    K: LifecycleObject,
    F: FnMut(&mut K) + Send,
{
    retry_write(store, id, config, mutate, Write::Metadata).await
}

/// Mutate and write a resource's status, retrying on conflict
///
/// Returns `None` when the resource no longer exists.
pub async fn retry_update_status<K, F>(
    store: &dyn ResourceStore<K>,
    id: &ResourceId,
    config: &ConflictRetry,
    mutate: F,
) -> Result<Option<K>>
where
    K: LifecycleObject,
    F: FnMut(&mut K) + Send,
{
    retry_write(store, id, config, mutate, Write::Status).await
}

async fn retry_write<K, F>(
    store: &dyn ResourceStore<K>,
    id: &ResourceId,
    config: &ConflictRetry,
    mut mutate: F,
    write: Write,
) -> Result<Option<K>>
where
    K: LifecycleObject,
    F: FnMut(&mut K) + Send,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let Some(mut instance) = store.get(id).await? else {
            return Ok(None);
        };
        mutate(&mut instance);

        let written = match write {
            Write::Metadata => store.update(&instance).await,
            Write::Status => store.update_status(&instance).await,
        };

        match written {
            Ok(updated) => return Ok(Some(updated)),
            Err(err) if err.is_conflict() && attempt < config.max_attempts => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let wait = delay.mul_f64(jitter);
                warn!(
                    resource = %id,
                    write = write.as_str(),
                    attempt,
                    delay_ms = wait.as_millis(),
                    "write conflicted, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(config.max_delay);
            }
            Err(err) => {
                if err.is_conflict() {
                    error!(
                        resource = %id,
                        write = write.as_str(),
                        attempt,
                        "write still conflicting after max attempts"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use kube::ResourceExt;

    use super::*;
    use crate::store::MockResourceStore;
    use crate::testing::{api_error, test_resource, FakeStore, TestResource};

    fn id() -> ResourceId {
        ResourceId::new("ns", "r")
    }

    fn conflicting_store(conflicts: u32, attempts: usize) -> MockResourceStore<TestResource> {
        let mut store = MockResourceStore::<TestResource>::new();
        store
            .expect_get()
            .times(attempts)
            .returning(|_| Ok(Some(test_resource("ns", "r"))));
        let seen = Arc::new(AtomicU32::new(0));
        store.expect_update().times(attempts).returning(move |instance| {
            if seen.fetch_add(1, Ordering::SeqCst) < conflicts {
                Err(api_error(409, "Conflict"))
            } else {
                Ok(instance.clone())
            }
        });
        store
    }

    #[tokio::test]
    async fn test_status_update_applies_mutation() {
        let store = FakeStore::with(test_resource("ns", "r"));

        let updated = retry_update_status::<TestResource, _>(
            store.as_ref(),
            &id(),
            &ConflictRetry::default(),
            |r: &mut TestResource| r.status_mut().some = Some("written".to_string()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.status.unwrap().some.as_deref(), Some("written"));
        assert_eq!(store.status_updates(), 1);
        assert_eq!(
            store.stored(&id()).unwrap().status.unwrap().some.as_deref(),
            Some("written")
        );
    }

    #[tokio::test]
    async fn test_update_applies_mutation() {
        let store = FakeStore::with(test_resource("ns", "r"));

        let updated = retry_update::<TestResource, _>(
            store.as_ref(),
            &id(),
            &ConflictRetry::default(),
            |r: &mut TestResource| {
                r.labels_mut().insert("team".to_string(), "a".to_string());
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.labels().get("team").map(String::as_str), Some("a"));
        assert_eq!(store.updates(), 1);
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_written() {
        let store = FakeStore::default();

        let result = retry_update::<TestResource, _>(
            &store,
            &id(),
            &ConflictRetry::default(),
            |_: &mut TestResource| {},
        )
        .await
        .unwrap();

        assert!(result.is_none());
        assert_eq!(store.updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_reread_and_retry() {
        let store = conflicting_store(2, 3);
        let mut mutations = 0;

        let result = retry_update::<TestResource, _>(
            &store,
            &id(),
            &ConflictRetry::default(),
            |_: &mut TestResource| mutations += 1,
        )
        .await
        .unwrap();

        assert!(result.is_some());
        assert_eq!(mutations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_returned_after_max_attempts() {
        let store = conflicting_store(u32::MAX, 3);
        let config = ConflictRetry {
            max_attempts: 3,
            ..Default::default()
        };

        let err = retry_update::<TestResource, _>(&store, &id(), &config, |_: &mut TestResource| {})
            .await
            .unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let mut store = MockResourceStore::<TestResource>::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Ok(Some(test_resource("ns", "r"))));
        store
            .expect_update_status()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError")));

        let err = retry_update_status::<TestResource, _>(
            &store,
            &id(),
            &ConflictRetry::default(),
            |_: &mut TestResource| {},
        )
        .await
        .unwrap_err();

        assert!(!err.is_conflict());
    }
}
