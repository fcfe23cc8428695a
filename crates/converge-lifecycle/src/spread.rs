//! Reconcile spreading
//!
//! Once a generation has been reconciled, further reconciles are pushed out
//! by a random 12-24h delay so that a large population of resources does not
//! converge on the same schedule. A `converge.dev/refresh-reconcile` label forces the
//! next reconcile through regardless.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use converge_common::REFRESH_RECONCILE_LABEL;

use crate::resource::{generation, LifecycleObject, SpreadReconcileStatus};

/// Lower bound of the spread window
pub const MIN_SPREAD: Duration = Duration::from_secs(12 * 60 * 60);
/// Width of the spread window in minutes
const SPREAD_WINDOW_MINUTES: u64 = 12 * 60;

/// Accessors captured from [`SpreadReconcileStatus`] when the scheduler is built
struct SpreadAccess<K> {
    observed_generation: fn(&K) -> Option<i64>,
    set_observed_generation: fn(&mut K, i64),
    next_reconcile_time: fn(&K) -> Option<DateTime<Utc>>,
    set_next_reconcile_time: fn(&mut K, DateTime<Utc>),
}

/// Decides when a resource may skip a reconcile and when it is due next
pub struct SpreadScheduler<K> {
    access: SpreadAccess<K>,
    rng: Mutex<StdRng>,
}

impl<K: SpreadReconcileStatus> SpreadScheduler<K> {
    /// Scheduler drawing jitter from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Scheduler with a deterministic jitter sequence
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            access: SpreadAccess {
                observed_generation: K::observed_generation,
                set_observed_generation: K::set_observed_generation,
                next_reconcile_time: K::next_reconcile_time,
                set_next_reconcile_time: K::set_next_reconcile_time,
            },
            rng: Mutex::new(rng),
        }
    }
}

impl<K: SpreadReconcileStatus> Default for SpreadScheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: LifecycleObject> SpreadScheduler<K> {
    /// Remaining time until the resource is due, when it may be skipped now
    ///
    /// A refresh label always forces a reconcile. Otherwise the resource is
    /// skipped when its current generation was already observed or its
    /// stored next-reconcile time lies in the future. The returned delay is
    /// the time left until the stored next-reconcile time, zero when that
    /// time has passed or was never set.
    pub fn should_skip(&self, instance: &K, now: DateTime<Utc>) -> Option<Duration> {
        if has_refresh_marker(instance) {
            return None;
        }

        let next = (self.access.next_reconcile_time)(instance);
        let generation_observed =
            (self.access.observed_generation)(instance) == Some(generation(instance));
        let window_open = next.is_some_and(|next| now < next);
        if !generation_observed && !window_open {
            return None;
        }

        let remaining = next
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        Some(remaining)
    }

    /// True when the resource must be reconciled now
    pub fn is_eligible(&self, instance: &K, now: DateTime<Utc>) -> bool {
        self.should_skip(instance, now).is_none()
    }

    /// Draw a delay uniformly from `[12h, 24h)` at minute granularity
    pub fn next_delay(&self) -> Duration {
        let minutes = self.rng.lock().gen_range(0..SPREAD_WINDOW_MINUTES);
        MIN_SPREAD + Duration::from_secs(minutes * 60)
    }

    /// Record a successful reconcile: next due time and observed generation
    ///
    /// Returns the delay that was drawn.
    pub fn schedule_next(&self, instance: &mut K, now: DateTime<Utc>) -> Duration {
        let delay = self.next_delay();
        let next = chrono::Duration::from_std(delay)
            .map(|d| now + d)
            .unwrap_or(now);
        (self.access.set_next_reconcile_time)(instance, next);
        debug!(
            minutes_till_next_execution = delay.as_secs() / 60,
            "setting next reconcile time"
        );

        let current = generation(instance);
        debug!(
            observed_generation = ?(self.access.observed_generation)(instance),
            generation = current,
            "updating observed generation"
        );
        (self.access.set_observed_generation)(instance, current);
        delay
    }
}

/// True when the resource carries the refresh-reconcile label
pub fn has_refresh_marker<K: Resource>(instance: &K) -> bool {
    instance.labels().contains_key(REFRESH_RECONCILE_LABEL)
}

/// Drop the refresh-reconcile label; returns whether it was present
pub fn clear_refresh_marker<K: Resource>(instance: &mut K) -> bool {
    instance.labels_mut().remove(REFRESH_RECONCILE_LABEL).is_some()
}
