use std::collections::HashSet;
use std::sync::Arc;

use converge_common::{Error, Result};

use crate::clock::{Clock, SystemClock};
use crate::report::{ErrorReporter, TracingReporter};
use crate::resource::{HasConditions, LifecycleObject, SpreadReconcileStatus};
use crate::spread::SpreadScheduler;
use crate::store::ResourceStore;
use crate::subroutine::Subroutine;

use super::{ConditionAccess, LifecycleManager};

/// Configures a [`LifecycleManager`]
///
/// Feature toggles are only offered for resource types that support them,
/// and `build` consumes the builder so nothing can change afterwards.
pub struct LifecycleManagerBuilder<K: LifecycleObject> {
    operator: String,
    controller: String,
    store: Arc<dyn ResourceStore<K>>,
    subroutines: Vec<Arc<dyn Subroutine<K>>>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    conditions: Option<ConditionAccess<K>>,
    spread: Option<SpreadScheduler<K>>,
}

impl<K: LifecycleObject> LifecycleManagerBuilder<K> {
    /// Start configuring a manager for one controller of one operator
    pub fn new(
        operator: impl Into<String>,
        controller: impl Into<String>,
        store: Arc<dyn ResourceStore<K>>,
    ) -> Self {
        Self {
            operator: operator.into(),
            controller: controller.into(),
            store,
            subroutines: Vec::new(),
            reporter: Arc::new(TracingReporter),
            clock: Arc::new(SystemClock),
            conditions: None,
            spread: None,
        }
    }

    /// Append a subroutine; subroutines run in registration order
    pub fn subroutine(mut self, subroutine: impl Subroutine<K> + 'static) -> Self {
        self.subroutines.push(Arc::new(subroutine));
        self
    }

    /// Append several shared subroutines
    pub fn subroutines(
        mut self,
        subroutines: impl IntoIterator<Item = Arc<dyn Subroutine<K>>>,
    ) -> Self {
        self.subroutines.extend(subroutines);
        self
    }

    /// Replace the default [`TracingReporter`]
    pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Replace the system clock
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the configuration and build the manager
    pub fn build(self) -> Result<LifecycleManager<K>> {
        if self.operator.trim().is_empty() {
            return Err(Error::configuration("operator name must not be empty"));
        }
        if self.controller.trim().is_empty() {
            return Err(Error::configuration("controller name must not be empty"));
        }

        let mut names = HashSet::new();
        for subroutine in &self.subroutines {
            let name = subroutine.name();
            if name.trim().is_empty() {
                return Err(Error::configuration("subroutine name must not be empty"));
            }
            if !names.insert(name.to_string()) {
                return Err(Error::configuration(format!(
                    "duplicate subroutine name: {name}"
                )));
            }
            if subroutine.finalizers().iter().any(|f| f.trim().is_empty()) {
                return Err(Error::configuration(format!(
                    "subroutine {name} declares an empty finalizer"
                )));
            }
        }

        Ok(LifecycleManager {
            operator: self.operator,
            controller: self.controller,
            store: self.store,
            subroutines: self.subroutines,
            reporter: self.reporter,
            clock: self.clock,
            conditions: self.conditions,
            spread: self.spread,
        })
    }
}

impl<K: HasConditions> LifecycleManagerBuilder<K> {
    /// Maintain `Ready` and per-subroutine conditions on the resource
    pub fn with_condition_management(mut self) -> Self {
        self.conditions = Some(ConditionAccess {
            conditions_mut: K::conditions_mut,
        });
        self
    }
}

impl<K: SpreadReconcileStatus> LifecycleManagerBuilder<K> {
    /// Spread routine reconciles over a 12-24h window
    pub fn with_spread_reconciles(self) -> Self {
        self.with_spread_scheduler(SpreadScheduler::new())
    }

    /// Spread reconciles using the given scheduler
    pub fn with_spread_scheduler(mut self, scheduler: SpreadScheduler<K>) -> Self {
        self.spread = Some(scheduler);
        self
    }
}
