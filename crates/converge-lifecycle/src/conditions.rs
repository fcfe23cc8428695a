//! Condition ledger
//!
//! Upsert-by-type over a `Vec<Condition>`. A condition's
//! `last_transition_time` only moves when its status changes; reason and
//! message edits keep the original timestamp. Every mutator reports whether
//! the list changed so callers can avoid redundant status writes.

use chrono::{DateTime, Utc};

use converge_common::crd::{Condition, ConditionStatus, CONDITION_READY};

use crate::subroutine::SubroutinePhase;

/// Reason recorded for converged conditions
pub const REASON_COMPLETE: &str = "Complete";
/// Reason recorded while work is still pending
pub const REASON_PROCESSING: &str = "Processing";
/// Reason recorded when a step failed
pub const REASON_ERROR: &str = "Error";

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Upsert `condition` by type, returning whether anything changed
///
/// The incoming `last_transition_time` is only used when the status
/// changes or the type is new.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    let mut changed = false;
    if existing.status != condition.status {
        existing.status = condition.status;
        existing.last_transition_time = condition.last_transition_time;
        changed = true;
    }
    if existing.reason != condition.reason {
        existing.reason = condition.reason;
        changed = true;
    }
    if existing.message != condition.message {
        existing.message = condition.message;
        changed = true;
    }
    changed
}

/// Condition type used for a subroutine in the given phase (`dns_Ready`)
pub fn subroutine_condition_type(subroutine: &str, phase: SubroutinePhase) -> String {
    format!("{}_{}", subroutine, phase.condition_suffix())
}

fn ready_message(status: ConditionStatus) -> &'static str {
    match status {
        ConditionStatus::True => "The resource is ready",
        ConditionStatus::False => "The resource is not ready",
        ConditionStatus::Unknown => "The resource is processing",
    }
}

fn ready_reason(status: ConditionStatus) -> &'static str {
    match status {
        ConditionStatus::True => REASON_COMPLETE,
        ConditionStatus::False | ConditionStatus::Unknown => REASON_PROCESSING,
    }
}

/// Mutable view over one resource's conditions, stamped with a single `now`
pub struct ConditionLedger<'a> {
    conditions: &'a mut Vec<Condition>,
    now: DateTime<Utc>,
}

impl<'a> ConditionLedger<'a> {
    /// Wrap a condition list; `now` is used for any transition recorded
    pub fn new(conditions: &'a mut Vec<Condition>, now: DateTime<Utc>) -> Self {
        Self { conditions, now }
    }

    /// Set the aggregate `Ready` condition
    pub fn set_ready(&mut self, status: ConditionStatus) -> bool {
        let condition = Condition::at(
            CONDITION_READY,
            status,
            ready_reason(status),
            ready_message(status),
            self.now,
        );
        set_condition(self.conditions, condition)
    }

    /// Mark `Ready` False because a step failed
    pub fn set_ready_error(&mut self, message: &str) -> bool {
        let condition = Condition::at(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_ERROR,
            format!("The resource has an error: {}", message),
            self.now,
        );
        set_condition(self.conditions, condition)
    }

    /// Seed `Ready` as Unknown; never overwrites an existing `Ready`
    pub fn set_unknown_if_absent(&mut self) -> bool {
        if find_condition(self.conditions, CONDITION_READY).is_some() {
            return false;
        }
        self.set_ready(ConditionStatus::Unknown)
    }

    /// Upsert the `<name>_Ready` or `<name>_Finalize` condition
    pub fn set_subroutine_condition(
        &mut self,
        subroutine: &str,
        phase: SubroutinePhase,
        status: ConditionStatus,
        message: impl Into<String>,
        reason: &str,
    ) -> bool {
        let condition = Condition::at(
            subroutine_condition_type(subroutine, phase),
            status,
            reason,
            message,
            self.now,
        );
        set_condition(self.conditions, condition)
    }

    /// Subroutine is about to run
    pub fn subroutine_processing(&mut self, subroutine: &str, phase: SubroutinePhase) -> bool {
        self.set_subroutine_condition(
            subroutine,
            phase,
            ConditionStatus::Unknown,
            format!("The {} is processing", phase.describe()),
            REASON_PROCESSING,
        )
    }

    /// Subroutine converged without asking for a requeue
    pub fn subroutine_complete(&mut self, subroutine: &str, phase: SubroutinePhase) -> bool {
        self.set_subroutine_condition(
            subroutine,
            phase,
            ConditionStatus::True,
            format!("The {} is complete", phase.describe()),
            REASON_COMPLETE,
        )
    }

    /// Subroutine failed with `error`
    pub fn subroutine_failed(
        &mut self,
        subroutine: &str,
        phase: SubroutinePhase,
        error: &str,
    ) -> bool {
        self.set_subroutine_condition(
            subroutine,
            phase,
            ConditionStatus::False,
            format!("The {} has an error: {}", phase.describe(), error),
            REASON_ERROR,
        )
    }
}
