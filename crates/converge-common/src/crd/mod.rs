//! Status types shared by every resource managed through a lifecycle manager

mod condition;

pub use condition::{Condition, ConditionStatus, CONDITION_READY};
