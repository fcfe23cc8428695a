//! Finalizer coordination
//!
//! Each subroutine owns a set of finalizer tokens. Tokens are added before
//! the subroutine first processes a resource and removed once its finalize
//! step has converged, so cleanup from several owners can proceed
//! independently.

use kube::{Resource, ResourceExt};

use converge_common::OperatorError;

use crate::subroutine::ReconcileOutcome;

/// True when at least one of `tokens` is present on the resource
pub fn is_registered<K: Resource>(instance: &K, tokens: &[String]) -> bool {
    let present = instance.finalizers();
    tokens.iter().any(|t| present.contains(t))
}

/// Add every missing token; returns whether the finalizer list changed
pub fn ensure_registered<K: Resource>(instance: &mut K, tokens: &[String]) -> bool {
    let present = instance.finalizers_mut();
    let mut changed = false;
    for token in tokens {
        if !present.contains(token) {
            present.push(token.clone());
            changed = true;
        }
    }
    changed
}

/// Remove the tokens once finalization is idle
///
/// Tokens stay in place when the finalize step failed or still asks for a
/// requeue. Returns whether the finalizer list changed.
pub fn release_if_idle<K: Resource>(
    instance: &mut K,
    tokens: &[String],
    outcome: &Result<ReconcileOutcome, OperatorError>,
) -> bool {
    match outcome {
        Ok(outcome) if outcome.is_done() => {}
        _ => return false,
    }

    let present = instance.finalizers_mut();
    let before = present.len();
    present.retain(|f| !tokens.contains(f));
    before != present.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_resource;
    use std::time::Duration;

    fn tokens(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ensure_registered_adds_missing_only() {
        let mut resource = test_resource("ns", "r");
        resource.metadata.finalizers = Some(tokens(&["a"]));

        assert!(ensure_registered(&mut resource, &tokens(&["a", "b"])));
        assert_eq!(resource.finalizers(), tokens(&["a", "b"]).as_slice());
        assert!(!ensure_registered(&mut resource, &tokens(&["a", "b"])));
    }

    #[test]
    fn test_ensure_registered_without_tokens() {
        let mut resource = test_resource("ns", "r");
        assert!(!ensure_registered(&mut resource, &[]));
    }

    #[test]
    fn test_is_registered_any_token() {
        let mut resource = test_resource("ns", "r");
        assert!(!is_registered(&resource, &tokens(&["a"])));
        resource.metadata.finalizers = Some(tokens(&["other", "b"]));
        assert!(is_registered(&resource, &tokens(&["a", "b"])));
        assert!(!is_registered(&resource, &[]));
    }

    #[test]
    fn test_release_only_when_idle() {
        let mut resource = test_resource("ns", "r");
        resource.metadata.finalizers = Some(tokens(&["a", "keep"]));
        let owned = tokens(&["a"]);

        let pending = Ok(ReconcileOutcome::requeue_after(Duration::from_secs(5)));
        assert!(!release_if_idle(&mut resource, &owned, &pending));

        let immediate = Ok(ReconcileOutcome::requeue());
        assert!(!release_if_idle(&mut resource, &owned, &immediate));

        let failed = Err(OperatorError::retryable("cleanup failed"));
        assert!(!release_if_idle(&mut resource, &owned, &failed));
        assert_eq!(resource.finalizers().len(), 2);

        assert!(release_if_idle(&mut resource, &owned, &Ok(ReconcileOutcome::done())));
        assert_eq!(resource.finalizers(), tokens(&["keep"]).as_slice());
        assert!(!release_if_idle(&mut resource, &owned, &Ok(ReconcileOutcome::done())));
    }
}
