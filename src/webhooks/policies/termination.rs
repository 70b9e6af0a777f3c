//! Termination policy
//!
//! Deleting a database whose termination policy is `DoNotTerminate`, or that
//! carries the legacy `doNotPause` flag, is refused.

use crate::crd::MySQL;
use kube::ResourceExt;

use super::ValidationResult;

pub fn validate_termination(db: &MySQL) -> ValidationResult {
    if !db.spec.is_deletion_locked() {
        return ValidationResult::allowed();
    }
    ValidationResult::denied(
        "DeletionLocked",
        &format!(
            "MySQL {}/{} can't be deleted. Change spec.terminationPolicy from {} (and clear spec.doNotPause) first",
            db.namespace().unwrap_or_default(),
            db.name_any(),
            db.spec.termination_policy
        ),
    )
}
