//! Immutability policies
//!
//! - Storage type cannot be changed after creation
//! - Storage class cannot be changed after creation

use super::{ValidationContext, ValidationResult};

/// Validate immutable storage fields
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    let Some(old_db) = ctx.old_db else {
        return ValidationResult::allowed();
    };

    if old_db.spec.storage_type != ctx.db.spec.storage_type {
        return ValidationResult::denied(
            "StorageTypeImmutable",
            &format!(
                "spec.storageType cannot be changed from {:?} to {:?}",
                old_db.spec.storage_type, ctx.db.spec.storage_type
            ),
        );
    }

    let class = |db: &crate::crd::MySQL| {
        db.spec
            .storage
            .as_ref()
            .and_then(|s| s.storage_class_name.clone())
    };
    if class(old_db) != class(ctx.db) {
        return ValidationResult::denied(
            "StorageClassImmutable",
            "Storage class cannot be changed after creation. Delete and recreate the database to use a different storage class.",
        );
    }

    ValidationResult::allowed()
}
