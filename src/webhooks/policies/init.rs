//! Init policy
//!
//! Once the operator has marked initialization complete, `spec.init` is frozen.

use super::{ValidationContext, ValidationResult};

pub fn validate_init_unchanged(ctx: &ValidationContext) -> ValidationResult {
    let Some(old_db) = ctx.old_db else {
        return ValidationResult::allowed();
    };

    let initialized = old_db.spec.init.as_ref().is_some_and(|i| i.initialized);
    if initialized && old_db.spec.init != ctx.db.spec.init {
        return ValidationResult::denied(
            "InitImmutable",
            "spec.init cannot be changed after the database has been initialized",
        );
    }

    ValidationResult::allowed()
}
