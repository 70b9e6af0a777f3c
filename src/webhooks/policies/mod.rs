//! Admission webhook policies
//!
//! Each policy module exports a `validate_*` function checking one rule that
//! needs the stored object, which `controller::validation::validate` never sees.

pub mod immutability;
pub mod init;
pub mod termination;

pub use immutability::validate_immutability;
pub use init::validate_init_unchanged;
pub use termination::validate_termination;

use crate::crd::MySQL;

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation including the stored object for UPDATE operations
pub struct ValidationContext<'a> {
    pub db: &'a MySQL,
    pub old_db: Option<&'a MySQL>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(db: &'a MySQL, old_db: Option<&'a MySQL>) -> Self {
        Self { db, old_db }
    }
}

/// Run the update policies and return the first failure
pub fn validate_update(ctx: &ValidationContext) -> ValidationResult {
    let policies: [fn(&ValidationContext) -> ValidationResult; 2] =
        [validate_init_unchanged, validate_immutability];

    for policy in policies {
        let result = policy(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
