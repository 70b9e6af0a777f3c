//! Admission decisions for MySQL objects
//!
//! Transport independent: the HTTP server decodes an `AdmissionReview` into
//! an [`AdmissionInput`] and encodes the returned [`AdmissionDecision`].

use tracing::{debug, warn};

use super::policies::{ValidationContext, validate_termination, validate_update};
use crate::controller::validation::{ClusterLookup, ValidationFailure, validate};
use crate::crd::MySQL;

/// Status code of a policy denial
pub const CODE_FORBIDDEN: i32 = 403;

/// Status code of a malformed request
pub const CODE_BAD_REQUEST: i32 = 400;

/// Status code of an internal failure
pub const CODE_INTERNAL: i32 = 500;

/// Operation being admitted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOperation {
    Create,
    Update,
    Delete,
    Connect,
}

impl AdmissionOperation {
    /// Parse the `operation` field of an admission request
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "CONNECT" => Some(Self::Connect),
            _ => None,
        }
    }
}

/// Decoded admission request
#[derive(Clone, Debug)]
pub struct AdmissionInput {
    pub operation: AdmissionOperation,
    pub namespace: String,
    pub name: String,
    pub object: Option<MySQL>,
    pub old_object: Option<MySQL>,
}

/// Outcome of an admission request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    Denied {
        code: i32,
        reason: String,
        message: String,
    },
    Failed {
        message: String,
    },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }

    /// Status code carried in the admission response
    pub fn code(&self) -> i32 {
        match self {
            AdmissionDecision::Allowed => 200,
            AdmissionDecision::Denied { code, .. } => *code,
            AdmissionDecision::Failed { .. } => CODE_INTERNAL,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AdmissionDecision::Denied {
            code: CODE_BAD_REQUEST,
            reason: "BadRequest".to_string(),
            message: message.into(),
        }
    }

    fn forbidden(reason: impl Into<String>, message: impl Into<String>) -> Self {
        AdmissionDecision::Denied {
            code: CODE_FORBIDDEN,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationFailure> for AdmissionDecision {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::Violation(v) => AdmissionDecision::forbidden("InvalidSpec", v.to_string()),
            ValidationFailure::Lookup(e) => AdmissionDecision::Failed {
                message: e.to_string(),
            },
        }
    }
}

/// Decide whether a MySQL operation may proceed
pub async fn admit(lookup: &dyn ClusterLookup, input: &AdmissionInput) -> AdmissionDecision {
    match input.operation {
        AdmissionOperation::Create => {
            let Some(db) = &input.object else {
                return AdmissionDecision::bad_request("missing object in CREATE request");
            };
            run_validator(lookup, db).await
        }
        AdmissionOperation::Update => {
            let (Some(db), Some(old_db)) = (&input.object, &input.old_object) else {
                return AdmissionDecision::bad_request("UPDATE request needs object and oldObject");
            };
            if db.spec == old_db.spec {
                debug!(name = %input.name, "spec unchanged, allowing update");
                return AdmissionDecision::Allowed;
            }
            let result = validate_update(&ValidationContext::new(db, Some(old_db)));
            if !result.allowed {
                return AdmissionDecision::forbidden(
                    result.reason.unwrap_or_else(|| "ValidationFailed".to_string()),
                    result.message.unwrap_or_else(|| "Validation failed".to_string()),
                );
            }
            run_validator(lookup, db).await
        }
        AdmissionOperation::Delete => match lookup.mysql(&input.namespace, &input.name).await {
            Ok(None) => AdmissionDecision::Allowed,
            Ok(Some(db)) => {
                let result = validate_termination(&db);
                if result.allowed {
                    AdmissionDecision::Allowed
                } else {
                    AdmissionDecision::forbidden(
                        result.reason.unwrap_or_else(|| "DeletionLocked".to_string()),
                        result.message.unwrap_or_default(),
                    )
                }
            }
            Err(e) => {
                warn!(name = %input.name, error = %e, "failed to fetch MySQL for delete admission");
                AdmissionDecision::Failed {
                    message: e.to_string(),
                }
            }
        },
        AdmissionOperation::Connect => AdmissionDecision::Allowed,
    }
}

async fn run_validator(lookup: &dyn ClusterLookup, db: &MySQL) -> AdmissionDecision {
    match validate(lookup, db).await {
        Ok(()) => AdmissionDecision::Allowed,
        Err(failure) => failure.into(),
    }
}
