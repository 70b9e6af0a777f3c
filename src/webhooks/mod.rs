//! Admission webhook for MySQL validation
//!
//! Implements a ValidatingAdmissionWebhook that rejects invalid specs,
//! unsafe updates and deletions of locked databases before they are
//! persisted to etcd.

pub mod admission;
pub mod policies;
mod server;

pub use admission::{AdmissionDecision, AdmissionInput, AdmissionOperation, admit};
pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    create_webhook_router, run_webhook_server,
};
