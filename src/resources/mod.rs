pub mod backup;
pub mod common;
pub mod ensure;
pub mod job;
pub mod monitor;
pub mod rbac;
pub mod secret;
pub mod service;
pub mod statefulset;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};
