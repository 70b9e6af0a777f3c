pub mod context;
pub mod dormant;
pub mod error;
pub mod health_check;
pub mod lifecycle;
pub mod monitor;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod validation;

pub use context::{CONTROLLER_NAME, Context};
pub use dormant::{DormantAction, dormant_action, dormant_error_policy, reconcile_dormant};
pub use error::{BackoffConfig, Error, Result};
pub use health_check::run_health_checker;
pub use lifecycle::{DormantMatch, TerminationAction, match_dormant, termination_action};
pub use monitor::{MonitorAgent, agent_for};
pub use reconciler::{FINALIZER, error_policy, next_phase, reconcile};
pub use state_machine::{DatabaseEvent, DatabaseStateMachine, TransitionContext, TransitionResult};
pub use status::{ConditionBuilder, StatusManager, spec_changed};
pub use validation::{
    ClusterLookup, KubeLookup, SpecViolation, ValidationFailure, validate, validate_cron_expression,
};
