//! Finite state machine for the MySQL lifecycle
//!
//! Every phase change the reconciler makes goes through [`DatabaseStateMachine`]
//! so only transitions listed in the table below can occur. An event with no
//! matching transition leaves the phase unchanged.

use std::fmt;

use crate::crd::DatabasePhase;

/// Events that trigger state transitions in the database lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEvent {
    /// Child objects have been ensured
    ResourcesApplied,
    /// A snapshot restore has to run before the database can serve
    InitRequired,
    /// The restore Job completed
    RestoreSucceeded,
    /// A DormantDatabase with a matching origin was found
    ResumeRequested,
    /// An error occurred during reconciliation
    ReconcileError,
    /// Deletion timestamp has been set on the resource
    DeletionRequested,
    /// The database was preserved in a DormantDatabase
    Halted,
}

impl fmt::Display for DatabaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseEvent::ResourcesApplied => write!(f, "ResourcesApplied"),
            DatabaseEvent::InitRequired => write!(f, "InitRequired"),
            DatabaseEvent::RestoreSucceeded => write!(f, "RestoreSucceeded"),
            DatabaseEvent::ResumeRequested => write!(f, "ResumeRequested"),
            DatabaseEvent::ReconcileError => write!(f, "ReconcileError"),
            DatabaseEvent::DeletionRequested => write!(f, "DeletionRequested"),
            DatabaseEvent::Halted => write!(f, "Halted"),
        }
    }
}

/// Facts about the database used by transition guards
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// A snapshot init is configured and not yet marked initialized
    pub init_pending: bool,
    /// The restore Job finished successfully
    pub restore_completed: bool,
    /// A DormantDatabase matching this database exists
    pub dormant_matched: bool,
    /// Error message if reconciliation failed
    pub error_message: Option<String>,
}

impl TransitionContext {
    pub fn new(init_pending: bool) -> Self {
        Self {
            init_pending,
            ..Default::default()
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: DatabasePhase,
    pub to: DatabasePhase,
    pub event: DatabaseEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: DatabasePhase,
        to: DatabasePhase,
        event: DatabaseEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: DatabasePhase,
        to: DatabasePhase,
        event: DatabaseEvent,
        description: &'static str,
    },
    /// No transition is defined for this phase and event
    InvalidTransition {
        current: DatabasePhase,
        event: DatabaseEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: DatabasePhase,
        to: DatabasePhase,
        event: DatabaseEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Phase to record after this result
    pub fn target(&self) -> Option<DatabasePhase> {
        match self {
            TransitionResult::Success { to, .. } => Some(*to),
            _ => None,
        }
    }
}

use DatabaseEvent as E;
use DatabasePhase as P;

const TRANSITIONS: &[Transition] = &[
    // Creating
    Transition::new(P::Creating, P::Running, E::ResourcesApplied, "Database resources created"),
    Transition::new(P::Creating, P::Initializing, E::InitRequired, "Restoring initial snapshot"),
    Transition::new(P::Creating, P::Resuming, E::ResumeRequested, "Resuming from dormant database"),
    Transition::new(P::Creating, P::Failed, E::ReconcileError, "Error during creation"),
    Transition::new(P::Creating, P::Terminating, E::DeletionRequested, "Deletion requested during creation"),
    // Initializing
    Transition::new(P::Initializing, P::Running, E::RestoreSucceeded, "Initial restore completed"),
    Transition::new(P::Initializing, P::Running, E::ResourcesApplied, "Serving without waiting for the restore"),
    Transition::new(P::Initializing, P::Failed, E::ReconcileError, "Initial restore failed"),
    Transition::new(P::Initializing, P::Terminating, E::DeletionRequested, "Deletion requested during restore"),
    // Running
    Transition::new(P::Running, P::Failed, E::ReconcileError, "Error while running"),
    Transition::new(P::Running, P::Terminating, E::DeletionRequested, "Deletion requested"),
    // Resuming
    Transition::new(P::Resuming, P::Running, E::ResourcesApplied, "Database resumed"),
    Transition::new(P::Resuming, P::Failed, E::ReconcileError, "Error while resuming"),
    Transition::new(P::Resuming, P::Terminating, E::DeletionRequested, "Deletion requested during resume"),
    // Failed
    Transition::new(P::Failed, P::Running, E::ResourcesApplied, "Recovered from failure"),
    Transition::new(P::Failed, P::Initializing, E::InitRequired, "Retrying initial restore"),
    Transition::new(P::Failed, P::Terminating, E::DeletionRequested, "Deletion requested while failed"),
    // Terminating
    Transition::new(P::Terminating, P::Paused, E::Halted, "Database halted into dormant database"),
    // Paused
    Transition::new(P::Paused, P::Resuming, E::ResumeRequested, "Resuming paused database"),
];

/// Formal state machine for the MySQL lifecycle
pub struct DatabaseStateMachine {
    transitions: &'static [Transition],
}

impl Default for DatabaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: TRANSITIONS,
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: DatabasePhase,
        event: DatabaseEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let Some(t) = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        else {
            return TransitionResult::InvalidTransition { current, event };
        };

        match self.check_guard(t, ctx) {
            Some(reason) => TransitionResult::GuardFailed {
                from: t.from,
                to: t.to,
                event,
                reason,
            },
            None => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: DatabasePhase, event: DatabaseEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: DatabasePhase) -> Vec<DatabaseEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (transition.to, transition.event) {
            // Running is only reachable once no restore is outstanding
            (P::Running, E::ResourcesApplied) if ctx.init_pending => {
                Some("initial snapshot has not been restored".to_string())
            }
            (P::Running, E::RestoreSucceeded) if !ctx.restore_completed => {
                Some("restore job has not completed".to_string())
            }
            (P::Initializing, E::InitRequired) if !ctx.init_pending => {
                Some("no snapshot restore is pending".to_string())
            }
            (P::Resuming, E::ResumeRequested) if !ctx.dormant_matched => {
                Some("no matching dormant database".to_string())
            }
            _ => None,
        }
    }
}

/// Determine the event describing the outcome of a reconcile pass
pub fn determine_event(
    current_phase: DatabasePhase,
    ctx: &TransitionContext,
    has_deletion_timestamp: bool,
) -> DatabaseEvent {
    if has_deletion_timestamp {
        return DatabaseEvent::DeletionRequested;
    }
    if ctx.error_message.is_some() {
        return DatabaseEvent::ReconcileError;
    }
    if ctx.dormant_matched && matches!(current_phase, P::Creating | P::Paused) {
        return DatabaseEvent::ResumeRequested;
    }
    if current_phase == P::Initializing {
        return DatabaseEvent::RestoreSucceeded;
    }
    if ctx.init_pending {
        return DatabaseEvent::InitRequired;
    }
    DatabaseEvent::ResourcesApplied
}
