//! Unit tests for the MySQL lifecycle state machine

use mysql_operator::controller::state_machine::determine_event;
use mysql_operator::controller::{
    DatabaseEvent, DatabaseStateMachine, TransitionContext, TransitionResult, next_phase,
};
use mysql_operator::crd::DatabasePhase;

const ALL_PHASES: [DatabasePhase; 7] = [
    DatabasePhase::Creating,
    DatabasePhase::Initializing,
    DatabasePhase::Running,
    DatabasePhase::Paused,
    DatabasePhase::Resuming,
    DatabasePhase::Failed,
    DatabasePhase::Terminating,
];

mod transition_tests {
    use super::*;

    #[test]
    fn test_create_without_init() {
        let sm = DatabaseStateMachine::new();
        let result = sm.transition(
            DatabasePhase::Creating,
            DatabaseEvent::ResourcesApplied,
            &TransitionContext::new(false),
        );
        assert!(matches!(
            result,
            TransitionResult::Success {
                to: DatabasePhase::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_create_with_snapshot_init() {
        let sm = DatabaseStateMachine::new();
        let pending = TransitionContext::new(true);

        // cannot skip the restore
        assert!(matches!(
            sm.transition(DatabasePhase::Creating, DatabaseEvent::ResourcesApplied, &pending),
            TransitionResult::GuardFailed { .. }
        ));
        assert_eq!(
            sm.transition(DatabasePhase::Creating, DatabaseEvent::InitRequired, &pending)
                .target(),
            Some(DatabasePhase::Initializing)
        );

        let done = TransitionContext {
            restore_completed: true,
            ..Default::default()
        };
        assert_eq!(
            sm.transition(DatabasePhase::Initializing, DatabaseEvent::RestoreSucceeded, &done)
                .target(),
            Some(DatabasePhase::Running)
        );
    }

    #[test]
    fn test_init_required_needs_pending_init() {
        let sm = DatabaseStateMachine::new();
        assert!(matches!(
            sm.transition(
                DatabasePhase::Creating,
                DatabaseEvent::InitRequired,
                &TransitionContext::new(false)
            ),
            TransitionResult::GuardFailed { .. }
        ));
    }

    #[test]
    fn test_resume_path() {
        let sm = DatabaseStateMachine::new();
        let matched = TransitionContext {
            dormant_matched: true,
            ..Default::default()
        };
        assert_eq!(
            sm.transition(DatabasePhase::Creating, DatabaseEvent::ResumeRequested, &matched)
                .target(),
            Some(DatabasePhase::Resuming)
        );
        assert_eq!(
            sm.transition(
                DatabasePhase::Resuming,
                DatabaseEvent::ResourcesApplied,
                &TransitionContext::new(false)
            )
            .target(),
            Some(DatabasePhase::Running)
        );
        assert!(matches!(
            sm.transition(
                DatabasePhase::Creating,
                DatabaseEvent::ResumeRequested,
                &TransitionContext::default()
            ),
            TransitionResult::GuardFailed { .. }
        ));
    }

    #[test]
    fn test_halt_path() {
        let sm = DatabaseStateMachine::new();
        let tctx = TransitionContext::default();
        assert_eq!(
            sm.transition(DatabasePhase::Running, DatabaseEvent::DeletionRequested, &tctx)
                .target(),
            Some(DatabasePhase::Terminating)
        );
        assert_eq!(
            sm.transition(DatabasePhase::Terminating, DatabaseEvent::Halted, &tctx)
                .target(),
            Some(DatabasePhase::Paused)
        );
    }

    #[test]
    fn test_failed_recovers() {
        let sm = DatabaseStateMachine::new();
        assert_eq!(
            sm.transition(
                DatabasePhase::Failed,
                DatabaseEvent::ResourcesApplied,
                &TransitionContext::new(false)
            )
            .target(),
            Some(DatabasePhase::Running)
        );
        assert_eq!(
            sm.transition(
                DatabasePhase::Failed,
                DatabaseEvent::InitRequired,
                &TransitionContext::new(true)
            )
            .target(),
            Some(DatabasePhase::Initializing)
        );
    }

    #[test]
    fn test_terminating_is_sticky() {
        let sm = DatabaseStateMachine::new();
        assert_eq!(sm.valid_events(DatabasePhase::Terminating), vec![DatabaseEvent::Halted]);
        assert!(!sm.can_transition(DatabasePhase::Terminating, DatabaseEvent::ResourcesApplied));
    }

    #[test]
    fn test_every_non_terminal_phase_can_be_deleted() {
        let sm = DatabaseStateMachine::new();
        for phase in ALL_PHASES {
            if matches!(phase, DatabasePhase::Terminating | DatabasePhase::Paused) {
                continue;
            }
            assert!(
                sm.can_transition(phase, DatabaseEvent::DeletionRequested),
                "{} should accept DeletionRequested",
                phase
            );
        }
    }
}

mod next_phase_tests {
    use super::*;

    #[test]
    fn test_invalid_event_keeps_phase() {
        assert_eq!(
            next_phase(
                DatabasePhase::Running,
                DatabaseEvent::RestoreSucceeded,
                &TransitionContext::default()
            ),
            DatabasePhase::Running
        );
    }

    #[test]
    fn test_guard_failure_keeps_phase() {
        assert_eq!(
            next_phase(
                DatabasePhase::Creating,
                DatabaseEvent::ResourcesApplied,
                &TransitionContext::new(true)
            ),
            DatabasePhase::Creating
        );
    }

    #[test]
    fn test_unwaited_restore_failure_still_serves() {
        assert_eq!(
            next_phase(
                DatabasePhase::Initializing,
                DatabaseEvent::ResourcesApplied,
                &TransitionContext::new(false)
            ),
            DatabasePhase::Running
        );
    }
}

mod determine_event_tests {
    use super::*;

    #[test]
    fn test_deletion_wins() {
        let tctx = TransitionContext {
            error_message: Some("boom".to_string()),
            ..Default::default()
        };
        assert_eq!(
            determine_event(DatabasePhase::Running, &tctx, true),
            DatabaseEvent::DeletionRequested
        );
    }

    #[test]
    fn test_error_event() {
        let tctx = TransitionContext {
            error_message: Some("boom".to_string()),
            ..Default::default()
        };
        assert_eq!(
            determine_event(DatabasePhase::Creating, &tctx, false),
            DatabaseEvent::ReconcileError
        );
    }

    #[test]
    fn test_dormant_match_resumes() {
        let tctx = TransitionContext {
            dormant_matched: true,
            ..Default::default()
        };
        assert_eq!(
            determine_event(DatabasePhase::Creating, &tctx, false),
            DatabaseEvent::ResumeRequested
        );
        assert_eq!(
            determine_event(DatabasePhase::Running, &tctx, false),
            DatabaseEvent::ResourcesApplied
        );
    }

    #[test]
    fn test_pending_init() {
        assert_eq!(
            determine_event(DatabasePhase::Creating, &TransitionContext::new(true), false),
            DatabaseEvent::InitRequired
        );
    }
}
