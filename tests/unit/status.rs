//! Unit tests for status conditions and change detection

use crate::common::*;
use mysql_operator::controller::status::{
    ConditionBuilder, condition_status, condition_types, phase_conditions, spec_changed,
};
use mysql_operator::crd::{Condition, DatabasePhase};

fn status_of<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c str> {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status.as_str())
}

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_condition() {
        let conditions = ConditionBuilder::new(Some(3))
            .ready(true, "DatabaseReady", "ok")
            .build();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, condition_types::READY);
        assert_eq!(conditions[0].status, condition_status::TRUE);
        assert_eq!(conditions[0].observed_generation, Some(3));
        assert!(!conditions[0].last_transition_time.is_empty());
    }

    #[test]
    fn test_update_keeps_single_entry() {
        let first = ConditionBuilder::new(Some(1))
            .ready(false, "Creating", "creating")
            .build();
        let second = ConditionBuilder::from_existing(first, Some(2))
            .ready(true, "DatabaseReady", "ok")
            .build();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status, condition_status::TRUE);
        assert_eq!(second[0].reason, "DatabaseReady");
        assert_eq!(second[0].observed_generation, Some(2));
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut first = ConditionBuilder::new(Some(1))
            .ready(true, "DatabaseReady", "ok")
            .build();
        first[0].last_transition_time = "2020-01-01T00:00:00+00:00".to_string();

        let same = ConditionBuilder::from_existing(first.clone(), Some(1))
            .ready(true, "DatabaseReady", "still ok")
            .build();
        assert_eq!(same[0].last_transition_time, "2020-01-01T00:00:00+00:00");
        assert_eq!(same[0].message, "still ok");

        let flipped = ConditionBuilder::from_existing(first, Some(1))
            .ready(false, "Failed", "down")
            .build();
        assert_ne!(flipped[0].last_transition_time, "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_connection_and_initialized() {
        let conditions = ConditionBuilder::new(None)
            .accepting_connection(false, "ConnectionFailed", "refused")
            .initialized(true, "RestoreSucceeded", "done")
            .build();
        assert_eq!(
            status_of(&conditions, condition_types::ACCEPTING_CONNECTION),
            Some(condition_status::FALSE)
        );
        assert_eq!(
            status_of(&conditions, condition_types::INITIALIZED),
            Some(condition_status::TRUE)
        );
    }
}

mod phase_conditions_tests {
    use super::*;

    #[test]
    fn test_creating() {
        let conditions = phase_conditions(vec![], Some(1), DatabasePhase::Creating, "Creating", "x");
        assert_eq!(status_of(&conditions, condition_types::READY), Some("False"));
        assert_eq!(status_of(&conditions, condition_types::PROGRESSING), Some("True"));
    }

    #[test]
    fn test_initializing_marks_not_initialized() {
        let conditions =
            phase_conditions(vec![], Some(1), DatabasePhase::Initializing, "Initializing", "x");
        assert_eq!(status_of(&conditions, condition_types::INITIALIZED), Some("False"));
    }

    #[test]
    fn test_failed_is_degraded() {
        let conditions = phase_conditions(vec![], Some(1), DatabasePhase::Failed, "Invalid", "bad");
        assert_eq!(status_of(&conditions, condition_types::DEGRADED), Some("True"));
        assert_eq!(status_of(&conditions, condition_types::READY), Some("False"));
    }

    #[test]
    fn test_running_after_failure_clears_degraded() {
        let failed = phase_conditions(vec![], Some(1), DatabasePhase::Failed, "Invalid", "bad");
        let running = phase_conditions(failed, Some(2), DatabasePhase::Running, "DatabaseReady", "ok");
        assert_eq!(status_of(&running, condition_types::DEGRADED), Some("False"));
        assert_eq!(status_of(&running, condition_types::READY), Some("True"));
        assert_eq!(running.len(), 3);
    }

    #[test]
    fn test_other_conditions_survive() {
        let existing = ConditionBuilder::new(Some(1))
            .accepting_connection(true, "ConnectionSucceeded", "ok")
            .build();
        let conditions =
            phase_conditions(existing, Some(1), DatabasePhase::Running, "DatabaseReady", "ok");
        assert_eq!(
            status_of(&conditions, condition_types::ACCEPTING_CONNECTION),
            Some("True")
        );
    }
}

mod spec_changed_tests {
    use super::*;

    #[test]
    fn test_new_object_counts_as_changed() {
        assert!(spec_changed(&create_test_mysql("db", "default")));
    }

    #[test]
    fn test_observed_generation() {
        let seen = MySQLBuilder::new("db", "default")
            .with_generation(4)
            .with_phase(DatabasePhase::Running)
            .with_observed_generation(4)
            .build();
        assert!(!spec_changed(&seen));

        let edited = MySQLBuilder::new("db", "default")
            .with_generation(5)
            .with_phase(DatabasePhase::Running)
            .with_observed_generation(4)
            .build();
        assert!(spec_changed(&edited));
    }
}
