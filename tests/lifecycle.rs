mod support;

use trellis::model::TaskStatus;
use trellis::Error;

const ACTOR: &str = "agent-7";

#[test]
fn todo_to_done_is_always_rejected() {
    for (driver, mut tracker) in support::trackers() {
        for n in 0..5 {
            let task = tracker
                .create_task(ACTOR, "default", &format!("task {n}"), None)
                .expect("create");
            let err = tracker
                .transition_task(ACTOR, &task.id, TaskStatus::Done, "skip ahead", 1, None)
                .expect_err("todo -> done");
            assert!(
                matches!(
                    err,
                    Error::InvalidTransition {
                        from: TaskStatus::Todo,
                        to: TaskStatus::Done
                    }
                ),
                "{driver}: {err:?}"
            );
            let stored = tracker.get_task(&task.id).expect("get");
            assert_eq!(stored.status, TaskStatus::Todo, "{driver}");
            assert_eq!(stored.version, 1, "{driver}");
            assert!(stored.rationale_log.is_empty(), "{driver}");
        }
    }
}

#[test]
fn two_step_completion_succeeds() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker
            .create_task(ACTOR, "default", "ship it", None)
            .expect("create");
        let started = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "picking up", 1, Some(0.8))
            .expect("start");
        assert_eq!(started.version, 2, "{driver}");
        assert_eq!(started.assignees, vec![ACTOR.to_string()], "{driver}");

        let done = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Done, "merged", 2, None)
            .expect("finish");
        assert_eq!(done.status, TaskStatus::Done, "{driver}");
        assert_eq!(done.version, 3, "{driver}");
        assert_eq!(done.rationale_log.len(), 2, "{driver}");
        assert_eq!(done.rationale_log[0].confidence, Some(0.8), "{driver}");
        assert_eq!(done.rationale_log[1].rationale, "merged", "{driver}");

        let stored = tracker.get_task(&task.id).expect("get");
        assert_eq!(stored, done, "{driver}");
    }
}

#[test]
fn done_is_terminal() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker.create_task(ACTOR, "default", "t", None).expect("create");
        tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "go", 1, None)
            .expect("start");
        tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Done, "done", 2, None)
            .expect("finish");
        for to in [TaskStatus::Blocked, TaskStatus::InProgress, TaskStatus::Todo] {
            let err = tracker
                .transition_task(ACTOR, &task.id, to, "reopen", 3, None)
                .expect_err("terminal");
            assert!(matches!(err, Error::InvalidTransition { .. }), "{driver}: {err:?}");
        }
    }
}

#[test]
fn every_accepted_mutation_bumps_version_by_one() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker.create_task(ACTOR, "default", "t", None).expect("create");
        let other = tracker.create_phase(ACTOR, "default", "later").expect("phase");
        let mut version = task.version;

        let moved = tracker
            .move_task(ACTOR, &task.id, &other.id, None)
            .expect("move");
        assert_eq!(moved.version, version + 1, "{driver}: move");
        version = moved.version;

        let blocked = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Blocked, "waiting", version, None)
            .expect("block");
        assert_eq!(blocked.version, version + 1, "{driver}: block");
        version = blocked.version;

        let again = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Blocked, "still waiting", version, None)
            .expect("block again");
        assert_eq!(again.version, version + 1, "{driver}: block again");
        version = again.version;

        let (deleted, changed) = tracker.delete_task(ACTOR, &task.id).expect("delete");
        assert!(changed);
        assert_eq!(deleted.version, version + 1, "{driver}: delete");
        version = deleted.version;

        let (restored, _) = tracker.restore_task(ACTOR, &task.id).expect("restore");
        assert_eq!(restored.version, version + 1, "{driver}: restore");
    }
}

#[test]
fn stale_version_is_rejected_and_changes_nothing() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker.create_task(ACTOR, "default", "t", None).expect("create");
        tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "go", 1, None)
            .expect("start");

        for stale in [0, 1, 3, 99] {
            let err = tracker
                .transition_task(ACTOR, &task.id, TaskStatus::Done, "late writer", stale, None)
                .expect_err("stale");
            match err {
                Error::VersionConflict { expected, current } => {
                    assert_eq!(expected, stale, "{driver}");
                    assert_eq!(current, 2, "{driver}");
                }
                other => panic!("{driver}: unexpected error {other:?}"),
            }
        }
        let stored = tracker.get_task(&task.id).expect("get");
        assert_eq!(stored.version, 2, "{driver}");
        assert_eq!(stored.status, TaskStatus::InProgress, "{driver}");
        assert_eq!(stored.rationale_log.len(), 1, "{driver}");
    }
}

#[test]
fn version_conflict_wins_over_illegal_transition() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker.create_task(ACTOR, "default", "t", None).expect("create");
        let err = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Done, "both wrong", 4, None)
            .expect_err("conflict");
        assert!(matches!(err, Error::VersionConflict { current: 1, .. }), "{driver}: {err:?}");
    }
}

#[test]
fn deleted_task_is_not_found_for_transitions() {
    for (driver, mut tracker) in support::trackers() {
        let task = tracker.create_task(ACTOR, "default", "t", None).expect("create");
        tracker.delete_task(ACTOR, &task.id).expect("delete");
        let err = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "go", 2, None)
            .expect_err("deleted");
        assert!(matches!(err, Error::NotFound { .. }), "{driver}: {err:?}");

        let err = tracker
            .transition_task(ACTOR, "t-missing", TaskStatus::InProgress, "go", 1, None)
            .expect_err("missing");
        assert!(matches!(err, Error::NotFound { .. }), "{driver}: {err:?}");
    }
}
