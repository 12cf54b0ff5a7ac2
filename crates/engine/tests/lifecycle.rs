//! End-to-end lifecycle tests against the in-memory backend.

use std::sync::Arc;

use serde_json::json;

use postmortem_core::{
    AnalysisStatus, AnalysisType, ContentDraft, EngineError, ErrorKind, ForbiddenReason,
    ReviewDecision, Role, TransitionEvent,
};
use postmortem_engine::{
    Actor, ListFilter, ManualClock, NewAnalysis, NewTask, SequentialIds, Workflow,
};
use postmortem_storage::{AnalysisRecord, MemoryStorage};

fn alice() -> Actor {
    Actor::new("alice", Role::Employee)
}

fn erin() -> Actor {
    Actor::new("erin", Role::Employee)
}

fn bob() -> Actor {
    Actor::new("bob", Role::Manager)
}

fn olga() -> Actor {
    Actor::new("olga", Role::Owner)
}

fn workflow() -> Workflow<MemoryStorage> {
    Workflow::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(ManualClock::default()),
        Arc::new(SequentialIds::new()),
    )
}

fn draft(readiness: i64) -> ContentDraft {
    serde_json::from_value(json!({
        "symptoms": ["Checkout p99 jumped to 4s"],
        "signals": ["DB connection pool at 100%"],
        "hypotheses": [
            {"text": "Connection pool exhaustion", "confidence": 70, "evidence": ["pool graph"]}
        ],
        "readiness_score": readiness
    }))
    .unwrap()
}

async fn task(wf: &Workflow<MemoryStorage>) -> String {
    wf.tasks
        .create_task(
            &bob(),
            NewTask {
                title: "Checkout latency spike".into(),
                description: String::new(),
                assignee: Some("alice".into()),
            },
        )
        .await
        .unwrap()
        .id
}

async fn analysis(wf: &Workflow<MemoryStorage>, readiness: i64) -> AnalysisRecord {
    let task_id = task(wf).await;
    wf.analyses
        .create(
            &alice(),
            NewAnalysis {
                task_id,
                analysis_type: AnalysisType::Latency,
                content: Some(draft(readiness)),
            },
        )
        .await
        .unwrap()
}

async fn submitted(wf: &Workflow<MemoryStorage>) -> AnalysisRecord {
    let a = analysis(wf, 82).await;
    wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap()
}

#[tokio::test]
async fn submit_then_approve_unlocks_reports() {
    let wf = workflow();
    let a = analysis(&wf, 82).await;
    assert_eq!(a.status, AnalysisStatus::Draft);
    assert_eq!(a.version, 0);

    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.status, AnalysisStatus::Submitted);
    assert_eq!(a.version, 1);
    assert_eq!(wf.analyses.history(&alice(), &a.id).await.unwrap().len(), 1);

    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(a.status, AnalysisStatus::Approved);

    let history = wf.analyses.history(&bob(), &a.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event, TransitionEvent::Submit);
    assert_eq!(history[0].from_status, AnalysisStatus::Draft);
    assert_eq!(history[1].to_status, AnalysisStatus::Approved);
    assert_eq!(history[1].actor_id, "bob");
    assert_eq!(history[1].actor_role, Role::Manager);

    assert!(wf.analyses.can_generate_report(&a.id, Role::Manager).await.unwrap());
    assert!(!wf.analyses.can_generate_report(&a.id, Role::Employee).await.unwrap());
    assert!(!wf.analyses.can_generate_report(&a.id, Role::Owner).await.unwrap());
}

#[tokio::test]
async fn report_eligibility_hides_existence_from_roles_that_cannot_report() {
    let wf = workflow();
    let a = analysis(&wf, 82).await;

    for role in [Role::Employee, Role::Owner] {
        assert!(!wf.analyses.can_generate_report(&a.id, role).await.unwrap());
        assert!(!wf.analyses.can_generate_report("analysis-404", role).await.unwrap());
    }
    assert_eq!(
        wf.analyses
            .can_generate_report("analysis-404", Role::Manager)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert!(!wf.analyses.can_generate_report(&a.id, Role::Manager).await.unwrap());
}

#[tokio::test]
async fn submit_below_threshold_changes_nothing() {
    let wf = workflow();
    let a = analysis(&wf, 65).await;

    let err = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.field_errors().unwrap().contains_key("readiness_score"));

    let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Draft);
    assert_eq!(stored.version, 0);
    assert!(wf.analyses.history(&alice(), &a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn threshold_is_inclusive() {
    let wf = workflow();
    let a = analysis(&wf, 75).await;
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.status, AnalysisStatus::Submitted);

    let b = analysis(&wf, 74).await;
    let err = wf.analyses.submit(&alice(), &b.id, b.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn rejection_needs_feedback_and_edit_returns_to_draft() {
    let wf = workflow();
    let a = submitted(&wf).await;

    let err = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some(""))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.field_errors().unwrap().contains_key("feedback"));
    let err = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);

    let a = wf
        .analyses
        .review(
            &bob(),
            &a.id,
            a.version,
            ReviewDecision::Reject,
            Some("needs more evidence"),
        )
        .await
        .unwrap();
    assert_eq!(a.status, AnalysisStatus::Rejected);
    assert_eq!(a.feedback.as_deref(), Some("needs more evidence"));

    let a = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(90))
        .await
        .unwrap();
    assert_eq!(a.status, AnalysisStatus::Draft);
    assert_eq!(a.content.readiness_score.value(), 90);

    let history = wf.analyses.history(&alice(), &a.id).await.unwrap();
    let events: Vec<TransitionEvent> = history.iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![TransitionEvent::Submit, TransitionEvent::Reject, TransitionEvent::Edit]
    );
    assert_eq!(history[1].note.as_deref(), Some("needs more evidence"));

    // Resubmission after the fix goes through.
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.status, AnalysisStatus::Submitted);
}

#[tokio::test]
async fn reopen_keeps_content() {
    let wf = workflow();
    let a = submitted(&wf).await;
    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some("thin"))
        .await
        .unwrap();
    let content = a.content.clone();

    let a = wf.analyses.reopen(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.status, AnalysisStatus::Draft);
    assert_eq!(a.content, content);
    assert_eq!(wf.analyses.revisions(&alice(), &a.id).await.unwrap().len(), 1);

    let err = wf.analyses.reopen(&alice(), &a.id, a.version).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn terminal_and_submitted_analyses_are_frozen() {
    let wf = workflow();
    let a = submitted(&wf).await;
    let err = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(90))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Approve, None)
        .await
        .unwrap();
    let err = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(90))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidState {
            status: "APPROVED".into(),
            operation: "edit",
        }
    );
    let err = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some("late"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn review_of_a_draft_is_invalid_state() {
    let wf = workflow();
    let a = analysis(&wf, 90).await;
    let err = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn role_checks_come_before_everything() {
    let wf = workflow();
    let a = submitted(&wf).await;

    // Employee may not review, even with a stale version and no feedback.
    let err = wf
        .analyses
        .review(&alice(), &a.id, 99, ReviewDecision::Reject, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Forbidden {
            operation: "review_analysis",
            reason: ForbiddenReason::RoleLacksCapability(Role::Employee),
        }
    );

    // Owner is refused before the missing record is noticed.
    let err = wf.analyses.submit(&olga(), "analysis-404", 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = wf.analyses.submit(&alice(), "analysis-404", 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn only_the_owner_edits_and_submits() {
    let wf = workflow();
    let a = analysis(&wf, 90).await;

    let err = wf.analyses.submit(&erin(), &a.id, a.version).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Forbidden {
            operation: "submit_analysis",
            reason: ForbiddenReason::NotOwner,
        }
    );
    let err = wf
        .analyses
        .update_content(&bob(), &a.id, a.version, draft(10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn validation_is_checked_before_the_version() {
    let wf = workflow();
    let a = analysis(&wf, 90).await;
    let bad: ContentDraft = serde_json::from_value(json!({
        "symptoms": ["   "],
        "readiness_score": 101
    }))
    .unwrap();
    let err = wf
        .analyses
        .update_content(&alice(), &a.id, 42, bad)
        .await
        .unwrap_err();
    let fields = err.field_errors().unwrap();
    assert!(fields.contains_key("symptoms[0]"));
    assert!(fields.contains_key("readiness_score"));
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let wf = workflow();
    let a = analysis(&wf, 90).await;
    let updated = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(91))
        .await
        .unwrap();
    assert_eq!(updated.version, 1);

    let err = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict {
            entity: "analysis",
            id: a.id.clone(),
            expected_version: 0,
            actual_version: Some(1),
        }
    );
}

#[tokio::test]
async fn concurrent_submits_with_one_token_commit_once() {
    let wf = workflow();
    let a = analysis(&wf, 90).await;

    let (first_caller, second_caller) = (alice(), alice());
    let (first, second) = tokio::join!(
        wf.analyses.submit(&first_caller, &a.id, a.version),
        wf.analyses.submit(&second_caller, &a.id, a.version),
    );
    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Conflict))
        .count();
    assert_eq!((ok, conflicts), (1, 1));
    assert_eq!(wf.analyses.history(&alice(), &a.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_racing_an_edit_with_one_token_commits_once() {
    for _ in 0..25 {
        let wf = workflow();
        let a = analysis(&wf, 90).await;

        let (submitter, editor) = (alice(), alice());
        let submits = wf.clone();
        let edits = wf.clone();
        let (id_s, id_e) = (a.id.clone(), a.id.clone());
        let version = a.version;
        let submit = tokio::spawn(async move {
            submits.analyses.submit(&submitter, &id_s, version).await
        });
        let edit = tokio::spawn(async move {
            edits
                .analyses
                .update_content(&editor, &id_e, version, draft(95))
                .await
        });
        let submitted = submit.await.unwrap();
        let edited = edit.await.unwrap();

        let conflicts = [
            submitted.as_ref().err().map(|e| e.kind()),
            edited.as_ref().err().map(|e| e.kind()),
        ];
        assert_eq!(
            (submitted.is_ok() as u8) + (edited.is_ok() as u8),
            1,
            "exactly one writer commits"
        );
        assert!(conflicts.contains(&Some(ErrorKind::Conflict)));

        let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
        assert_eq!(stored.version, 1);
        let history = wf.analyses.history(&alice(), &a.id).await.unwrap();
        let revisions = wf.analyses.revisions(&alice(), &a.id).await.unwrap();
        if submitted.is_ok() {
            assert_eq!(stored.status, AnalysisStatus::Submitted);
            assert_eq!(history.len(), 1);
            assert_eq!(revisions.len(), 1);
        } else {
            assert_eq!(stored.status, AnalysisStatus::Draft);
            assert!(history.is_empty());
            assert_eq!(revisions.len(), 2);
            assert_eq!(stored.content.readiness_score.value(), 95);
        }
        assert!(wf.analyses.verify_audit(&alice(), &a.id).await.unwrap().is_intact());
    }
}

#[tokio::test]
async fn creation_needs_an_existing_task() {
    let wf = workflow();
    let err = wf
        .analyses
        .create(
            &alice(),
            NewAnalysis {
                task_id: "task-404".into(),
                analysis_type: AnalysisType::Outage,
                content: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::NotFound {
            kind: "task",
            id: "task-404".into(),
        }
    );

    let err = wf
        .analyses
        .create(
            &olga(),
            NewAnalysis {
                task_id: "task-404".into(),
                analysis_type: AnalysisType::Outage,
                content: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn visibility_follows_role() {
    let wf = workflow();
    let mine = analysis(&wf, 90).await;
    let task_id = mine.task_id.clone();
    let theirs = wf
        .analyses
        .create(
            &erin(),
            NewAnalysis {
                task_id: task_id.clone(),
                analysis_type: AnalysisType::Capacity,
                content: None,
            },
        )
        .await
        .unwrap();

    let listed = wf.analyses.list(&alice(), ListFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.id);

    let all = wf.analyses.list(&bob(), ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let drafts = wf
        .analyses
        .list(
            &bob(),
            ListFilter {
                task_id: Some(task_id),
                status: Some(AnalysisStatus::Submitted),
            },
        )
        .await
        .unwrap();
    assert!(drafts.is_empty());

    let err = wf.analyses.get(&alice(), &theirs.id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Forbidden {
            operation: "view_analysis",
            reason: ForbiddenReason::NotOwner,
        }
    );
    assert_eq!(
        wf.analyses.list(&olga(), ListFilter::default()).await.unwrap_err().kind(),
        ErrorKind::Forbidden
    );
    assert_eq!(
        wf.analyses.history(&olga(), &mine.id).await.unwrap_err().kind(),
        ErrorKind::Forbidden
    );
}

#[tokio::test]
async fn revisions_track_every_content_change() {
    let wf = workflow();
    let a = analysis(&wf, 80).await;
    let a = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(85))
        .await
        .unwrap();
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some("why?"))
        .await
        .unwrap();
    let a = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(95))
        .await
        .unwrap();

    let revisions = wf.analyses.revisions(&alice(), &a.id).await.unwrap();
    let scores: Vec<u8> = revisions
        .iter()
        .map(|r| r.content.readiness_score.value())
        .collect();
    assert_eq!(scores, vec![80, 85, 95]);
    assert_eq!(revisions[2].sequence, 3);

    let first = wf.analyses.revision_at(&alice(), &a.id, 1).await.unwrap();
    assert_eq!(first.content.readiness_score.value(), 80);
    let err = wf.analyses.revision_at(&alice(), &a.id, 9).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let at_submit = wf.analyses.snapshot_at_submission(&bob(), &a.id).await.unwrap();
    assert_eq!(at_submit.sequence, 2);
    assert_eq!(at_submit.content.readiness_score.value(), 85);
}

#[tokio::test]
async fn never_submitted_has_no_submission_snapshot() {
    let wf = workflow();
    let a = analysis(&wf, 10).await;
    let err = wf
        .analyses
        .snapshot_at_submission(&alice(), &a.id)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::NotFound {
            kind: "submission",
            id: a.id.clone(),
        }
    );
}

#[tokio::test]
async fn audit_chains_verify_after_a_full_cycle() {
    let wf = workflow();
    let a = submitted(&wf).await;
    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some("more"))
        .await
        .unwrap();
    let a = wf.analyses.reopen(&alice(), &a.id, a.version).await.unwrap();

    let report = wf.analyses.verify_audit(&bob(), &a.id).await.unwrap();
    assert!(report.is_intact(), "{:?}", report.first_break);
    assert_eq!(report.history_entries, 3);
    assert_eq!(report.revision_entries, 1);
    assert_eq!(a.history_head.sequence, 3);
}

#[tokio::test]
async fn timestamps_come_from_the_injected_clock() {
    let clock = Arc::new(ManualClock::default());
    let wf = Workflow::new(
        Arc::new(MemoryStorage::new()),
        clock.clone(),
        Arc::new(SequentialIds::new()),
    );
    let a = analysis(&wf, 90).await;
    assert_eq!(a.created_at, "2025-01-01T00:00:00Z");

    clock.advance(time::Duration::hours(2));
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.updated_at, "2025-01-01T02:00:00Z");
    let history = wf.analyses.history(&alice(), &a.id).await.unwrap();
    assert_eq!(history[0].recorded_at, "2025-01-01T02:00:00Z");
}
