//! The analysis lifecycle state machine.
//!
//! Every mutating operation runs in one storage snapshot and evaluates its
//! checks in a fixed order:
//! 1. Capability (role table), before anything is read
//! 2. Existence of the analysis
//! 3. Ownership, for author-only operations
//! 4. Input shape (content, feedback)
//! 5. Version token against the stored row
//! 6. Transition legality from the current status
//! 7. Readiness threshold, for submission only
//!
//! The row update, its status history entry, and its revision entry are
//! written in that snapshot; the snapshot is aborted on the first failure.

use std::sync::Arc;

use serde::Deserialize;

use postmortem_core::capability::permits;
use postmortem_core::report_gate;
use postmortem_core::validate::{validate_content, validate_feedback, validate_hypothesis};
use postmortem_core::{
    authorize, authorize_view, Action, AnalysisStatus, AnalysisType,
    ContentDraft, EngineError, ForbiddenReason, Hypothesis, ReviewDecision, Role,
    TransitionEvent, Visibility,
};
use postmortem_storage::{
    AnalysisFilter, AnalysisRecord, AnalysisStorage, ChainHead, RevisionRecord,
    StatusHistoryRecord,
};

use crate::actor::Actor;
use crate::audit::{self, AuditReport};
use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::suggest::HypothesisSuggester;
use crate::txn::{check_version, finish, log_failure, storage_err};

const ANALYSIS: &str = "analysis";

/// Input for [`AnalysisStateMachine::create`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewAnalysis {
    pub task_id: String,
    pub analysis_type: AnalysisType,
    /// Initial content; empty with readiness 0 when omitted.
    #[serde(default)]
    pub content: Option<ContentDraft>,
}

/// Optional narrowing for [`AnalysisStateMachine::list`]. Ownership scoping
/// is applied from the caller's role and cannot be widened here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub task_id: Option<String>,
    pub status: Option<AnalysisStatus>,
}

pub struct AnalysisStateMachine<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S> Clone for AnalysisStateMachine<S> {
    fn clone(&self) -> Self {
        AnalysisStateMachine {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

fn require_owner(actor: &Actor, record: &AnalysisRecord, action: Action) -> Result<(), EngineError> {
    if record.owner_id == actor.id {
        Ok(())
    } else {
        Err(EngineError::forbidden(action, ForbiddenReason::NotOwner))
    }
}

fn require_visibility(actor: &Actor) -> Result<(), EngineError> {
    if actor.role.visibility() == Visibility::None {
        return Err(EngineError::not_visible(
            ForbiddenReason::RoleLacksCapability(actor.role),
        ));
    }
    Ok(())
}

fn next_status(record: &AnalysisRecord, event: TransitionEvent) -> Result<AnalysisStatus, EngineError> {
    record
        .status
        .next(event)
        .ok_or_else(|| EngineError::invalid_state(record.status, event))
}

impl<S: AnalysisStorage> AnalysisStateMachine<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        AnalysisStateMachine {
            storage,
            clock,
            ids,
        }
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Open a new DRAFT analysis owned by `actor` against an existing task.
    ///
    /// Revision 1 holds the initial content and is written with the row.
    pub async fn create(
        &self,
        actor: &Actor,
        input: NewAnalysis,
    ) -> Result<AnalysisRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self.create_in(&mut snapshot, actor, input).await;
        let record = finish(self.storage.as_ref(), snapshot, "create_analysis", result).await?;
        tracing::info!(
            analysis_id = %record.id,
            task_id = %record.task_id,
            actor = %actor.id,
            "analysis created"
        );
        Ok(record)
    }

    async fn create_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        input: NewAnalysis,
    ) -> Result<AnalysisRecord, EngineError> {
        authorize(actor.role, Action::CreateAnalysis)?;
        self.storage
            .get_task_for_update(snapshot, &input.task_id)
            .await
            .map_err(storage_err)?;
        let content = validate_content(&input.content.unwrap_or_default())?;

        let now = self.clock.timestamp();
        let mut record = AnalysisRecord {
            id: self.ids.next_id(ANALYSIS),
            task_id: input.task_id,
            owner_id: actor.id.clone(),
            analysis_type: input.analysis_type,
            status: AnalysisStatus::Draft,
            content,
            feedback: None,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
            history_head: ChainHead::genesis(),
            revision_head: ChainHead::genesis(),
        };
        let revision = self.new_revision(actor, &mut record)?;
        self.storage
            .insert_analysis(snapshot, record.clone())
            .await
            .map_err(storage_err)?;
        self.storage
            .append_revision(snapshot, revision)
            .await
            .map_err(storage_err)?;
        Ok(record)
    }

    /// Replace the content of a DRAFT or REJECTED analysis.
    ///
    /// Writes one revision. A REJECTED analysis re-enters DRAFT as part of
    /// the same write and the re-entry is logged as an `edit` transition.
    pub async fn update_content(
        &self,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
        draft: ContentDraft,
    ) -> Result<AnalysisRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .update_content_in(&mut snapshot, actor, analysis_id, expected_version, draft)
            .await;
        let (record, from) =
            finish(self.storage.as_ref(), snapshot, "update_content", result).await?;
        if from != record.status {
            tracing::info!(
                analysis_id = %record.id,
                from = %from,
                to = %record.status,
                actor = %actor.id,
                "analysis transition committed"
            );
        }
        tracing::info!(
            analysis_id = %record.id,
            revision = record.revision_head.sequence,
            actor = %actor.id,
            "analysis content revised"
        );
        Ok(record)
    }

    async fn update_content_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
        draft: ContentDraft,
    ) -> Result<(AnalysisRecord, AnalysisStatus), EngineError> {
        authorize(actor.role, Action::EditAnalysis)?;
        let mut record = self.load(snapshot, analysis_id).await?;
        require_owner(actor, &record, Action::EditAnalysis)?;
        let content = validate_content(&draft)?;
        check_version(ANALYSIS, analysis_id, expected_version, record.version)?;
        let from = record.status;
        let to = next_status(&record, TransitionEvent::Edit)?;

        record.content = content;
        record.updated_at = self.clock.timestamp();
        let revision = self.new_revision(actor, &mut record)?;
        let history = if from != to {
            Some(self.new_history(actor, &mut record, to, TransitionEvent::Edit, None)?)
        } else {
            None
        };

        let version = self
            .storage
            .update_analysis(snapshot, record.clone(), expected_version)
            .await
            .map_err(storage_err)?;
        record.version = version;
        self.storage
            .append_revision(snapshot, revision)
            .await
            .map_err(storage_err)?;
        if let Some(entry) = history {
            self.storage
                .append_status_history(snapshot, entry)
                .await
                .map_err(storage_err)?;
        }
        Ok((record, from))
    }

    /// DRAFT -> SUBMITTED, by the owner, once readiness meets the threshold.
    pub async fn submit(
        &self,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
    ) -> Result<AnalysisRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .submit_in(&mut snapshot, actor, analysis_id, expected_version)
            .await;
        let (record, from) = finish(self.storage.as_ref(), snapshot, "submit", result).await?;
        self.log_transition(actor, &record, from);
        Ok(record)
    }

    async fn submit_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
    ) -> Result<(AnalysisRecord, AnalysisStatus), EngineError> {
        authorize(actor.role, Action::SubmitAnalysis)?;
        let record = self.load(snapshot, analysis_id).await?;
        require_owner(actor, &record, Action::SubmitAnalysis)?;
        check_version(ANALYSIS, analysis_id, expected_version, record.version)?;
        let to = next_status(&record, TransitionEvent::Submit)?;
        record.content.readiness_score.require_submittable()?;
        self.transition_in(snapshot, actor, record, expected_version, to, TransitionEvent::Submit, None)
            .await
    }

    /// SUBMITTED -> APPROVED or REJECTED, by a manager. Rejection requires
    /// feedback, which is stored on the row and attached to the history entry.
    pub async fn review(
        &self,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
        decision: ReviewDecision,
        feedback: Option<&str>,
    ) -> Result<AnalysisRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .review_in(&mut snapshot, actor, analysis_id, expected_version, decision, feedback)
            .await;
        let (record, from) = finish(self.storage.as_ref(), snapshot, "review", result).await?;
        self.log_transition(actor, &record, from);
        Ok(record)
    }

    async fn review_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
        decision: ReviewDecision,
        feedback: Option<&str>,
    ) -> Result<(AnalysisRecord, AnalysisStatus), EngineError> {
        authorize(actor.role, Action::ReviewAnalysis)?;
        let mut record = self.load(snapshot, analysis_id).await?;
        let feedback = validate_feedback(feedback, decision == ReviewDecision::Reject)?;
        check_version(ANALYSIS, analysis_id, expected_version, record.version)?;
        let event = decision.event();
        let to = next_status(&record, event)?;
        record.feedback = feedback.clone();
        self.transition_in(snapshot, actor, record, expected_version, to, event, feedback)
            .await
    }

    /// REJECTED -> DRAFT without touching content, by the owner.
    pub async fn reopen(
        &self,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
    ) -> Result<AnalysisRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .reopen_in(&mut snapshot, actor, analysis_id, expected_version)
            .await;
        let (record, from) = finish(self.storage.as_ref(), snapshot, "reopen", result).await?;
        self.log_transition(actor, &record, from);
        Ok(record)
    }

    async fn reopen_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        analysis_id: &str,
        expected_version: i64,
    ) -> Result<(AnalysisRecord, AnalysisStatus), EngineError> {
        authorize(actor.role, Action::EditAnalysis)?;
        let record = self.load(snapshot, analysis_id).await?;
        require_owner(actor, &record, Action::EditAnalysis)?;
        check_version(ANALYSIS, analysis_id, expected_version, record.version)?;
        let to = next_status(&record, TransitionEvent::Reopen)?;
        self.transition_in(snapshot, actor, record, expected_version, to, TransitionEvent::Reopen, None)
            .await
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// True iff the analysis is APPROVED and `role` is MANAGER.
    ///
    /// Roles without `generate_report` get `false` without a lookup, so the
    /// answer never reveals whether `analysis_id` exists.
    pub async fn can_generate_report(
        &self,
        analysis_id: &str,
        role: Role,
    ) -> Result<bool, EngineError> {
        if !permits(role, Action::GenerateReport) {
            return Ok(false);
        }
        let record = self
            .storage
            .get_analysis(analysis_id)
            .await
            .map_err(storage_err)?;
        Ok(report_gate::can_generate_report(record.status, role))
    }

    pub async fn get(&self, actor: &Actor, analysis_id: &str) -> Result<AnalysisRecord, EngineError> {
        self.visible(actor, analysis_id).await
    }

    /// Analyses the actor may see, oldest first: employees get their own,
    /// managers get all, owners are refused.
    pub async fn list(
        &self,
        actor: &Actor,
        filter: ListFilter,
    ) -> Result<Vec<AnalysisRecord>, EngineError> {
        let owner_id = match actor.role.visibility() {
            Visibility::All => None,
            Visibility::Own => Some(actor.id.clone()),
            Visibility::None => {
                let err = EngineError::not_visible(ForbiddenReason::RoleLacksCapability(actor.role));
                log_failure("list_analyses", &err);
                return Err(err);
            }
        };
        self.storage
            .list_analyses(&AnalysisFilter {
                owner_id,
                task_id: filter.task_id,
                status: filter.status,
            })
            .await
            .map_err(storage_err)
    }

    pub async fn history(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<Vec<StatusHistoryRecord>, EngineError> {
        self.visible(actor, analysis_id).await?;
        self.storage
            .list_status_history(analysis_id)
            .await
            .map_err(storage_err)
    }

    pub async fn revisions(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<Vec<RevisionRecord>, EngineError> {
        self.visible(actor, analysis_id).await?;
        self.storage
            .list_revisions(analysis_id)
            .await
            .map_err(storage_err)
    }

    /// Revision number `n` (1-based).
    pub async fn revision_at(
        &self,
        actor: &Actor,
        analysis_id: &str,
        n: u64,
    ) -> Result<RevisionRecord, EngineError> {
        self.revisions(actor, analysis_id)
            .await?
            .into_iter()
            .find(|r| r.sequence == n)
            .ok_or_else(|| EngineError::not_found("revision", format!("{}#{}", analysis_id, n)))
    }

    /// The content as it stood at the most recent submission.
    pub async fn snapshot_at_submission(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<RevisionRecord, EngineError> {
        let submitted = self
            .history(actor, analysis_id)
            .await?
            .into_iter()
            .rev()
            .find(|e| e.event == TransitionEvent::Submit)
            .ok_or_else(|| EngineError::not_found("submission", analysis_id))?;
        self.revision_at(actor, analysis_id, submitted.revision).await
    }

    /// Re-walk both hash chains against the heads stored on the row.
    pub async fn verify_audit(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<AuditReport, EngineError> {
        let record = self.visible(actor, analysis_id).await?;
        let history = self
            .storage
            .list_status_history(analysis_id)
            .await
            .map_err(storage_err)?;
        let revisions = self
            .storage
            .list_revisions(analysis_id)
            .await
            .map_err(storage_err)?;
        let first_break = audit::verify_history(&history, &record.history_head)
            .and_then(|()| audit::verify_revisions(&revisions, &record.revision_head))
            .err();
        if let Some(broken) = &first_break {
            tracing::warn!(analysis_id, error = %broken, "audit chain verification failed");
        }
        Ok(AuditReport {
            analysis_id: analysis_id.to_string(),
            history_entries: history.len(),
            revision_entries: revisions.len(),
            first_break,
        })
    }

    /// Ask `suggester` for hypotheses and keep the ones that pass the same
    /// validation as typed-in content. Nothing is persisted.
    pub async fn suggest_hypotheses(
        &self,
        actor: &Actor,
        analysis_id: &str,
        suggester: &dyn HypothesisSuggester,
    ) -> Result<Vec<Hypothesis>, EngineError> {
        let record = match self.suggestion_target(actor, analysis_id).await {
            Ok(record) => record,
            Err(e) => {
                log_failure("suggest_hypotheses", &e);
                return Err(e);
            }
        };
        let candidates = suggester.suggest(&record).await.map_err(|e| {
            EngineError::Infrastructure {
                message: e.to_string(),
            }
        })?;

        let mut accepted = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            match validate_hypothesis(&format!("suggestions[{}]", i), candidate) {
                Ok(h) => accepted.push(h),
                Err(e) => tracing::warn!(
                    analysis_id,
                    suggester = suggester.name(),
                    error = %e,
                    "discarding invalid hypothesis suggestion"
                ),
            }
        }
        Ok(accepted)
    }

    async fn suggestion_target(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, EngineError> {
        authorize(actor.role, Action::EditAnalysis)?;
        let record = self
            .storage
            .get_analysis(analysis_id)
            .await
            .map_err(storage_err)?;
        require_owner(actor, &record, Action::EditAnalysis)?;
        Ok(record)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn load(
        &self,
        snapshot: &mut S::Snapshot,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, EngineError> {
        self.storage
            .get_analysis_for_update(snapshot, analysis_id)
            .await
            .map_err(storage_err)
    }

    /// Committed row, if the actor's role and ownership allow reading it.
    async fn visible(&self, actor: &Actor, analysis_id: &str) -> Result<AnalysisRecord, EngineError> {
        let result = self.read_checked(actor, analysis_id).await;
        if let Err(e) = &result {
            log_failure("view_analysis", e);
        }
        result
    }

    async fn read_checked(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, EngineError> {
        require_visibility(actor)?;
        let record = self
            .storage
            .get_analysis(analysis_id)
            .await
            .map_err(storage_err)?;
        authorize_view(actor.role, &actor.id, &record.owner_id)?;
        Ok(record)
    }

    /// Move `record` to `to`, append the history entry, and CAS the row.
    #[allow(clippy::too_many_arguments)]
    async fn transition_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        mut record: AnalysisRecord,
        expected_version: i64,
        to: AnalysisStatus,
        event: TransitionEvent,
        note: Option<String>,
    ) -> Result<(AnalysisRecord, AnalysisStatus), EngineError> {
        let from = record.status;
        record.updated_at = self.clock.timestamp();
        let entry = self.new_history(actor, &mut record, to, event, note)?;
        let version = self
            .storage
            .update_analysis(snapshot, record.clone(), expected_version)
            .await
            .map_err(storage_err)?;
        record.version = version;
        self.storage
            .append_status_history(snapshot, entry)
            .await
            .map_err(storage_err)?;
        Ok((record, from))
    }

    /// Seal a history entry for `record.status -> to` and advance the row's
    /// status and history head.
    fn new_history(
        &self,
        actor: &Actor,
        record: &mut AnalysisRecord,
        to: AnalysisStatus,
        event: TransitionEvent,
        note: Option<String>,
    ) -> Result<StatusHistoryRecord, EngineError> {
        let mut entry = StatusHistoryRecord {
            id: self.ids.next_id("history"),
            analysis_id: record.id.clone(),
            sequence: 0,
            from_status: record.status,
            to_status: to,
            event,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            revision: record.revision_head.sequence,
            note,
            recorded_at: record.updated_at.clone(),
            prev_hash: String::new(),
            hash: String::new(),
        };
        record.history_head = audit::seal_history(&mut entry, &record.history_head)?;
        record.status = to;
        Ok(entry)
    }

    /// Seal a revision of `record.content` and advance the revision head.
    fn new_revision(
        &self,
        actor: &Actor,
        record: &mut AnalysisRecord,
    ) -> Result<RevisionRecord, EngineError> {
        let mut entry = RevisionRecord {
            id: self.ids.next_id("revision"),
            analysis_id: record.id.clone(),
            sequence: 0,
            content: record.content.clone(),
            actor_id: actor.id.clone(),
            recorded_at: record.updated_at.clone(),
            prev_hash: String::new(),
            hash: String::new(),
        };
        record.revision_head = audit::seal_revision(&mut entry, &record.revision_head)?;
        Ok(entry)
    }

    fn log_transition(&self, actor: &Actor, record: &AnalysisRecord, from: AnalysisStatus) {
        tracing::info!(
            analysis_id = %record.id,
            from = %from,
            to = %record.status,
            actor = %actor.id,
            version = record.version,
            "analysis transition committed"
        );
    }
}
