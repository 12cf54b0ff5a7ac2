//! Executive reports, generated behind the report gate.

use std::fmt::Write as _;
use std::sync::Arc;

use postmortem_core::report_gate::require_report_eligible;
use postmortem_core::{authorize, Action, EngineError, TransitionEvent};
use postmortem_storage::{AnalysisRecord, AnalysisStorage, ReportRecord, StatusHistoryRecord};

use crate::actor::Actor;
use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::txn::{finish, log_failure, storage_err};

pub struct ReportService<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S> Clone for ReportService<S> {
    fn clone(&self) -> Self {
        ReportService {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

/// Plain-text executive summary. Depends only on its inputs.
pub fn render_summary(analysis: &AnalysisRecord, approval: Option<&StatusHistoryRecord>) -> String {
    let content = &analysis.content;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} incident analysis {} (task {})",
        analysis.analysis_type, analysis.id, analysis.task_id
    );
    match approval {
        Some(entry) => {
            let _ = writeln!(out, "Approved by {} at {}", entry.actor_id, entry.recorded_at);
        }
        None => {
            let _ = writeln!(out, "Approved by: unknown");
        }
    }
    let _ = writeln!(out, "Readiness: {}/100", content.readiness_score);

    for (heading, lines) in [("Symptoms", &content.symptoms), ("Signals", &content.signals)] {
        let _ = writeln!(out, "{}:", heading);
        if lines.is_empty() {
            let _ = writeln!(out, "- none recorded");
        }
        for line in lines {
            let _ = writeln!(out, "- {}", line);
        }
    }

    match content.leading_hypothesis() {
        Some(h) => {
            let _ = writeln!(
                out,
                "Leading hypothesis ({}% confidence): {}",
                h.confidence, h.text
            );
            if !h.evidence.is_empty() {
                let _ = writeln!(out, "Evidence: {}", h.evidence.join("; "));
            }
        }
        None => {
            let _ = writeln!(out, "Leading hypothesis: none recorded");
        }
    }
    if let Some(feedback) = &analysis.feedback {
        let _ = writeln!(out, "Reviewer notes: {}", feedback);
    }
    out
}

impl<S: AnalysisStorage> ReportService<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        ReportService {
            storage,
            clock,
            ids,
        }
    }

    /// Generate a report for an APPROVED analysis. Managers only.
    ///
    /// Role is checked before the analysis is read, then the gate is applied
    /// to its status. Each call produces a new report.
    pub async fn generate_report(
        &self,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<ReportRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self.generate_in(&mut snapshot, actor, analysis_id).await;
        let report = finish(self.storage.as_ref(), snapshot, "generate_report", result).await?;
        tracing::info!(
            report_id = %report.id,
            analysis_id,
            actor = %actor.id,
            "report generated"
        );
        Ok(report)
    }

    async fn generate_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        analysis_id: &str,
    ) -> Result<ReportRecord, EngineError> {
        authorize(actor.role, Action::GenerateReport)?;
        let analysis = self
            .storage
            .get_analysis_for_update(snapshot, analysis_id)
            .await
            .map_err(storage_err)?;
        require_report_eligible(analysis.status, actor.role)?;

        let history = self
            .storage
            .list_status_history(analysis_id)
            .await
            .map_err(storage_err)?;
        let approval = history
            .iter()
            .rev()
            .find(|e| e.event == TransitionEvent::Approve);

        let report = ReportRecord {
            id: self.ids.next_id("report"),
            analysis_id: analysis_id.to_string(),
            summary: render_summary(&analysis, approval),
            generated_by: actor.id.clone(),
            created_at: self.clock.timestamp(),
        };
        self.storage
            .insert_report(snapshot, report.clone())
            .await
            .map_err(storage_err)?;
        Ok(report)
    }

    /// Reports, optionally for one analysis. Requires `view_report`.
    pub async fn list_reports(
        &self,
        actor: &Actor,
        analysis_id: Option<&str>,
    ) -> Result<Vec<ReportRecord>, EngineError> {
        if let Err(e) = authorize(actor.role, Action::ViewReport) {
            log_failure("list_reports", &e);
            return Err(e);
        }
        self.storage
            .list_reports(analysis_id)
            .await
            .map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_core::{
        AnalysisContent, AnalysisStatus, AnalysisType, Hypothesis, ReadinessScore, Role,
    };
    use postmortem_storage::ChainHead;

    fn approved() -> AnalysisRecord {
        AnalysisRecord {
            id: "analysis-1".into(),
            task_id: "task-1".into(),
            owner_id: "alice".into(),
            analysis_type: AnalysisType::Latency,
            status: AnalysisStatus::Approved,
            content: AnalysisContent {
                symptoms: vec!["Checkout p99 at 4s".into()],
                signals: vec![],
                hypotheses: vec![
                    Hypothesis {
                        text: "Cache stampede".into(),
                        confidence: 40,
                        evidence: vec![],
                    },
                    Hypothesis {
                        text: "Connection pool exhaustion".into(),
                        confidence: 70,
                        evidence: vec!["pool at 100%".into(), "waits in traces".into()],
                    },
                ],
                readiness_score: ReadinessScore::new(82).unwrap(),
            },
            feedback: None,
            version: 3,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T02:00:00Z".into(),
            history_head: ChainHead::genesis(),
            revision_head: ChainHead::genesis(),
        }
    }

    fn approval() -> StatusHistoryRecord {
        StatusHistoryRecord {
            id: "history-9".into(),
            analysis_id: "analysis-1".into(),
            sequence: 2,
            from_status: AnalysisStatus::Submitted,
            to_status: AnalysisStatus::Approved,
            event: TransitionEvent::Approve,
            actor_id: "bob".into(),
            actor_role: Role::Manager,
            revision: 1,
            note: None,
            recorded_at: "2025-01-01T02:00:00Z".into(),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn summary_is_deterministic_and_leads_with_top_hypothesis() {
        let summary = render_summary(&approved(), Some(&approval()));
        assert_eq!(
            summary,
            "LATENCY incident analysis analysis-1 (task task-1)\n\
             Approved by bob at 2025-01-01T02:00:00Z\n\
             Readiness: 82/100\n\
             Symptoms:\n\
             - Checkout p99 at 4s\n\
             Signals:\n\
             - none recorded\n\
             Leading hypothesis (70% confidence): Connection pool exhaustion\n\
             Evidence: pool at 100%; waits in traces\n"
        );
        assert_eq!(summary, render_summary(&approved(), Some(&approval())));
    }

    #[test]
    fn summary_without_hypotheses() {
        let mut analysis = approved();
        analysis.content.hypotheses.clear();
        let summary = render_summary(&analysis, None);
        assert!(summary.contains("Approved by: unknown"));
        assert!(summary.contains("Leading hypothesis: none recorded"));
    }
}
