//! Analysis status vocabulary and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Draft => "DRAFT",
            AnalysisStatus::Submitted => "SUBMITTED",
            AnalysisStatus::Approved => "APPROVED",
            AnalysisStatus::Rejected => "REJECTED",
        }
    }

    /// Content may only be written while the author holds the pen.
    pub fn is_editable(self) -> bool {
        matches!(self, AnalysisStatus::Draft | AnalysisStatus::Rejected)
    }

    pub fn is_terminal(self) -> bool {
        self == AnalysisStatus::Approved
    }

    /// Target status for `event` fired from `self`, or `None` if illegal.
    ///
    /// Guards (ownership, role, readiness, feedback) are evaluated by the
    /// engine; this table only encodes which edges exist.
    pub fn next(self, event: TransitionEvent) -> Option<AnalysisStatus> {
        use AnalysisStatus::*;
        use TransitionEvent::*;
        match (self, event) {
            (Draft, Submit) => Some(Submitted),
            (Submitted, Approve) => Some(Approved),
            (Submitted, Reject) => Some(Rejected),
            (Rejected, Edit) | (Rejected, Reopen) => Some(Draft),
            // A content edit in DRAFT keeps the status; no transition is logged.
            (Draft, Edit) => Some(Draft),
            (Draft, Approve | Reject | Reopen)
            | (Submitted, Submit | Edit | Reopen)
            | (Approved, _)
            | (Rejected, Submit | Approve | Reject) => None,
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the analysis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    Submit,
    Approve,
    Reject,
    /// Content write by the owner.
    Edit,
    /// Explicit return of a rejected analysis to the author.
    Reopen,
}

impl TransitionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionEvent::Submit => "submit",
            TransitionEvent::Approve => "approve",
            TransitionEvent::Reject => "reject",
            TransitionEvent::Edit => "edit",
            TransitionEvent::Reopen => "reopen",
        }
    }
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn event(self) -> TransitionEvent {
        match self {
            ReviewDecision::Approve => TransitionEvent::Approve,
            ReviewDecision::Reject => TransitionEvent::Reject,
        }
    }
}
