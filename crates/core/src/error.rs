use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::capability::{Action, Role};
use crate::status::{AnalysisStatus, TransitionEvent};

/// Field path (e.g. `hypotheses[0].confidence`) to human-readable message.
pub type FieldErrors = BTreeMap<String, String>;

/// Stable classification of an [`EngineError`].
///
/// The boundary layer maps these to transport codes; the core never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailed,
    Forbidden,
    InvalidState,
    Conflict,
    NotFound,
    Infrastructure,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why an actor was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// The role's capability table does not include the action.
    RoleLacksCapability(Role),
    /// The action is restricted to the analysis (or task) owner.
    NotOwner,
    /// The action is restricted to the task's assignee or creator.
    NotAssignee,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForbiddenReason::RoleLacksCapability(role) => {
                write!(f, "role '{}' lacks this capability", role)
            }
            ForbiddenReason::NotOwner => f.write_str("actor is not the owner"),
            ForbiddenReason::NotAssignee => f.write_str("actor is not assigned to the task"),
        }
    }
}

/// Every failure the workflow engine can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Malformed or out-of-range input. Carries one message per offending field.
    #[error("validation failed: {}", summarize(.fields))]
    ValidationFailed { fields: FieldErrors },

    /// The actor may not perform the action. Checked before any business rule.
    #[error("forbidden: cannot {operation}: {reason}")]
    Forbidden {
        operation: &'static str,
        reason: ForbiddenReason,
    },

    /// The requested event is not legal from the record's current status.
    #[error("invalid state: cannot {operation} while {status}")]
    InvalidState {
        status: String,
        operation: &'static str,
    },

    /// Optimistic version mismatch, or a duplicate key. `actual_version` is
    /// `None` when the backend could not report the current version.
    #[error("conflict on {entity} '{id}': {}", describe_conflict(.expected_version, .actual_version))]
    Conflict {
        entity: &'static str,
        id: String,
        expected_version: i64,
        actual_version: Option<i64>,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Transient persistence failure. Never conflated with `Conflict`.
    #[error("infrastructure failure: {message}")]
    Infrastructure { message: String },
}

fn describe_conflict(expected: &i64, actual: &Option<i64>) -> String {
    match actual {
        Some(actual) => format!("expected version {}, found {}", expected, actual),
        None => format!("expected version {}, record changed concurrently", expected),
    }
}

fn summarize(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(field, msg)| format!("{}: {}", field, msg))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Infrastructure { .. } => ErrorKind::Infrastructure,
        }
    }

    /// A single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), message.into());
        EngineError::ValidationFailed { fields }
    }

    pub fn forbidden(action: Action, reason: ForbiddenReason) -> Self {
        EngineError::Forbidden {
            operation: action.as_str(),
            reason,
        }
    }

    /// Refusal to read an analysis outside the role's visibility.
    pub fn not_visible(reason: ForbiddenReason) -> Self {
        EngineError::Forbidden {
            operation: "view_analysis",
            reason,
        }
    }

    pub fn invalid_state(status: AnalysisStatus, event: TransitionEvent) -> Self {
        EngineError::InvalidState {
            status: status.to_string(),
            operation: event.as_str(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Field-level messages, present only for `ValidationFailed`.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            EngineError::ValidationFailed { fields } => Some(fields),
            _ => None,
        }
    }
}

/// Turn a collected set of field errors into a result.
pub fn check_fields(fields: FieldErrors) -> Result<(), EngineError> {
    if fields.is_empty() {
        Ok(())
    } else {
        Err(EngineError::ValidationFailed { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_codes() {
        let cases = [
            (EngineError::invalid_field("x", "bad"), "validation_failed"),
            (
                EngineError::forbidden(Action::ReviewAnalysis, ForbiddenReason::NotOwner),
                "forbidden",
            ),
            (
                EngineError::invalid_state(AnalysisStatus::Approved, TransitionEvent::Submit),
                "invalid_state",
            ),
            (
                EngineError::Conflict {
                    entity: "analysis",
                    id: "a-1".into(),
                    expected_version: 1,
                    actual_version: Some(2),
                },
                "conflict",
            ),
            (EngineError::not_found("analysis", "a-1"), "not_found"),
            (
                EngineError::Infrastructure {
                    message: "connection reset".into(),
                },
                "infrastructure",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.kind().code(), code);
        }
    }

    #[test]
    fn validation_message_lists_every_field() {
        let mut fields = FieldErrors::new();
        fields.insert("readiness_score".into(), "must be at most 100".into());
        fields.insert("symptoms[0]".into(), "must not be blank".into());
        let err = EngineError::ValidationFailed { fields };
        let msg = err.to_string();
        assert!(msg.contains("readiness_score: must be at most 100"));
        assert!(msg.contains("symptoms[0]: must not be blank"));
        assert_eq!(err.field_errors().map(|f| f.len()), Some(2));
    }

    #[test]
    fn forbidden_message_names_action_and_role() {
        let err = EngineError::forbidden(
            Action::GenerateReport,
            ForbiddenReason::RoleLacksCapability(Role::Employee),
        );
        assert_eq!(
            err.to_string(),
            "forbidden: cannot generate_report: role 'employee' lacks this capability"
        );
    }

    #[test]
    fn conflict_message_without_actual_version() {
        let err = EngineError::Conflict {
            entity: "analysis",
            id: "a-1".into(),
            expected_version: 3,
            actual_version: None,
        };
        assert_eq!(
            err.to_string(),
            "conflict on analysis 'a-1': expected version 3, record changed concurrently"
        );
    }

    #[test]
    fn check_fields_passes_when_empty() {
        assert!(check_fields(FieldErrors::new()).is_ok());
    }
}
