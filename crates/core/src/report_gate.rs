//! Report eligibility.
//!
//! Read-only policy consumed by the report generator: an analysis becomes
//! reportable once approved, and only managers generate reports.

use crate::capability::{authorize, Action, Role};
use crate::error::EngineError;
use crate::status::AnalysisStatus;

/// True iff `role` may generate a report for an analysis in `status`.
pub fn can_generate_report(status: AnalysisStatus, role: Role) -> bool {
    status == AnalysisStatus::Approved && role == Role::Manager
}

/// The same rule as [`can_generate_report`], with the failure kind spelled out.
///
/// Role is checked first so an unauthorized caller learns nothing about the
/// analysis status.
pub fn require_report_eligible(status: AnalysisStatus, role: Role) -> Result<(), EngineError> {
    authorize(role, Action::GenerateReport)?;
    if status != AnalysisStatus::Approved {
        return Err(EngineError::InvalidState {
            status: status.to_string(),
            operation: Action::GenerateReport.as_str(),
        });
    }
    Ok(())
}
