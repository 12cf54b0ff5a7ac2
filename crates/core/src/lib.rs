//! postmortem-core: the closed vocabulary of the analysis workflow.
//!
//! Everything here is pure. No storage, no clock, no I/O. The engine crate
//! consults these tables and validators before it touches a record.
//!
//! - [`Role`] and [`Action`] with the static capability table ([`capability`])
//! - [`AnalysisStatus`] and the transition vocabulary ([`status`])
//! - [`ReadinessScore`] and the submission threshold ([`readiness`])
//! - content shape validation ([`validate`])
//! - [`report_gate`] -- who may turn an analysis into a report
//! - [`EngineError`] -- the kind-tagged failure taxonomy

pub mod capability;
pub mod content;
pub mod error;
pub mod readiness;
pub mod report_gate;
pub mod status;
pub mod task;
pub mod validate;

pub use capability::{authorize, authorize_as, authorize_view, Action, Role, Visibility};
pub use content::{AnalysisContent, AnalysisType, ContentDraft, Hypothesis, HypothesisDraft};
pub use error::{EngineError, ErrorKind, FieldErrors, ForbiddenReason};
pub use readiness::{ReadinessScore, SUBMISSION_THRESHOLD};
pub use status::{AnalysisStatus, ReviewDecision, TransitionEvent};
pub use task::TaskStatus;
