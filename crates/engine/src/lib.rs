//! postmortem-engine: the analysis lifecycle on top of [`AnalysisStorage`].
//!
//! Three services share one storage handle, one [`Clock`], and one
//! [`IdGenerator`]:
//!
//! - [`AnalysisStateMachine`] drives DRAFT -> SUBMITTED -> APPROVED/REJECTED
//!   and writes the status history and revision chains
//! - [`TaskService`] owns the tasks analyses are filed against
//! - [`ReportService`] turns APPROVED analyses into executive summaries
//!
//! [`Workflow`] bundles the three for callers that want all of them.

pub mod actor;
pub mod audit;
pub mod clock;
pub mod ids;
pub mod machine;
pub mod report;
pub mod suggest;
pub mod task;
mod txn;

use std::sync::Arc;

use postmortem_storage::AnalysisStorage;

pub use actor::Actor;
pub use audit::{AuditError, AuditLog, AuditReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{IdGenerator, SequentialIds, UuidIds};
pub use machine::{AnalysisStateMachine, ListFilter, NewAnalysis};
pub use report::ReportService;
pub use suggest::{HeuristicSuggester, HypothesisSuggester, SuggestError};
pub use task::{NewTask, TaskService};

pub struct Workflow<S> {
    pub analyses: AnalysisStateMachine<S>,
    pub tasks: TaskService<S>,
    pub reports: ReportService<S>,
}

impl<S> Clone for Workflow<S> {
    fn clone(&self) -> Self {
        Workflow {
            analyses: self.analyses.clone(),
            tasks: self.tasks.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl<S: AnalysisStorage> Workflow<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Workflow {
            analyses: AnalysisStateMachine::new(
                Arc::clone(&storage),
                Arc::clone(&clock),
                Arc::clone(&ids),
            ),
            tasks: TaskService::new(Arc::clone(&storage), Arc::clone(&clock), Arc::clone(&ids)),
            reports: ReportService::new(storage, clock, ids),
        }
    }

    /// Wall clock and random ids.
    pub fn with_defaults(storage: Arc<S>) -> Self {
        Self::new(storage, Arc::new(SystemClock), Arc::new(UuidIds))
    }
}
