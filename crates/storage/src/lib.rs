//! postmortem-storage: the persistence contract for the analysis workflow.
//!
//! The engine depends only on [`AnalysisStorage`]. [`MemoryStorage`] is the
//! process-local backend used by the server and the tests; other backends
//! prove themselves with [`conformance::run_conformance_suite`].

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{
    AnalysisFilter, AnalysisRecord, ChainHead, ReportRecord, RevisionRecord, StatusHistoryRecord,
    TaskRecord, GENESIS_HASH,
};
pub use traits::AnalysisStorage;
