//! In-memory `AnalysisStorage` backend.
//!
//! Writes are staged in the snapshot and applied under a single lock at
//! commit. Every staged row update remembers the version it was based on; if
//! any committed row has moved past that version when the snapshot commits,
//! the whole snapshot is refused with `Conflict`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::{
    AnalysisFilter, AnalysisRecord, ReportRecord, RevisionRecord, StatusHistoryRecord, TaskRecord,
};
use crate::traits::AnalysisStorage;

const ANALYSIS: &str = "analysis";
const TASK: &str = "task";
const HISTORY: &str = "status history entry";
const REVISION: &str = "revision";
const REPORT: &str = "report";

#[derive(Default)]
struct Tables {
    tasks: BTreeMap<String, TaskRecord>,
    analyses: BTreeMap<String, AnalysisRecord>,
    history: BTreeMap<String, Vec<StatusHistoryRecord>>,
    revisions: BTreeMap<String, Vec<RevisionRecord>>,
    reports: Vec<ReportRecord>,
}

/// A staged row: `base_version` is `None` for inserts.
struct Staged<T> {
    base_version: Option<i64>,
    record: T,
}

/// In-progress transaction for [`MemoryStorage`].
#[derive(Default)]
pub struct MemorySnapshot {
    tasks: BTreeMap<String, Staged<TaskRecord>>,
    analyses: BTreeMap<String, Staged<AnalysisRecord>>,
    history: Vec<StatusHistoryRecord>,
    revisions: Vec<RevisionRecord>,
    reports: Vec<ReportRecord>,
}

/// Process-local storage. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(entity: &'static str, id: &str, expected: i64, actual: Option<i64>) -> StorageError {
    StorageError::Conflict {
        entity,
        id: id.to_string(),
        expected_version: expected,
        actual_version: actual,
    }
}

fn not_found(entity: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn already_exists(entity: &'static str, id: String) -> StorageError {
    StorageError::AlreadyExists { entity, id }
}

fn log_key(analysis_id: &str, sequence: u64) -> String {
    format!("{}#{}", analysis_id, sequence)
}

impl Tables {
    fn analysis_exists(&self, snapshot: &MemorySnapshot, analysis_id: &str) -> bool {
        snapshot.analyses.contains_key(analysis_id) || self.analyses.contains_key(analysis_id)
    }

    /// Check every staged write against committed state.
    fn validate(&self, snapshot: &MemorySnapshot) -> Result<(), StorageError> {
        for (id, staged) in &snapshot.tasks {
            let current = self.tasks.get(id).map(|t| t.version);
            match (staged.base_version, current) {
                (None, Some(_)) => return Err(already_exists(TASK, id.clone())),
                (Some(base), Some(v)) if base != v => {
                    return Err(conflict(TASK, id, base, Some(v)))
                }
                (Some(base), None) => return Err(conflict(TASK, id, base, None)),
                _ => {}
            }
        }
        for (id, staged) in &snapshot.analyses {
            let current = self.analyses.get(id).map(|a| a.version);
            match (staged.base_version, current) {
                (None, Some(_)) => return Err(already_exists(ANALYSIS, id.clone())),
                (Some(base), Some(v)) if base != v => {
                    return Err(conflict(ANALYSIS, id, base, Some(v)))
                }
                (Some(base), None) => return Err(conflict(ANALYSIS, id, base, None)),
                _ => {}
            }
        }
        for entry in &snapshot.history {
            let taken = self
                .history
                .get(&entry.analysis_id)
                .is_some_and(|log| log.iter().any(|e| e.sequence == entry.sequence));
            if taken {
                return Err(already_exists(
                    HISTORY,
                    log_key(&entry.analysis_id, entry.sequence),
                ));
            }
        }
        for entry in &snapshot.revisions {
            let taken = self
                .revisions
                .get(&entry.analysis_id)
                .is_some_and(|log| log.iter().any(|e| e.sequence == entry.sequence));
            if taken {
                return Err(already_exists(
                    REVISION,
                    log_key(&entry.analysis_id, entry.sequence),
                ));
            }
        }
        if let Some(report) = snapshot
            .reports
            .iter()
            .find(|r| self.reports.iter().any(|c| c.id == r.id))
        {
            return Err(already_exists(REPORT, report.id.clone()));
        }
        Ok(())
    }

    fn apply(&mut self, snapshot: MemorySnapshot) {
        for (id, staged) in snapshot.tasks {
            self.tasks.insert(id, staged.record);
        }
        for (id, staged) in snapshot.analyses {
            self.analyses.insert(id, staged.record);
        }
        for entry in snapshot.history {
            self.history
                .entry(entry.analysis_id.clone())
                .or_default()
                .push(entry);
        }
        for entry in snapshot.revisions {
            self.revisions
                .entry(entry.analysis_id.clone())
                .or_default()
                .push(entry);
        }
        self.reports.extend(snapshot.reports);
    }
}

#[async_trait]
impl AnalysisStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        tables.validate(&snapshot)?;
        tables.apply(snapshot);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_task(
        &self,
        snapshot: &mut MemorySnapshot,
        record: TaskRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if tables.tasks.contains_key(&record.id) || snapshot.tasks.contains_key(&record.id) {
            return Err(already_exists(TASK, record.id));
        }
        snapshot.tasks.insert(
            record.id.clone(),
            Staged {
                base_version: None,
                record,
            },
        );
        Ok(())
    }

    async fn get_task_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        task_id: &str,
    ) -> Result<TaskRecord, StorageError> {
        if let Some(staged) = snapshot.tasks.get(task_id) {
            return Ok(staged.record.clone());
        }
        let tables = self.tables.lock().await;
        tables
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| not_found(TASK, task_id))
    }

    async fn update_task(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: TaskRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let base_version = match snapshot.tasks.get(&record.id) {
            Some(staged) => {
                if staged.record.version != expected_version {
                    return Err(conflict(
                        TASK,
                        &record.id,
                        expected_version,
                        Some(staged.record.version),
                    ));
                }
                staged.base_version
            }
            None => {
                let tables = self.tables.lock().await;
                let current = tables
                    .tasks
                    .get(&record.id)
                    .ok_or_else(|| not_found(TASK, &record.id))?;
                if current.version != expected_version {
                    return Err(conflict(
                        TASK,
                        &record.id,
                        expected_version,
                        Some(current.version),
                    ));
                }
                Some(current.version)
            }
        };
        record.version = expected_version + 1;
        let new_version = record.version;
        snapshot.tasks.insert(
            record.id.clone(),
            Staged {
                base_version,
                record,
            },
        );
        Ok(new_version)
    }

    async fn insert_analysis(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AnalysisRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if tables.analyses.contains_key(&record.id) || snapshot.analyses.contains_key(&record.id)
        {
            return Err(already_exists(ANALYSIS, record.id));
        }
        snapshot.analyses.insert(
            record.id.clone(),
            Staged {
                base_version: None,
                record,
            },
        );
        Ok(())
    }

    async fn get_analysis_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, StorageError> {
        if let Some(staged) = snapshot.analyses.get(analysis_id) {
            return Ok(staged.record.clone());
        }
        let tables = self.tables.lock().await;
        tables
            .analyses
            .get(analysis_id)
            .cloned()
            .ok_or_else(|| not_found(ANALYSIS, analysis_id))
    }

    async fn update_analysis(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: AnalysisRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let base_version = match snapshot.analyses.get(&record.id) {
            Some(staged) => {
                if staged.record.version != expected_version {
                    return Err(conflict(
                        ANALYSIS,
                        &record.id,
                        expected_version,
                        Some(staged.record.version),
                    ));
                }
                staged.base_version
            }
            None => {
                let tables = self.tables.lock().await;
                let current = tables
                    .analyses
                    .get(&record.id)
                    .ok_or_else(|| not_found(ANALYSIS, &record.id))?;
                if current.version != expected_version {
                    return Err(conflict(
                        ANALYSIS,
                        &record.id,
                        expected_version,
                        Some(current.version),
                    ));
                }
                Some(current.version)
            }
        };
        record.version = expected_version + 1;
        let new_version = record.version;
        snapshot.analyses.insert(
            record.id.clone(),
            Staged {
                base_version,
                record,
            },
        );
        Ok(new_version)
    }

    async fn append_status_history(
        &self,
        snapshot: &mut MemorySnapshot,
        record: StatusHistoryRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if !tables.analysis_exists(snapshot, &record.analysis_id) {
            return Err(not_found(ANALYSIS, &record.analysis_id));
        }
        let taken = tables
            .history
            .get(&record.analysis_id)
            .is_some_and(|log| log.iter().any(|e| e.sequence == record.sequence))
            || snapshot
                .history
                .iter()
                .any(|e| e.analysis_id == record.analysis_id && e.sequence == record.sequence);
        if taken {
            return Err(already_exists(
                HISTORY,
                log_key(&record.analysis_id, record.sequence),
            ));
        }
        snapshot.history.push(record);
        Ok(())
    }

    async fn append_revision(
        &self,
        snapshot: &mut MemorySnapshot,
        record: RevisionRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if !tables.analysis_exists(snapshot, &record.analysis_id) {
            return Err(not_found(ANALYSIS, &record.analysis_id));
        }
        let taken = tables
            .revisions
            .get(&record.analysis_id)
            .is_some_and(|log| log.iter().any(|e| e.sequence == record.sequence))
            || snapshot
                .revisions
                .iter()
                .any(|e| e.analysis_id == record.analysis_id && e.sequence == record.sequence);
        if taken {
            return Err(already_exists(
                REVISION,
                log_key(&record.analysis_id, record.sequence),
            ));
        }
        snapshot.revisions.push(record);
        Ok(())
    }

    async fn insert_report(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if !tables.analysis_exists(snapshot, &record.analysis_id) {
            return Err(not_found(ANALYSIS, &record.analysis_id));
        }
        if tables.reports.iter().any(|r| r.id == record.id)
            || snapshot.reports.iter().any(|r| r.id == record.id)
        {
            return Err(already_exists(REPORT, record.id));
        }
        snapshot.reports.push(record);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, StorageError> {
        let tables = self.tables.lock().await;
        tables
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| not_found(TASK, task_id))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut tasks: Vec<TaskRecord> = tables.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(tasks)
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRecord, StorageError> {
        let tables = self.tables.lock().await;
        tables
            .analyses
            .get(analysis_id)
            .cloned()
            .ok_or_else(|| not_found(ANALYSIS, analysis_id))
    }

    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
    ) -> Result<Vec<AnalysisRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut analyses: Vec<AnalysisRecord> = tables
            .analyses
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        analyses.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(analyses)
    }

    async fn list_status_history(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<StatusHistoryRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut log = tables.history.get(analysis_id).cloned().unwrap_or_default();
        log.sort_by_key(|e| e.sequence);
        Ok(log)
    }

    async fn list_revisions(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<RevisionRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut log = tables
            .revisions
            .get(analysis_id)
            .cloned()
            .unwrap_or_default();
        log.sort_by_key(|e| e.sequence);
        Ok(log)
    }

    async fn list_reports(
        &self,
        analysis_id: Option<&str>,
    ) -> Result<Vec<ReportRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reports
            .iter()
            .filter(|r| analysis_id.map_or(true, |id| r.analysis_id == id))
            .cloned()
            .collect())
    }
}
