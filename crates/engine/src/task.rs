//! Task workflow: creation, assignment, and the OPEN -> IN_PROGRESS ->
//! COMPLETED lifecycle.

use std::sync::Arc;

use serde::Deserialize;

use postmortem_core::task::MAX_TITLE_CHARS;
use postmortem_core::validate::MAX_TEXT_CHARS;
use postmortem_core::error::check_fields;
use postmortem_core::{
    authorize, authorize_as, Action, EngineError, FieldErrors, ForbiddenReason, TaskStatus,
};
use postmortem_storage::{AnalysisStorage, TaskRecord};

use crate::actor::Actor;
use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::txn::{check_version, finish, log_failure, storage_err};

const TASK: &str = "task";

/// Input for [`TaskService::create_task`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: Option<String>,
}

pub struct TaskService<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S> Clone for TaskService<S> {
    fn clone(&self) -> Self {
        TaskService {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

fn validate_new_task(input: &NewTask) -> Result<NewTask, EngineError> {
    let mut fields = FieldErrors::new();
    let title = input.title.trim();
    if title.is_empty() {
        fields.insert("title".into(), "must not be blank".into());
    } else if title.chars().count() > MAX_TITLE_CHARS {
        fields.insert(
            "title".into(),
            format!("must be at most {} characters", MAX_TITLE_CHARS),
        );
    }
    let description = input.description.trim();
    if description.chars().count() > MAX_TEXT_CHARS {
        fields.insert(
            "description".into(),
            format!("must be at most {} characters", MAX_TEXT_CHARS),
        );
    }
    let assignee = match input.assignee.as_deref().map(str::trim) {
        Some("") => {
            fields.insert("assignee".into(), "must not be blank".into());
            None
        }
        other => other.map(str::to_string),
    };
    check_fields(fields)?;
    Ok(NewTask {
        title: title.to_string(),
        description: description.to_string(),
        assignee,
    })
}

/// Start and complete are open to the assignee and the creator.
fn require_participant(
    actor: &Actor,
    task: &TaskRecord,
    operation: &'static str,
) -> Result<(), EngineError> {
    let assigned = task.assignee.as_deref() == Some(actor.id.as_str());
    if assigned || task.created_by == actor.id {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            operation,
            reason: ForbiddenReason::NotAssignee,
        })
    }
}

impl<S: AnalysisStorage> TaskService<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        TaskService {
            storage,
            clock,
            ids,
        }
    }

    pub async fn create_task(&self, actor: &Actor, input: NewTask) -> Result<TaskRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self.create_in(&mut snapshot, actor, input).await;
        let task = finish(self.storage.as_ref(), snapshot, "create_task", result).await?;
        tracing::info!(task_id = %task.id, actor = %actor.id, "task created");
        Ok(task)
    }

    async fn create_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        input: NewTask,
    ) -> Result<TaskRecord, EngineError> {
        authorize(actor.role, Action::CreateTask)?;
        let input = validate_new_task(&input)?;
        let now = self.clock.timestamp();
        let task = TaskRecord {
            id: self.ids.next_id(TASK),
            title: input.title,
            description: input.description,
            created_by: actor.id.clone(),
            assignee: input.assignee,
            status: TaskStatus::Open,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage
            .insert_task(snapshot, task.clone())
            .await
            .map_err(storage_err)?;
        Ok(task)
    }

    pub async fn assign_task(
        &self,
        actor: &Actor,
        task_id: &str,
        assignee: &str,
        expected_version: i64,
    ) -> Result<TaskRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .assign_in(&mut snapshot, actor, task_id, assignee, expected_version)
            .await;
        let task = finish(self.storage.as_ref(), snapshot, "assign_task", result).await?;
        tracing::info!(task_id, assignee, actor = %actor.id, "task assigned");
        Ok(task)
    }

    async fn assign_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        task_id: &str,
        assignee: &str,
        expected_version: i64,
    ) -> Result<TaskRecord, EngineError> {
        authorize(actor.role, Action::AssignTask)?;
        let mut task = self.load(snapshot, task_id).await?;
        let assignee = assignee.trim();
        if assignee.is_empty() {
            return Err(EngineError::invalid_field("assignee", "must not be blank"));
        }
        check_version(TASK, task_id, expected_version, task.version)?;
        if task.status == TaskStatus::Completed {
            return Err(EngineError::InvalidState {
                status: task.status.to_string(),
                operation: Action::AssignTask.as_str(),
            });
        }
        task.assignee = Some(assignee.to_string());
        self.write(snapshot, task, expected_version).await
    }

    /// OPEN -> IN_PROGRESS.
    pub async fn start_task(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: i64,
    ) -> Result<TaskRecord, EngineError> {
        self.advance(actor, task_id, expected_version, "start_task", TaskStatus::InProgress)
            .await
    }

    /// OPEN or IN_PROGRESS -> COMPLETED. Completed tasks are frozen.
    pub async fn complete_task(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: i64,
    ) -> Result<TaskRecord, EngineError> {
        self.advance(actor, task_id, expected_version, "complete_task", TaskStatus::Completed)
            .await
    }

    async fn advance(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: i64,
        operation: &'static str,
        to: TaskStatus,
    ) -> Result<TaskRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;
        let result = self
            .advance_in(&mut snapshot, actor, task_id, expected_version, operation, to)
            .await;
        let task = finish(self.storage.as_ref(), snapshot, operation, result).await?;
        tracing::info!(task_id, status = %task.status, actor = %actor.id, "task status changed");
        Ok(task)
    }

    async fn advance_in(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        task_id: &str,
        expected_version: i64,
        operation: &'static str,
        to: TaskStatus,
    ) -> Result<TaskRecord, EngineError> {
        authorize_as(actor.role, Action::WorkTask, operation)?;
        let mut task = self.load(snapshot, task_id).await?;
        require_participant(actor, &task, operation)?;
        check_version(TASK, task_id, expected_version, task.version)?;
        let allowed = match to {
            TaskStatus::InProgress => task.status.can_start(),
            TaskStatus::Completed => task.status.can_complete(),
            TaskStatus::Open => false,
        };
        if !allowed {
            return Err(EngineError::InvalidState {
                status: task.status.to_string(),
                operation,
            });
        }
        task.status = to;
        self.write(snapshot, task, expected_version).await
    }

    pub async fn get_task(&self, actor: &Actor, task_id: &str) -> Result<TaskRecord, EngineError> {
        self.require_reader(actor)?;
        self.storage.get_task(task_id).await.map_err(storage_err)
    }

    /// All tasks, oldest first. Employees see every task so they can pick
    /// one to analyse.
    pub async fn list_tasks(&self, actor: &Actor) -> Result<Vec<TaskRecord>, EngineError> {
        self.require_reader(actor)?;
        self.storage.list_tasks().await.map_err(storage_err)
    }

    fn require_reader(&self, actor: &Actor) -> Result<(), EngineError> {
        authorize(actor.role, Action::ViewTask).inspect_err(|err| log_failure("view_task", err))
    }

    async fn load(&self, snapshot: &mut S::Snapshot, task_id: &str) -> Result<TaskRecord, EngineError> {
        self.storage
            .get_task_for_update(snapshot, task_id)
            .await
            .map_err(storage_err)
    }

    async fn write(
        &self,
        snapshot: &mut S::Snapshot,
        mut task: TaskRecord,
        expected_version: i64,
    ) -> Result<TaskRecord, EngineError> {
        task.updated_at = self.clock.timestamp();
        task.version = self
            .storage
            .update_task(snapshot, task.clone(), expected_version)
            .await
            .map_err(storage_err)?;
        Ok(task)
    }
}
