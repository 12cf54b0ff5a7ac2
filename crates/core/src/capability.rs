//! Static role -> action capability table.
//!
//! Consulted before every workflow operation. A denied check fails with
//! [`EngineError::Forbidden`] and no business rule is evaluated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ForbiddenReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Owner,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Employee, Role::Manager, Role::Owner];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Owner => "owner",
        }
    }

    /// Actions this role may invoke, in declaration order.
    pub fn capabilities(self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| permits(self, *action))
            .collect()
    }

    /// Which analyses this role may read.
    pub fn visibility(self) -> Visibility {
        match self {
            Role::Employee => Visibility::Own,
            Role::Manager => Visibility::All,
            Role::Owner => Visibility::None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateTask,
    AssignTask,
    CreateAnalysis,
    EditAnalysis,
    SubmitAnalysis,
    ReviewAnalysis,
    GenerateReport,
    ViewReport,
    /// Start or complete a task the actor created or is assigned to.
    WorkTask,
    ViewTask,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::CreateTask,
        Action::AssignTask,
        Action::CreateAnalysis,
        Action::EditAnalysis,
        Action::SubmitAnalysis,
        Action::ReviewAnalysis,
        Action::GenerateReport,
        Action::ViewReport,
        Action::WorkTask,
        Action::ViewTask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::CreateTask => "create_task",
            Action::AssignTask => "assign_task",
            Action::CreateAnalysis => "create_analysis",
            Action::EditAnalysis => "edit_analysis",
            Action::SubmitAnalysis => "submit_analysis",
            Action::ReviewAnalysis => "review_analysis",
            Action::GenerateReport => "generate_report",
            Action::ViewReport => "view_report",
            Action::WorkTask => "work_task",
            Action::ViewTask => "view_task",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read scope for analysis listings and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only analyses the actor owns.
    Own,
    All,
    /// Report-only roles see no analyses at all.
    None,
}

/// The capability table.
///
/// Exhaustive over both enums: adding a role or an action without deciding
/// its row here is a compile error.
pub fn permits(role: Role, action: Action) -> bool {
    use Action::*;
    match role {
        Role::Employee => match action {
            CreateAnalysis | EditAnalysis | SubmitAnalysis | WorkTask | ViewTask => true,
            CreateTask | AssignTask | ReviewAnalysis | GenerateReport | ViewReport => false,
        },
        Role::Manager => match action {
            CreateTask | AssignTask | CreateAnalysis | EditAnalysis | SubmitAnalysis
            | ReviewAnalysis | GenerateReport | ViewReport | WorkTask | ViewTask => true,
        },
        Role::Owner => match action {
            ViewReport => true,
            CreateTask | AssignTask | CreateAnalysis | EditAnalysis | SubmitAnalysis
            | ReviewAnalysis | GenerateReport | WorkTask | ViewTask => false,
        },
    }
}

/// Fail with `Forbidden` unless `role` may invoke `action`.
pub fn authorize(role: Role, action: Action) -> Result<(), EngineError> {
    authorize_as(role, action, action.as_str())
}

/// Like [`authorize`], but the refusal names `operation` instead of the
/// table action. Used where several operations share one capability row.
pub fn authorize_as(
    role: Role,
    action: Action,
    operation: &'static str,
) -> Result<(), EngineError> {
    if permits(role, action) {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            operation,
            reason: ForbiddenReason::RoleLacksCapability(role),
        })
    }
}

/// Fail with `Forbidden` unless `role` may read an analysis owned by `owner_id`.
pub fn authorize_view(role: Role, actor_id: &str, owner_id: &str) -> Result<(), EngineError> {
    match role.visibility() {
        Visibility::All => Ok(()),
        Visibility::Own if actor_id == owner_id => Ok(()),
        Visibility::Own => Err(EngineError::not_visible(ForbiddenReason::NotOwner)),
        Visibility::None => Err(EngineError::not_visible(
            ForbiddenReason::RoleLacksCapability(role),
        )),
    }
}
