use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::flow::FlowLevel;
use crate::domain::user::{DepartmentId, UserId};

/// Identity and org-chart lookups owned by the surrounding application.
pub trait OrgDirectory: Send + Sync {
    /// Role-based eligibility for a level, on top of the approvers it lists.
    fn is_approver(&self, actor: UserId, level: &FlowLevel) -> bool;
    fn team_lead(&self, user: UserId) -> Option<UserId>;
    fn department_of(&self, user: UserId) -> Option<DepartmentId>;
    fn department_manager(&self, department: DepartmentId) -> Option<UserId>;
    fn is_active(&self, user: UserId) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub active: bool,
    pub roles: Vec<String>,
    pub team_lead_id: Option<UserId>,
    pub department_id: Option<DepartmentId>,
}

impl DirectoryUser {
    pub fn active(id: UserId) -> Self {
        Self { id, active: true, roles: Vec::new(), team_lead_id: None, department_id: None }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_team_lead(mut self, team_lead_id: UserId) -> Self {
        self.team_lead_id = Some(team_lead_id);
        self
    }

    pub fn in_department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryOrgDirectory {
    users: HashMap<UserId, DirectoryUser>,
    department_managers: HashMap<DepartmentId, UserId>,
}

impl InMemoryOrgDirectory {
    pub fn with_user(mut self, user: DirectoryUser) -> Self {
        self.users.insert(user.id, user);
        self
    }

    pub fn with_department_manager(mut self, department: DepartmentId, manager: UserId) -> Self {
        self.department_managers.insert(department, manager);
        self
    }

    fn roles_of(&self, user: UserId) -> HashSet<String> {
        self.users
            .get(&user)
            .map(|entry| entry.roles.iter().map(|role| normalize_role(role)).collect())
            .unwrap_or_default()
    }
}

impl OrgDirectory for InMemoryOrgDirectory {
    fn is_approver(&self, actor: UserId, level: &FlowLevel) -> bool {
        if !self.is_active(actor) {
            return false;
        }
        let role = normalize_role(&level.role);
        !role.is_empty() && self.roles_of(actor).contains(&role)
    }

    fn team_lead(&self, user: UserId) -> Option<UserId> {
        self.users.get(&user).and_then(|entry| entry.team_lead_id)
    }

    fn department_of(&self, user: UserId) -> Option<DepartmentId> {
        self.users.get(&user).and_then(|entry| entry.department_id)
    }

    fn department_manager(&self, department: DepartmentId) -> Option<UserId> {
        self.department_managers.get(&department).copied()
    }

    fn is_active(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|entry| entry.active)
    }
}

fn normalize_role(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
