use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{JobTypeId, ProjectId};
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowTemplateId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelLogic {
    All,
    Any,
}

impl LevelLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLevel {
    pub level: u32,
    pub role: String,
    pub logic: LevelLogic,
    pub approvers: Vec<UserId>,
}

impl FlowLevel {
    pub fn lists(&self, actor: UserId) -> bool {
        self.approvers.contains(&actor)
    }
}

/// Live approval flow configuration. Jobs never reference this directly; they
/// carry a [`FlowSnapshot`] captured at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTemplate {
    pub id: Option<FlowTemplateId>,
    pub name: String,
    pub project_id: Option<ProjectId>,
    pub job_type_id: Option<JobTypeId>,
    pub levels: Vec<FlowLevel>,
    pub default_assignee_id: Option<UserId>,
}

impl FlowTemplate {
    /// Template with no levels: jobs bound to it skip approval.
    pub fn skip_approval() -> Self {
        Self {
            id: None,
            name: "skip-approval".to_string(),
            project_id: None,
            job_type_id: None,
            levels: Vec::new(),
            default_assignee_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    template_id: Option<FlowTemplateId>,
    name: String,
    levels: Vec<FlowLevel>,
    default_assignee_id: Option<UserId>,
    captured_at: DateTime<Utc>,
}

impl FlowSnapshot {
    /// Copies the template as it is right now. Levels are renumbered 1..=N in
    /// template order; an explicitly nominated assignee replaces the template
    /// default.
    pub fn capture(
        template: &FlowTemplate,
        nominated_assignee: Option<UserId>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let levels = template
            .levels
            .iter()
            .enumerate()
            .map(|(index, level)| FlowLevel {
                level: index as u32 + 1,
                role: level.role.clone(),
                logic: level.logic,
                approvers: dedup_preserving_order(&level.approvers),
            })
            .collect();

        Self {
            template_id: template.id,
            name: template.name.clone(),
            levels,
            default_assignee_id: nominated_assignee.or(template.default_assignee_id),
            captured_at,
        }
    }

    pub fn template_id(&self) -> Option<FlowTemplateId> {
        self.template_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[FlowLevel] {
        &self.levels
    }

    pub fn level(&self, level: u32) -> Option<&FlowLevel> {
        if level == 0 {
            return None;
        }
        self.levels.get(level as usize - 1)
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn skips_approval(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn default_assignee_id(&self) -> Option<UserId> {
        self.default_assignee_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn lists_anywhere(&self, actor: UserId) -> bool {
        self.levels.iter().any(|level| level.lists(actor))
    }
}

fn dedup_preserving_order(approvers: &[UserId]) -> Vec<UserId> {
    let mut seen = Vec::with_capacity(approvers.len());
    for approver in approvers {
        if !seen.contains(approver) {
            seen.push(*approver);
        }
    }
    seen
}
