use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::directory::OrgDirectory;
use crate::domain::flow::{FlowLevel, LevelLogic};
use crate::domain::job::Job;
use crate::domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalDenial {
    JobTerminal { status: JobStatus },
    ParentJob,
    NotAwaitingApproval { current_level: u32 },
    LevelMissing { level: u32, level_count: u32 },
    NotListed { level: u32, role: String },
}

impl ApprovalDenial {
    pub fn reason(&self) -> String {
        match self {
            Self::JobTerminal { status } => format!("job is already `{status}`"),
            Self::ParentJob => "parent jobs are aggregates and take no approvals".to_string(),
            Self::NotAwaitingApproval { current_level } => {
                format!("job is not awaiting approval (current level {current_level})")
            }
            Self::LevelMissing { level, level_count } => {
                format!("level {level} does not exist in a {level_count}-level flow")
            }
            Self::NotListed { level, role } => {
                format!("actor is not an approver for level {level} (`{role}`)")
            }
        }
    }

    /// Denials caused by who is acting rather than where the job is.
    pub fn is_actor_denial(&self) -> bool {
        matches!(self, Self::NotListed { .. })
    }
}

/// Answers approval-policy questions against a job's flow snapshot.
pub struct ApprovalFlowResolver<'a, D: ?Sized> {
    directory: &'a D,
}

impl<'a, D> ApprovalFlowResolver<'a, D>
where
    D: OrgDirectory + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn can_act(&self, actor: UserId, job: &Job) -> bool {
        self.check_actor(actor, job).is_ok()
    }

    /// Returns the level the actor may decide on, or why they may not.
    pub fn check_actor<'j>(
        &self,
        actor: UserId,
        job: &'j Job,
    ) -> Result<&'j FlowLevel, ApprovalDenial> {
        if job.status.is_terminal() {
            return Err(ApprovalDenial::JobTerminal { status: job.status });
        }
        if job.is_parent {
            return Err(ApprovalDenial::ParentJob);
        }

        let level_count = job.flow_snapshot.level_count();
        let current_level = job.current_level;
        if current_level == 0 || current_level > level_count {
            return Err(ApprovalDenial::NotAwaitingApproval { current_level });
        }

        let level = job
            .flow_snapshot
            .level(current_level)
            .ok_or(ApprovalDenial::LevelMissing { level: current_level, level_count })?;

        if level.lists(actor) || self.directory.is_approver(actor, level) {
            Ok(level)
        } else {
            Err(ApprovalDenial::NotListed { level: current_level, role: level.role.clone() })
        }
    }

    /// Whether the actor may act on any level of the job's flow; used for
    /// approver-side decisions after approval finished.
    pub fn is_flow_approver(&self, actor: UserId, job: &Job) -> bool {
        job.flow_snapshot
            .levels()
            .iter()
            .any(|level| level.lists(actor) || self.directory.is_approver(actor, level))
    }
}

/// `all`: every listed approver approved in the current round. `any`: one did.
/// Levels listing zero or one approver are satisfied by a single approval.
pub fn level_satisfied(job: &Job, level: &FlowLevel) -> bool {
    let approved: HashSet<UserId> =
        job.approvals_at(level.level).map(|record| record.approver_id).collect();

    if level.approvers.len() <= 1 {
        return !approved.is_empty();
    }

    match level.logic {
        LevelLogic::All => level.approvers.iter().all(|approver| approved.contains(approver)),
        LevelLogic::Any => !approved.is_empty(),
    }
}

pub fn next_level(job: &Job) -> u32 {
    if job.current_level < job.flow_snapshot.level_count() {
        job.current_level + 1
    } else {
        FULLY_APPROVED_LEVEL
    }
}

/// Listed approvers at `level` that have not approved yet in this round.
pub fn outstanding_approvers(job: &Job, level: &FlowLevel) -> Vec<UserId> {
    level
        .approvers
        .iter()
        .copied()
        .filter(|approver| !job.has_approved_at(level.level, *approver))
        .collect()
}
