//! Read-only status rollup of a parent job from its children.

use serde::{Deserialize, Serialize};

use crate::domain::job::Job;
use crate::domain::status::JobStatus;
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRollup {
    Rejected,
    PendingApproval,
    Approved,
}

impl ApprovalRollup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkRollup {
    InProgress,
    Completed,
    PendingDependency,
}

impl WorkRollup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PendingDependency => "pending_dependency",
        }
    }

    pub fn as_job_status(&self) -> JobStatus {
        match self {
            Self::InProgress => JobStatus::InProgress,
            Self::Completed => JobStatus::Completed,
            Self::PendingDependency => JobStatus::PendingDependency,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRollup {
    pub approval_status: ApprovalRollup,
    pub job_status: WorkRollup,
    pub child_count: usize,
}

pub fn aggregate(children: &[Job]) -> Result<ParentRollup, WorkflowError> {
    if children.is_empty() {
        return Err(WorkflowError::validation("children", "a parent job needs at least one child"));
    }

    let approval_status = if children
        .iter()
        .any(|child| matches!(child.status, JobStatus::Rejected | JobStatus::Returned))
    {
        ApprovalRollup::Rejected
    } else if children.iter().any(|child| child.status.is_awaiting_approval()) {
        ApprovalRollup::PendingApproval
    } else {
        ApprovalRollup::Approved
    };

    let job_status = if children.iter().any(|child| child.status == JobStatus::InProgress) {
        WorkRollup::InProgress
    } else if children.iter().all(|child| child.status.is_settled_for_rollup()) {
        WorkRollup::Completed
    } else {
        WorkRollup::PendingDependency
    };

    Ok(ParentRollup { approval_status, job_status, child_count: children.len() })
}

#[cfg(test)]
mod tests {
    use super::{aggregate, ApprovalRollup, WorkRollup};
    use crate::domain::flow::LevelLogic;
    use crate::domain::job::Job;
    use crate::domain::status::JobStatus;
    use crate::errors::WorkflowError;
    use crate::test_support::{job_fixture, template};

    fn children(statuses: &[JobStatus]) -> Vec<Job> {
        statuses
            .iter()
            .map(|status| {
                let mut job = job_fixture(&template(&[(LevelLogic::Any, &[1])]));
                job.status = *status;
                job
            })
            .collect()
    }

    #[test]
    fn any_in_progress_child_makes_parent_in_progress() {
        let rollup = aggregate(&children(&[JobStatus::Completed, JobStatus::InProgress]))
            .expect("rollup");
        assert_eq!(rollup.job_status, WorkRollup::InProgress);
        assert_eq!(rollup.approval_status, ApprovalRollup::Approved);
    }

    #[test]
    fn settled_children_complete_the_parent() {
        let rollup = aggregate(&children(&[
            JobStatus::Completed,
            JobStatus::Closed,
            JobStatus::Approved,
            JobStatus::Cancelled,
        ]))
        .expect("rollup");
        assert_eq!(rollup.job_status, WorkRollup::Completed);
        assert_eq!(rollup.child_count, 4);
    }

    #[test]
    fn rejection_dominates_pending_approval() {
        let rollup = aggregate(&children(&[JobStatus::PENDING_APPROVAL, JobStatus::Returned]))
            .expect("rollup");
        assert_eq!(rollup.approval_status, ApprovalRollup::Rejected);

        let rollup = aggregate(&children(&[JobStatus::pending_at(2), JobStatus::Assigned]))
            .expect("rollup");
        assert_eq!(rollup.approval_status, ApprovalRollup::PendingApproval);
        assert_eq!(rollup.job_status, WorkRollup::PendingDependency);
    }

    #[test]
    fn single_child_rolls_up_like_any_other() {
        let rollup = aggregate(&children(&[JobStatus::Assigned])).expect("rollup");
        assert_eq!(rollup.job_status, WorkRollup::PendingDependency);
        assert_eq!(rollup.approval_status, ApprovalRollup::Approved);
    }

    #[test]
    fn parent_without_children_is_rejected() {
        let error = aggregate(&[]).expect_err("no children");
        assert!(matches!(error, WorkflowError::Validation { field: "children", .. }));
    }
}
