use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::flow::FlowSnapshot;
use crate::domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
use crate::domain::user::{DepartmentId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl JobId {
    /// Placeholder carried by a job that has not been persisted yet.
    pub const UNSAVED: Self = Self(0);

    pub fn is_unsaved(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTypeId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobCode(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCodeFormat {
    pub prefix: String,
    pub width: usize,
}

impl Default for JobCodeFormat {
    fn default() -> Self {
        Self { prefix: "DJ".to_string(), width: 5 }
    }
}

impl JobCodeFormat {
    pub fn format(&self, id: JobId) -> JobCode {
        JobCode(format!("{}-{:0width$}", self.prefix, id.0, width = self.width))
    }

    pub fn parse(&self, code: &str) -> Option<JobId> {
        let (prefix, digits) = code.trim().split_once('-')?;
        if !prefix.eq_ignore_ascii_case(&self.prefix) || digits.is_empty() {
            return None;
        }
        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        digits.parse::<i64>().ok().filter(|id| *id > 0).map(JobId)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Returned,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub step_number: u32,
    /// Submission round; bumped each time a returned job is resubmitted.
    pub round: u32,
    pub approver_id: UserId,
    pub decision: ApprovalDecision,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    Submitted,
    Approved,
    Returned,
    Rejected,
    Resubmitted,
    Assigned,
    Started,
    Completed,
    Closed,
    RevisionRequested,
    AssigneeRejected,
    AssigneeRejectionConfirmed,
    AssigneeRejectionDenied,
    DueDateExtended,
    DueDateShifted,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub actor_id: Option<UserId>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub code: JobCode,
    pub title: String,
    pub project_id: ProjectId,
    pub job_type_id: JobTypeId,
    pub department_id: Option<DepartmentId>,
    pub priority: Priority,
    pub status: JobStatus,
    pub current_level: u32,
    pub approval_round: u32,
    pub requester_id: UserId,
    pub assignee_id: Option<UserId>,
    pub due_date: NaiveDate,
    pub original_due_date: Option<NaiveDate>,
    pub shifted_by_job_id: Option<JobId>,
    pub extension_count: u32,
    pub is_parent: bool,
    pub parent_job_id: Option<JobId>,
    pub flow_snapshot: FlowSnapshot,
    pub approvals: Vec<ApprovalRecord>,
    pub activity: Vec<ActivityEntry>,
    /// Working status to restore if an assignee rejection is denied.
    pub resume_status: Option<JobStatus>,
    pub final_link: Option<String>,
    pub completion_note: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// The worker this job occupies: the assignee once assigned, otherwise the
    /// default assignee carried on the flow snapshot.
    pub fn worker_id(&self) -> Option<UserId> {
        self.assignee_id.or(self.flow_snapshot.default_assignee_id())
    }

    pub fn is_fully_approved(&self) -> bool {
        self.current_level == FULLY_APPROVED_LEVEL
    }

    pub fn approvals_at(&self, step_number: u32) -> impl Iterator<Item = &ApprovalRecord> {
        let round = self.approval_round;
        self.approvals.iter().filter(move |record| {
            record.round == round
                && record.step_number == step_number
                && record.decision == ApprovalDecision::Approved
        })
    }

    pub fn has_approved_at(&self, step_number: u32, approver: UserId) -> bool {
        self.approvals_at(step_number).any(|record| record.approver_id == approver)
    }

    /// Moves the due date later, remembering the first date ever promised.
    /// Returns the previous due date.
    pub fn push_due_date(&mut self, new_due_date: NaiveDate) -> NaiveDate {
        let previous = self.due_date;
        if self.original_due_date.is_none() {
            self.original_due_date = Some(previous);
        }
        self.due_date = new_due_date.max(previous);
        previous
    }

    pub fn log_activity(
        &mut self,
        kind: ActivityKind,
        actor_id: Option<UserId>,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) {
        self.activity.push(ActivityEntry { kind, actor_id, note, occurred_at });
    }
}

#[cfg(test)]
mod tests {
    use super::{JobCodeFormat, JobId, Priority};

    #[test]
    fn job_codes_are_zero_padded_and_parse_back() {
        let format = JobCodeFormat::default();
        let code = format.format(JobId(42));

        assert_eq!(code.0, "DJ-00042");
        assert_eq!(format.parse("DJ-00042"), Some(JobId(42)));
        assert_eq!(format.parse("dj-7"), Some(JobId(7)));
    }

    #[test]
    fn job_code_parse_rejects_foreign_prefix_and_garbage() {
        let format = JobCodeFormat::default();

        assert_eq!(format.parse("PR-00042"), None);
        assert_eq!(format.parse("DJ-"), None);
        assert_eq!(format.parse("DJ-00x1"), None);
        assert_eq!(format.parse("DJ-00000"), None);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!(Priority::parse(" Urgent "), Some(Priority::Urgent));
        assert_eq!(Priority::parse("low"), None);
        assert_eq!(Priority::High.as_str(), "high");
    }
}
