use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentDecision;
use crate::domain::job::{Job, JobId, JobTypeId, Priority, ProjectId};
use crate::domain::status::JobStatus;
use crate::domain::user::{DepartmentId, UserId};
use crate::notify::Notification;
use crate::sla::HolidayCalendar;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Approve,
    Return,
    Reject,
    Resubmit,
    AssignManually,
    Start,
    Complete,
    ConfirmClose,
    RequestRevision,
    AssigneeReject,
    ConfirmAssigneeRejection,
    DenyAssigneeRejection,
    ExtendDueDate,
    ShiftDueDate,
    Cancel,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Approve => "approve",
            Self::Return => "return",
            Self::Reject => "reject",
            Self::Resubmit => "resubmit",
            Self::AssignManually => "assign_manually",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::ConfirmClose => "confirm_close",
            Self::RequestRevision => "request_revision",
            Self::AssigneeReject => "assignee_reject",
            Self::ConfirmAssigneeRejection => "confirm_assignee_rejection",
            Self::DenyAssigneeRejection => "deny_assignee_rejection",
            Self::ExtendDueDate => "extend_due_date",
            Self::ShiftDueDate => "shift_due_date",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectMode {
    /// Send back to the requester for resubmission.
    Return,
    /// Terminal rejection.
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    Manual,
    AutoOnView,
}

impl StartTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoOnView => "auto_on_view",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum JobCommand {
    Approve { comment: Option<String> },
    Reject { comment: String, mode: RejectMode },
    Resubmit,
    AssignManually { assignee_id: UserId },
    Start { trigger: StartTrigger },
    Complete { final_link: String, note: Option<String> },
    ConfirmClose,
    RequestRevision { reason: Option<String> },
    AssigneeReject { reason: String },
    ConfirmAssigneeRejection { comment: Option<String>, cc_emails: Vec<String> },
    DenyAssigneeRejection { reason: String },
    ExtendDueDate { days: u32, reason: String },
    Cancel { reason: Option<String> },
}

impl JobCommand {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Approve { .. } => Operation::Approve,
            Self::Reject { mode: RejectMode::Return, .. } => Operation::Return,
            Self::Reject { mode: RejectMode::Reject, .. } => Operation::Reject,
            Self::Resubmit => Operation::Resubmit,
            Self::AssignManually { .. } => Operation::AssignManually,
            Self::Start { .. } => Operation::Start,
            Self::Complete { .. } => Operation::Complete,
            Self::ConfirmClose => Operation::ConfirmClose,
            Self::RequestRevision { .. } => Operation::RequestRevision,
            Self::AssigneeReject { .. } => Operation::AssigneeReject,
            Self::ConfirmAssigneeRejection { .. } => Operation::ConfirmAssigneeRejection,
            Self::DenyAssigneeRejection { .. } => Operation::DenyAssigneeRejection,
            Self::ExtendDueDate { .. } => Operation::ExtendDueDate,
            Self::Cancel { .. } => Operation::Cancel,
        }
    }
}

/// Input for creating a job; the flow template is looked up by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub project_id: ProjectId,
    pub job_type_id: JobTypeId,
    pub department_id: Option<DepartmentId>,
    pub priority: Priority,
    pub requester_id: UserId,
    /// Worker named up front; recorded as the snapshot's default assignee.
    pub nominated_assignee_id: Option<UserId>,
    /// Working days allowed by the job type.
    pub sla_days: u32,
    pub start_date: NaiveDate,
    pub is_parent: bool,
    pub parent_job_id: Option<JobId>,
}

#[derive(Clone, Debug)]
pub struct TransitionContext<'a> {
    pub actor: UserId,
    pub now: DateTime<Utc>,
    pub holidays: &'a HolidayCalendar,
}

impl<'a> TransitionContext<'a> {
    pub fn new(actor: UserId, holidays: &'a HolidayCalendar) -> Self {
        Self { actor, now: Utc::now(), holidays }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Work to run only after the transition has been durably committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum JobEffect {
    Notify(Notification),
    PropagateSlaShift { worker_id: UserId },
}

impl JobEffect {
    /// Fills in the job id on effects produced before the job had one.
    pub fn bind_job(self, job_id: JobId) -> Self {
        match self {
            Self::Notify(mut notification) if notification.job_id.is_unsaved() => {
                notification.job_id = job_id;
                Self::Notify(notification)
            }
            other => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub operation: Operation,
    pub from: JobStatus,
    pub to: JobStatus,
    pub job: Job,
    pub effects: Vec<JobEffect>,
    pub assignment: Option<AssignmentDecision>,
    /// False for accepted no-op calls such as a repeated start.
    pub changed: bool,
}
