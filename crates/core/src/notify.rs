use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::job::JobId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequested,
    JobReturned,
    JobRejected,
    JobAssigned,
    ManualAssignmentRequired,
    WorkStarted,
    JobCompleted,
    JobClosed,
    RevisionRequested,
    AssigneeRejected,
    AssigneeRejectionConfirmed,
    AssigneeRejectionDenied,
    DeadlineExtended,
    DeadlineShifted,
    JobCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::JobReturned => "job_returned",
            Self::JobRejected => "job_rejected",
            Self::JobAssigned => "job_assigned",
            Self::ManualAssignmentRequired => "manual_assignment_required",
            Self::WorkStarted => "work_started",
            Self::JobCompleted => "job_completed",
            Self::JobClosed => "job_closed",
            Self::RevisionRequested => "revision_requested",
            Self::AssigneeRejected => "assignee_rejected",
            Self::AssigneeRejectionConfirmed => "assignee_rejection_confirmed",
            Self::AssigneeRejectionDenied => "assignee_rejection_denied",
            Self::DeadlineExtended => "deadline_extended",
            Self::DeadlineShifted => "deadline_shifted",
            Self::JobCancelled => "job_cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub job_id: JobId,
    pub recipients: Vec<UserId>,
    pub cc_emails: Vec<String>,
    pub payload: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, job_id: JobId) -> Self {
        Self {
            kind,
            job_id,
            recipients: Vec::new(),
            cc_emails: Vec::new(),
            payload: BTreeMap::new(),
        }
    }

    pub fn to(mut self, recipients: impl IntoIterator<Item = UserId>) -> Self {
        for recipient in recipients {
            if !self.recipients.contains(&recipient) {
                self.recipients.push(recipient);
            }
        }
        self
    }

    pub fn cc(mut self, emails: impl IntoIterator<Item = String>) -> Self {
        self.cc_emails.extend(emails);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget delivery owned by the surrounding application.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Delivers one notification, logging instead of propagating failure.
pub fn dispatch<N>(notifier: &N, notification: &Notification) -> bool
where
    N: Notifier + ?Sized,
{
    match notifier.notify(notification) {
        Ok(()) => true,
        Err(error) => {
            warn!(
                event_name = "workflow.notification.failed",
                job_id = notification.job_id.0,
                kind = notification.kind.as_str(),
                error = %error,
                "notification delivery failed; workflow operation unaffected"
            );
            false
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent().into_iter().filter(|notification| notification.kind == kind).collect()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

/// Notifier whose transport is always down.
#[derive(Clone, Debug, Default)]
pub struct UnavailableNotifier;

impl Notifier for UnavailableNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError(format!("transport unavailable for {}", notification.kind.as_str())))
    }
}
