use std::fmt;

use serde::{Deserialize, Serialize};

/// Level value once every approval level has been satisfied.
pub const FULLY_APPROVED_LEVEL: u32 = 999;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    /// Awaiting approval at `level` (1-based). Level 1 is rendered as
    /// `pending_approval`, later levels as `pending_level_N`.
    Pending {
        level: u32,
    },
    Approved,
    Assigned,
    InProgress,
    PendingClose,
    Rework,
    Completed,
    Closed,
    Returned,
    Rejected,
    AssigneeRejected,
    Cancelled,
    PendingDependency,
    Scheduled,
}

impl JobStatus {
    pub const PENDING_APPROVAL: Self = Self::Pending { level: 1 };

    pub fn pending_at(level: u32) -> Self {
        Self::Pending { level: level.max(1) }
    }

    pub fn pending_level(&self) -> Option<u32> {
        match self {
            Self::Pending { level } => Some(*level),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Closed | Self::Rejected | Self::Cancelled)
    }

    /// Statuses whose due date moves when an urgent job lands on the same worker.
    pub fn is_open_for_shift(&self) -> bool {
        matches!(
            self,
            Self::Pending { .. }
                | Self::Approved
                | Self::Assigned
                | Self::InProgress
                | Self::Rework
                | Self::Returned
        )
    }

    pub fn is_awaiting_approval(&self) -> bool {
        matches!(self, Self::Draft | Self::Pending { .. })
    }

    /// Statuses a parent rollup counts as finished.
    pub fn is_settled_for_rollup(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Rejected
                | Self::Returned
                | Self::Approved
                | Self::Closed
                | Self::Cancelled
        )
    }

    pub fn is_working(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress | Self::Rework)
    }

    pub fn as_storage(&self) -> String {
        match self {
            Self::Draft => "draft".to_string(),
            Self::Pending { level } if *level <= 1 => "pending_approval".to_string(),
            Self::Pending { level } => format!("pending_level_{level}"),
            Self::Approved => "approved".to_string(),
            Self::Assigned => "assigned".to_string(),
            Self::InProgress => "in_progress".to_string(),
            Self::PendingClose => "pending_close".to_string(),
            Self::Rework => "rework".to_string(),
            Self::Completed => "completed".to_string(),
            Self::Closed => "closed".to_string(),
            Self::Returned => "returned".to_string(),
            Self::Rejected => "rejected".to_string(),
            Self::AssigneeRejected => "assignee_rejected".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::PendingDependency => "pending_dependency".to_string(),
            Self::Scheduled => "scheduled".to_string(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if let Some(level) = value.strip_prefix("pending_level_") {
            return level.parse::<u32>().ok().filter(|level| *level >= 1).map(Self::pending_at);
        }

        match value.as_str() {
            "draft" => Some(Self::Draft),
            "pending_approval" => Some(Self::PENDING_APPROVAL),
            "approved" => Some(Self::Approved),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "pending_close" => Some(Self::PendingClose),
            "rework" => Some(Self::Rework),
            "completed" => Some(Self::Completed),
            "closed" => Some(Self::Closed),
            "returned" => Some(Self::Returned),
            "rejected" => Some(Self::Rejected),
            "assignee_rejected" => Some(Self::AssigneeRejected),
            "cancelled" => Some(Self::Cancelled),
            "pending_dependency" => Some(Self::PendingDependency),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_storage())
    }
}
