use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::JobId;
use crate::errors::WorkflowError;

/// One append-only record per job moved by an urgent job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftLogEntry {
    pub job_id: JobId,
    pub urgent_job_id: JobId,
    pub original_due_date: NaiveDate,
    pub new_due_date: NaiveDate,
    pub shift_days: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftFailure {
    pub job_id: JobId,
    pub reason: String,
}

/// Per-job outcome of one propagation run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub urgent_job_id: Option<JobId>,
    pub shifted: Vec<ShiftLogEntry>,
    pub failures: Vec<ShiftFailure>,
}

impl ShiftReport {
    pub fn for_urgent_job(urgent_job_id: JobId) -> Self {
        Self { urgent_job_id: Some(urgent_job_id), ..Self::default() }
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.shifted.len() + self.failures.len()
    }

    pub fn record_failure(&mut self, job_id: JobId, reason: impl Into<String>) {
        self.failures.push(ShiftFailure { job_id, reason: reason.into() });
    }

    pub fn partial_failure(&self) -> Option<WorkflowError> {
        self.is_partial_failure().then(|| WorkflowError::PartialFailure {
            attempted: self.attempted(),
            failures: self.failures.clone(),
        })
    }
}
