use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::job::{ActivityKind, Job, JobId};
use crate::domain::shift::{ShiftLogEntry, ShiftReport};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;
use crate::flows::Operation;
use crate::notify::{Notification, NotificationKind};
use crate::sla::{add_working_days, HolidayCalendar};

/// A job moved by an urgent job, ready to be saved together with its log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShiftedJob {
    pub job: Job,
    pub entry: ShiftLogEntry,
    pub notification: Notification,
}

/// Pushes a worker's open jobs later when an urgent job lands on them.
pub struct SlaShiftPropagator<'a> {
    holidays: &'a HolidayCalendar,
    shift_days: u32,
}

impl<'a> SlaShiftPropagator<'a> {
    pub fn new(holidays: &'a HolidayCalendar, shift_days: u32) -> Self {
        Self { holidays, shift_days }
    }

    pub fn shift_days(&self) -> u32 {
        self.shift_days
    }

    pub fn is_candidate(&self, urgent_job_id: JobId, worker_id: UserId, job: &Job) -> bool {
        job.id != urgent_job_id
            && !job.is_parent
            && job.status.is_open_for_shift()
            && job.worker_id() == Some(worker_id)
    }

    /// Computes the shifted copy of one job. The input is left untouched.
    pub fn shift(
        &self,
        urgent_job_id: JobId,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Result<ShiftedJob, WorkflowError> {
        if job.is_parent || !job.status.is_open_for_shift() {
            return Err(WorkflowError::invalid(
                job.id,
                Operation::ShiftDueDate,
                job.status,
                "only open, non-parent jobs can be shifted",
            ));
        }

        let mut shifted = job.clone();
        let new_due_date = add_working_days(job.due_date, self.shift_days, self.holidays);
        let previous = shifted.push_due_date(new_due_date);
        shifted.shifted_by_job_id = Some(urgent_job_id);
        shifted.updated_at = now;
        shifted.log_activity(
            ActivityKind::DueDateShifted,
            None,
            Some(format!("{previous} -> {new_due_date} by urgent {urgent_job_id}")),
            now,
        );

        let entry = ShiftLogEntry {
            job_id: job.id,
            urgent_job_id,
            original_due_date: previous,
            new_due_date: shifted.due_date,
            shift_days: self.shift_days,
            created_at: now,
        };
        let notification = Notification::new(NotificationKind::DeadlineShifted, job.id)
            .to(shifted.worker_id())
            .to([shifted.requester_id])
            .with("urgent_job_id", urgent_job_id.0.to_string())
            .with("previous_due_date", previous.to_string())
            .with("new_due_date", shifted.due_date.to_string());

        debug!(
            event_name = "workflow.sla_shift.planned",
            job_id = job.id.0,
            urgent_job_id = urgent_job_id.0,
            previous_due_date = %previous,
            new_due_date = %shifted.due_date,
            "due date shifted"
        );

        Ok(ShiftedJob { job: shifted, entry, notification })
    }

    /// Shifts every candidate in `jobs`, collecting per-job failures instead of
    /// stopping at the first one.
    pub fn plan(
        &self,
        urgent_job_id: JobId,
        worker_id: UserId,
        jobs: &[Job],
        now: DateTime<Utc>,
    ) -> (Vec<ShiftedJob>, ShiftReport) {
        let mut report = ShiftReport::for_urgent_job(urgent_job_id);
        let mut shifted = Vec::new();

        for job in jobs.iter().filter(|job| self.is_candidate(urgent_job_id, worker_id, job)) {
            match self.shift(urgent_job_id, job, now) {
                Ok(outcome) => {
                    report.shifted.push(outcome.entry.clone());
                    shifted.push(outcome);
                }
                Err(error) => report.record_failure(job.id, error.to_string()),
            }
        }

        (shifted, report)
    }
}
