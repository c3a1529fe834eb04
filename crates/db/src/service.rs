//! Request orchestration: load the job, run one transition, save it under the
//! optimistic version check, then run the post-commit effects.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use jobflow_core::aggregate::{aggregate, ParentRollup};
use jobflow_core::assignment::AssignmentDecision;
use jobflow_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use jobflow_core::directory::OrgDirectory;
use jobflow_core::domain::job::{Job, JobId};
use jobflow_core::domain::shift::ShiftReport;
use jobflow_core::domain::user::UserId;
use jobflow_core::errors::{ApplicationError, WorkflowError};
use jobflow_core::flows::{
    JobCommand, JobEffect, NewJob, RejectMode, StartTrigger, TransitionContext, TransitionOutcome,
    WorkflowEngine, WorkflowPolicy,
};
use jobflow_core::notify::{dispatch, Notifier};
use jobflow_core::shift::SlaShiftPropagator;
use jobflow_core::sla::HolidayCalendar;

use crate::repositories::{
    FlowTemplateRepository, HolidayRepository, JobRepository, RepositoryError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: UserId, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }

    fn audit(&self, job_id: Option<JobId>) -> AuditContext {
        AuditContext::new(job_id, self.correlation_id.clone(), self.actor.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Workflow(error) => error.error_class(),
            Self::Repository(RepositoryError::VersionConflict { .. }) => "conflict",
            Self::Repository(RepositoryError::NotFound { .. }) => "not_found",
            Self::Repository(_) => "persistence",
        }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Workflow(error) => Self::Workflow(error),
            ServiceError::Repository(RepositoryError::VersionConflict { job_id, expected }) => {
                Self::Conflict(format!("{job_id} is no longer at version {expected}"))
            }
            ServiceError::Repository(RepositoryError::NotFound { entity, id }) => {
                Self::Workflow(WorkflowError::NotFound { entity, id })
            }
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedJob {
    pub job: Job,
    pub assignment: Option<AssignmentDecision>,
    /// Present when the new job was urgent and other jobs were shifted.
    pub shift_report: Option<ShiftReport>,
}

pub struct WorkflowService {
    jobs: Arc<dyn JobRepository>,
    holidays: Arc<dyn HolidayRepository>,
    flows: Arc<dyn FlowTemplateRepository>,
    directory: Arc<dyn OrgDirectory>,
    notifier: Arc<dyn Notifier>,
    audit: Option<Arc<dyn AuditSink>>,
    policy: WorkflowPolicy,
}

impl WorkflowService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        holidays: Arc<dyn HolidayRepository>,
        flows: Arc<dyn FlowTemplateRepository>,
        directory: Arc<dyn OrgDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            jobs,
            holidays,
            flows,
            directory,
            notifier,
            audit: None,
            policy: WorkflowPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    fn engine(&self) -> WorkflowEngine<'_, dyn OrgDirectory> {
        WorkflowEngine::with_policy(self.directory.as_ref(), self.policy.clone())
    }

    async fn calendar(&self) -> Result<HolidayCalendar, ServiceError> {
        Ok(HolidayCalendar::new(self.holidays.list_holidays().await?))
    }

    async fn load(&self, job_id: JobId) -> Result<Job, ServiceError> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("job", job_id).into())
    }

    pub async fn find_job(&self, job_id: JobId) -> Result<Job, ServiceError> {
        self.load(job_id).await
    }

    pub async fn create_job(
        &self,
        ctx: &RequestContext,
        request: NewJob,
    ) -> Result<CreatedJob, ServiceError> {
        if let Some(parent_id) = request.parent_job_id {
            let parent = self.load(parent_id).await?;
            if !parent.is_parent {
                return Err(WorkflowError::validation(
                    "parent_job_id",
                    format!("{parent_id} is not a parent job"),
                )
                .into());
            }
        }

        let template = self.flows.find_flow(request.project_id, request.job_type_id).await?;
        let calendar = self.calendar().await?;
        let context = TransitionContext::new(ctx.actor, &calendar);
        let outcome = self.engine().create(&request, &template, &context)?;

        let stored = self.jobs.insert(outcome.job).await?;
        info!(
            event_name = "workflow.job_stored",
            correlation_id = %ctx.correlation_id,
            job_id = stored.id.0,
            code = %stored.code.0,
            status = %stored.status,
            "job stored"
        );
        let audit = ctx.audit(Some(stored.id));
        if let Some(sink) = &self.audit {
            sink.emit(
                audit
                    .event("workflow.job_created", AuditCategory::Workflow, AuditOutcome::Success)
                    .with_metadata("status", stored.status.to_string())
                    .with_metadata("priority", stored.priority.as_str()),
            );
            if let Some(decision) = &outcome.assignment {
                sink.emit(audit.assignment_event(decision));
            }
        }

        let effects =
            outcome.effects.into_iter().map(|effect| effect.bind_job(stored.id)).collect();
        let shift_report = self.run_effects(&stored, effects, &calendar, &audit).await;

        Ok(CreatedJob { job: stored, assignment: outcome.assignment, shift_report })
    }

    /// Runs one command against the stored job. No-op outcomes are returned
    /// without writing.
    pub async fn execute(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        command: JobCommand,
    ) -> Result<TransitionOutcome, ServiceError> {
        let job = self.load(job_id).await?;
        let calendar = self.calendar().await?;
        let context = TransitionContext::new(ctx.actor, &calendar);
        let engine = self.engine();

        let audit = ctx.audit(Some(job.id));
        let mut outcome = match &self.audit {
            Some(sink) => {
                engine.apply_with_audit(&job, &command, &context, sink.as_ref(), &audit)?
            }
            None => engine.apply(&job, &command, &context)?,
        };
        if !outcome.changed {
            return Ok(outcome);
        }

        outcome.job = match self.jobs.update(outcome.job.clone(), job.version).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(
                    event_name = "workflow.job_save_failed",
                    correlation_id = %ctx.correlation_id,
                    job_id = job.id.0,
                    operation = outcome.operation.as_str(),
                    error = %error,
                    "transition was not saved"
                );
                return Err(error.into());
            }
        };

        let effects = std::mem::take(&mut outcome.effects);
        self.run_effects(&outcome.job, effects.clone(), &calendar, &audit).await;
        outcome.effects = effects;
        Ok(outcome)
    }

    pub async fn approve_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        comment: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Approve { comment }).await
    }

    pub async fn reject_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        comment: String,
        mode: RejectMode,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Reject { comment, mode }).await
    }

    pub async fn resubmit_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Resubmit).await
    }

    pub async fn assign_job_manually(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        assignee_id: UserId,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::AssignManually { assignee_id }).await
    }

    pub async fn start_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        trigger: StartTrigger,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Start { trigger }).await
    }

    pub async fn complete_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        final_link: String,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Complete { final_link, note }).await
    }

    pub async fn confirm_close_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::ConfirmClose).await
    }

    pub async fn request_revision(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::RequestRevision { reason }).await
    }

    pub async fn assignee_reject_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        reason: String,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::AssigneeReject { reason }).await
    }

    pub async fn confirm_assignee_rejection(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        comment: Option<String>,
        cc_emails: Vec<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::ConfirmAssigneeRejection { comment, cc_emails })
            .await
    }

    pub async fn deny_assignee_rejection(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        reason: String,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::DenyAssigneeRejection { reason }).await
    }

    pub async fn extend_due_date(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        days: u32,
        reason: String,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::ExtendDueDate { days, reason }).await
    }

    pub async fn cancel_job(
        &self,
        job_id: JobId,
        ctx: &RequestContext,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.execute(job_id, ctx, JobCommand::Cancel { reason }).await
    }

    /// Pushes back every other open job of `worker_id` by the policy's shift.
    /// Each job is saved on its own; failures are collected in the report.
    pub async fn shift_if_urgent(
        &self,
        urgent_job_id: JobId,
        worker_id: UserId,
        ctx: &RequestContext,
    ) -> Result<ShiftReport, ServiceError> {
        let calendar = self.calendar().await?;
        let audit = ctx.audit(Some(urgent_job_id));
        Ok(self.propagate_shift(urgent_job_id, worker_id, &calendar, &audit).await?)
    }

    /// Status rollup of a parent job from its stored children.
    pub async fn parent_rollup(&self, parent_id: JobId) -> Result<ParentRollup, ServiceError> {
        let parent = self.load(parent_id).await?;
        if !parent.is_parent {
            return Err(WorkflowError::validation(
                "parent_job_id",
                format!("{parent_id} is not a parent job"),
            )
            .into());
        }

        let children = self.jobs.list_children(parent_id).await?;
        Ok(aggregate(&children)?)
    }

    async fn propagate_shift(
        &self,
        urgent_job_id: JobId,
        worker_id: UserId,
        calendar: &HolidayCalendar,
        audit: &AuditContext,
    ) -> Result<ShiftReport, RepositoryError> {
        let open = self.jobs.list_open_for_worker(worker_id, urgent_job_id).await?;
        let propagator = SlaShiftPropagator::new(calendar, self.policy.shift_days);
        let (planned, mut report) = propagator.plan(urgent_job_id, worker_id, &open, Utc::now());

        for shifted in planned {
            let expected_version = shifted.job.version;
            let entry = shifted.entry.clone();
            match self.jobs.apply_shift(shifted.job, expected_version, shifted.entry).await {
                Ok(stored) => {
                    dispatch(self.notifier.as_ref(), &shifted.notification);
                    if let Some(sink) = &self.audit {
                        sink.emit(audit.shift_event(&entry));
                    }
                    info!(
                        event_name = "workflow.sla_shift.applied",
                        job_id = stored.id.0,
                        urgent_job_id = urgent_job_id.0,
                        new_due_date = %stored.due_date,
                        "due date shifted by urgent job"
                    );
                }
                Err(error) => {
                    let job_id = shifted.notification.job_id;
                    report.shifted.retain(|entry| entry.job_id != job_id);
                    report.record_failure(job_id, error.to_string());
                    if let (Some(sink), Some(failure)) = (&self.audit, report.failures.last()) {
                        sink.emit(audit.shift_failure_event(failure));
                    }
                }
            }
        }

        if let Some(failure) = report.partial_failure() {
            warn!(
                event_name = "workflow.sla_shift.partial_failure",
                urgent_job_id = urgent_job_id.0,
                worker_id = worker_id.0,
                error = %failure,
                "some jobs could not be shifted"
            );
        }
        Ok(report)
    }

    async fn run_effects(
        &self,
        job: &Job,
        effects: Vec<JobEffect>,
        calendar: &HolidayCalendar,
        audit: &AuditContext,
    ) -> Option<ShiftReport> {
        let mut shift_report = None;
        for effect in effects {
            match effect {
                JobEffect::Notify(notification) => {
                    dispatch(self.notifier.as_ref(), &notification);
                }
                JobEffect::PropagateSlaShift { worker_id } => {
                    match self.propagate_shift(job.id, worker_id, calendar, audit).await {
                        Ok(report) => shift_report = Some(report),
                        Err(error) => warn!(
                            event_name = "workflow.sla_shift.failed",
                            urgent_job_id = job.id.0,
                            worker_id = worker_id.0,
                            error = %error,
                            "could not load jobs to shift"
                        ),
                    }
                }
            }
        }
        shift_report
    }
}
