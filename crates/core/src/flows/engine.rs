use tracing::{debug, info};

use crate::approvals::{level_satisfied, next_level, ApprovalDenial, ApprovalFlowResolver};
use crate::assignment::{AssignmentDecision, AutoAssignmentResolver};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::directory::OrgDirectory;
use crate::domain::flow::{FlowLevel, FlowSnapshot, FlowTemplate};
use crate::domain::job::{
    ActivityKind, ApprovalDecision, ApprovalRecord, Job, JobCode, JobId, Priority,
};
use crate::domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;
use crate::flows::states::{
    JobCommand, JobEffect, NewJob, Operation, RejectMode, StartTrigger, TransitionContext,
    TransitionOutcome,
};
use crate::notify::{Notification, NotificationKind};
use crate::sla::add_working_days;

pub const DEFAULT_SHIFT_DAYS: u32 = 2;
pub const DEFAULT_MAX_EXTENSION_DAYS: u32 = 30;
/// Roughly one working year.
pub const DEFAULT_MAX_SLA_DAYS: u32 = 260;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub shift_days: u32,
    pub max_extension_days: u32,
    /// Upper bound on the working-day SLA a new job may ask for.
    pub max_sla_days: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            shift_days: DEFAULT_SHIFT_DAYS,
            max_extension_days: DEFAULT_MAX_EXTENSION_DAYS,
            max_sla_days: DEFAULT_MAX_SLA_DAYS,
        }
    }
}

/// The job status state machine.
///
/// Every operation works on a copy of the job and hands back the copy together
/// with the effects to run after it is committed, so a failed precondition
/// leaves the caller's job untouched.
pub struct WorkflowEngine<'a, D: ?Sized> {
    directory: &'a D,
    policy: WorkflowPolicy,
}

struct Draft {
    job: Job,
    effects: Vec<JobEffect>,
    assignment: Option<AssignmentDecision>,
}

impl Draft {
    fn new(job: Job) -> Self {
        Self { job, effects: Vec::new(), assignment: None }
    }

    fn notify(&mut self, notification: Notification) {
        self.effects.push(JobEffect::Notify(notification));
    }
}

impl<'a, D> WorkflowEngine<'a, D>
where
    D: OrgDirectory + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self::with_policy(directory, WorkflowPolicy::default())
    }

    pub fn with_policy(directory: &'a D, policy: WorkflowPolicy) -> Self {
        Self { directory, policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn create(
        &self,
        request: &NewJob,
        template: &FlowTemplate,
        context: &TransitionContext<'_>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let title = required_text("title", &request.title)?;
        if request.is_parent && request.parent_job_id.is_some() {
            return Err(WorkflowError::validation(
                "parent_job_id",
                "a parent job cannot itself belong to a parent",
            ));
        }
        let max_sla = self.policy.max_sla_days;
        if request.sla_days == 0 || request.sla_days > max_sla {
            return Err(WorkflowError::validation(
                "sla_days",
                format!(
                    "sla must be between 1 and {max_sla} working days, got {}",
                    request.sla_days
                ),
            ));
        }

        let snapshot =
            FlowSnapshot::capture(template, request.nominated_assignee_id, context.now);
        let due_date = add_working_days(request.start_date, request.sla_days, context.holidays);

        let mut job = Job {
            id: JobId::UNSAVED,
            code: JobCode(String::new()),
            title,
            project_id: request.project_id,
            job_type_id: request.job_type_id,
            department_id: request.department_id,
            priority: request.priority,
            status: JobStatus::Draft,
            current_level: 0,
            approval_round: 1,
            requester_id: request.requester_id,
            assignee_id: None,
            due_date,
            original_due_date: None,
            shifted_by_job_id: None,
            extension_count: 0,
            is_parent: request.is_parent,
            parent_job_id: request.parent_job_id,
            flow_snapshot: snapshot,
            approvals: Vec::new(),
            activity: Vec::new(),
            resume_status: None,
            final_link: None,
            completion_note: None,
            version: 0,
            created_at: context.now,
            updated_at: context.now,
        };
        job.log_activity(ActivityKind::Created, Some(context.actor), None, context.now);

        let mut draft = Draft::new(job);
        if request.is_parent {
            draft.job.status = JobStatus::PendingDependency;
        } else if draft.job.flow_snapshot.skips_approval() {
            self.finish_approval(&mut draft, context);
        } else {
            self.enter_level(&mut draft, 1, context);
        }

        if request.priority == Priority::Urgent && !request.is_parent {
            if let Some(worker_id) = draft.job.worker_id() {
                draft.effects.push(JobEffect::PropagateSlaShift { worker_id });
            }
        }

        info!(
            event_name = "workflow.job_created",
            status = %draft.job.status,
            priority = request.priority.as_str(),
            levels = draft.job.flow_snapshot.level_count(),
            due_date = %draft.job.due_date,
            "job created"
        );

        Ok(TransitionOutcome {
            operation: Operation::Create,
            from: JobStatus::Draft,
            to: draft.job.status,
            job: draft.job,
            effects: draft.effects,
            assignment: draft.assignment,
            changed: true,
        })
    }

    pub fn apply(
        &self,
        job: &Job,
        command: &JobCommand,
        context: &TransitionContext<'_>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let operation = command.operation();
        if job.is_parent {
            return Err(WorkflowError::invalid(
                job.id,
                operation,
                job.status,
                "parent jobs are aggregates and cannot be acted on directly",
            ));
        }

        let mut draft = Draft::new(job.clone());
        let result = match command {
            JobCommand::Approve { comment } => {
                self.approve(&mut draft, comment.as_deref(), context)
            }
            JobCommand::Reject { comment, mode } => {
                self.reject(&mut draft, comment, *mode, context)
            }
            JobCommand::Resubmit => self.resubmit(&mut draft, context),
            JobCommand::AssignManually { assignee_id } => {
                self.assign_manually(&mut draft, *assignee_id, context)
            }
            JobCommand::Start { trigger } => self.start(&mut draft, *trigger, context),
            JobCommand::Complete { final_link, note } => {
                self.complete(&mut draft, final_link, note.as_deref(), context)
            }
            JobCommand::ConfirmClose => self.confirm_close(&mut draft, context),
            JobCommand::RequestRevision { reason } => {
                self.request_revision(&mut draft, reason.as_deref(), context)
            }
            JobCommand::AssigneeReject { reason } => {
                self.assignee_reject(&mut draft, reason, context)
            }
            JobCommand::ConfirmAssigneeRejection { comment, cc_emails } => self
                .confirm_assignee_rejection(&mut draft, comment.as_deref(), cc_emails, context),
            JobCommand::DenyAssigneeRejection { reason } => {
                self.deny_assignee_rejection(&mut draft, reason, context)
            }
            JobCommand::ExtendDueDate { days, reason } => {
                self.extend_due_date(&mut draft, *days, reason, context)
            }
            JobCommand::Cancel { reason } => self.cancel(&mut draft, reason.as_deref(), context),
        };

        let changed = match result {
            Ok(changed) => changed,
            Err(error) => {
                debug!(
                    event_name = "workflow.transition_rejected",
                    job_id = job.id.0,
                    operation = operation.as_str(),
                    actor_id = context.actor.0,
                    error_class = error.error_class(),
                    error = %error,
                    "transition precondition failed"
                );
                return Err(error);
            }
        };

        if changed {
            draft.job.updated_at = context.now;
            info!(
                event_name = "workflow.transition_applied",
                job_id = job.id.0,
                operation = operation.as_str(),
                actor_id = context.actor.0,
                from = %job.status,
                to = %draft.job.status,
                current_level = draft.job.current_level,
                "job transition applied"
            );
        }

        Ok(TransitionOutcome {
            operation,
            from: job.status,
            to: draft.job.status,
            job: draft.job,
            effects: draft.effects,
            assignment: draft.assignment,
            changed,
        })
    }

    pub fn apply_with_audit<S>(
        &self,
        job: &Job,
        command: &JobCommand,
        context: &TransitionContext<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(job, command, context);
        let audit = audit.for_job(job.id);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            "workflow.transition_applied",
                            AuditCategory::Workflow,
                            AuditOutcome::Success,
                        )
                        .with_metadata("operation", outcome.operation.as_str())
                        .with_metadata("from", outcome.from.to_string())
                        .with_metadata("to", outcome.to.to_string())
                        .with_metadata("changed", outcome.changed.to_string()),
                );
                for event in follow_up_events(&audit, job, outcome) {
                    sink.emit(event);
                }
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "workflow.transition_rejected",
                            AuditCategory::Workflow,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("operation", command.operation().as_str())
                        .with_metadata("error_class", error.error_class())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    fn approve(
        &self,
        draft: &mut Draft,
        comment: Option<&str>,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        let level = self.actionable_level(&draft.job, Operation::Approve, context.actor)?;

        if level_satisfied(&draft.job, &level) {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::Approve,
                draft.job.status,
                format!("level {} is already satisfied", level.level),
            ));
        }
        if draft.job.has_approved_at(level.level, context.actor) {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::Approve,
                draft.job.status,
                format!("actor already approved level {}", level.level),
            ));
        }

        let job = &mut draft.job;
        job.approvals.push(ApprovalRecord {
            step_number: level.level,
            round: job.approval_round,
            approver_id: context.actor,
            decision: ApprovalDecision::Approved,
            comment: optional_text(comment),
            decided_at: context.now,
        });
        job.log_activity(
            ActivityKind::Approved,
            Some(context.actor),
            Some(format!("level {}", level.level)),
            context.now,
        );

        if !level_satisfied(job, &level) {
            return Ok(true);
        }

        match next_level(job) {
            FULLY_APPROVED_LEVEL => self.finish_approval(draft, context),
            next => self.enter_level(draft, next, context),
        }
        Ok(true)
    }

    fn reject(
        &self,
        draft: &mut Draft,
        comment: &str,
        mode: RejectMode,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        let operation = match mode {
            RejectMode::Return => Operation::Return,
            RejectMode::Reject => Operation::Reject,
        };
        let level = self.actionable_level(&draft.job, operation, context.actor)?;
        let comment = required_text("comment", comment)?;

        let (decision, status, activity, kind) = match mode {
            RejectMode::Return => (
                ApprovalDecision::Returned,
                JobStatus::Returned,
                ActivityKind::Returned,
                NotificationKind::JobReturned,
            ),
            RejectMode::Reject => (
                ApprovalDecision::Rejected,
                JobStatus::Rejected,
                ActivityKind::Rejected,
                NotificationKind::JobRejected,
            ),
        };

        let job = &mut draft.job;
        job.approvals.push(ApprovalRecord {
            step_number: level.level,
            round: job.approval_round,
            approver_id: context.actor,
            decision,
            comment: Some(comment.clone()),
            decided_at: context.now,
        });
        job.status = status;
        if mode == RejectMode::Return {
            job.current_level = 0;
        }
        job.log_activity(activity, Some(context.actor), Some(comment.clone()), context.now);

        let notification = Notification::new(kind, job.id)
            .to([job.requester_id])
            .with("level", level.level.to_string())
            .with("comment", comment);
        draft.notify(notification);
        Ok(true)
    }

    fn resubmit(
        &self,
        draft: &mut Draft,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(&draft.job, Operation::Resubmit, &[JobStatus::Returned])?;
        if draft.job.requester_id != context.actor {
            return Err(WorkflowError::unauthorized(
                context.actor,
                Operation::Resubmit,
                "only the requester can resubmit a returned job",
            ));
        }

        draft.job.approval_round += 1;
        draft.job.log_activity(
            ActivityKind::Resubmitted,
            Some(context.actor),
            Some(format!("round {}", draft.job.approval_round)),
            context.now,
        );

        if draft.job.flow_snapshot.skips_approval() {
            self.finish_approval(draft, context);
        } else {
            self.enter_level(draft, 1, context);
        }
        Ok(true)
    }

    fn assign_manually(
        &self,
        draft: &mut Draft,
        assignee_id: UserId,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(&draft.job, Operation::AssignManually, &[JobStatus::Approved])?;
        if let Some(current) = draft.job.assignee_id {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::AssignManually,
                draft.job.status,
                format!("job is already assigned to {current}"),
            ));
        }
        self.require_requester_or_approver(&draft.job, Operation::AssignManually, context.actor)?;
        if !self.directory.is_active(assignee_id) {
            return Err(WorkflowError::validation(
                "assignee_id",
                format!("{assignee_id} is not an active user"),
            ));
        }

        let job = &mut draft.job;
        job.assignee_id = Some(assignee_id);
        job.status = JobStatus::Assigned;
        job.log_activity(
            ActivityKind::Assigned,
            Some(context.actor),
            Some(format!("manual assignment to {assignee_id}")),
            context.now,
        );
        let notification = Notification::new(NotificationKind::JobAssigned, job.id)
            .to([assignee_id])
            .with("source", "manual")
            .with("assigned_by", context.actor.0.to_string());
        draft.notify(notification);
        Ok(true)
    }

    fn start(
        &self,
        draft: &mut Draft,
        trigger: StartTrigger,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        match draft.job.status {
            JobStatus::InProgress => {
                require_assignee(&draft.job, Operation::Start, context.actor)?;
                debug!(
                    event_name = "workflow.start_noop",
                    job_id = draft.job.id.0,
                    trigger = trigger.as_str(),
                    "job already in progress"
                );
                Ok(false)
            }
            JobStatus::Assigned | JobStatus::Rework => {
                require_assignee(&draft.job, Operation::Start, context.actor)?;
                let job = &mut draft.job;
                job.status = JobStatus::InProgress;
                job.log_activity(
                    ActivityKind::Started,
                    Some(context.actor),
                    Some(trigger.as_str().to_string()),
                    context.now,
                );
                let notification = Notification::new(NotificationKind::WorkStarted, job.id)
                    .to([job.requester_id])
                    .with("trigger", trigger.as_str());
                draft.notify(notification);
                Ok(true)
            }
            status => Err(WorkflowError::invalid(
                draft.job.id,
                Operation::Start,
                status,
                "only assigned jobs can be started",
            )),
        }
    }

    fn complete(
        &self,
        draft: &mut Draft,
        final_link: &str,
        note: Option<&str>,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(&draft.job, Operation::Complete, &[JobStatus::InProgress])?;
        require_assignee(&draft.job, Operation::Complete, context.actor)?;
        let final_link = required_text("final_link", final_link)?;

        let job = &mut draft.job;
        job.status = JobStatus::PendingClose;
        job.final_link = Some(final_link.clone());
        job.completion_note = optional_text(note);
        job.log_activity(
            ActivityKind::Completed,
            Some(context.actor),
            job.completion_note.clone(),
            context.now,
        );
        let notification = Notification::new(NotificationKind::JobCompleted, job.id)
            .to([job.requester_id])
            .with("final_link", final_link);
        draft.notify(notification);
        Ok(true)
    }

    fn confirm_close(
        &self,
        draft: &mut Draft,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(&draft.job, Operation::ConfirmClose, &[JobStatus::PendingClose])?;
        self.require_requester_or_approver(&draft.job, Operation::ConfirmClose, context.actor)?;

        let job = &mut draft.job;
        job.status = JobStatus::Closed;
        job.log_activity(ActivityKind::Closed, Some(context.actor), None, context.now);
        let notification =
            Notification::new(NotificationKind::JobClosed, job.id).to(job.assignee_id);
        draft.notify(notification);
        Ok(true)
    }

    fn request_revision(
        &self,
        draft: &mut Draft,
        reason: Option<&str>,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(&draft.job, Operation::RequestRevision, &[JobStatus::PendingClose])?;
        self.require_requester_or_approver(&draft.job, Operation::RequestRevision, context.actor)?;

        let reason = optional_text(reason);
        let job = &mut draft.job;
        job.status = JobStatus::Rework;
        job.log_activity(
            ActivityKind::RevisionRequested,
            Some(context.actor),
            reason.clone(),
            context.now,
        );
        let mut notification =
            Notification::new(NotificationKind::RevisionRequested, job.id).to(job.assignee_id);
        if let Some(reason) = reason {
            notification = notification.with("reason", reason);
        }
        draft.notify(notification);
        Ok(true)
    }

    fn assignee_reject(
        &self,
        draft: &mut Draft,
        reason: &str,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(
            &draft.job,
            Operation::AssigneeReject,
            &[JobStatus::Assigned, JobStatus::InProgress],
        )?;
        require_assignee(&draft.job, Operation::AssigneeReject, context.actor)?;
        let reason = required_text("reason", reason)?;

        let job = &mut draft.job;
        job.resume_status = Some(job.status);
        job.status = JobStatus::AssigneeRejected;
        job.log_activity(
            ActivityKind::AssigneeRejected,
            Some(context.actor),
            Some(reason.clone()),
            context.now,
        );
        let notification = Notification::new(NotificationKind::AssigneeRejected, job.id)
            .to([job.requester_id])
            .with("reason", reason);
        draft.notify(notification);
        Ok(true)
    }

    fn confirm_assignee_rejection(
        &self,
        draft: &mut Draft,
        comment: Option<&str>,
        cc_emails: &[String],
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(
            &draft.job,
            Operation::ConfirmAssigneeRejection,
            &[JobStatus::AssigneeRejected],
        )?;
        self.require_adjudicator(&draft.job, Operation::ConfirmAssigneeRejection, context.actor)?;
        let cc_emails = validate_cc_emails(cc_emails)?;

        let comment = optional_text(comment);
        let job = &mut draft.job;
        job.status = JobStatus::Rejected;
        job.resume_status = None;
        job.log_activity(
            ActivityKind::AssigneeRejectionConfirmed,
            Some(context.actor),
            comment.clone(),
            context.now,
        );
        let mut notification =
            Notification::new(NotificationKind::AssigneeRejectionConfirmed, job.id)
                .to([job.requester_id])
                .to(job.assignee_id)
                .cc(cc_emails);
        if let Some(comment) = comment {
            notification = notification.with("comment", comment);
        }
        draft.notify(notification);
        Ok(true)
    }

    fn deny_assignee_rejection(
        &self,
        draft: &mut Draft,
        reason: &str,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        require_status(
            &draft.job,
            Operation::DenyAssigneeRejection,
            &[JobStatus::AssigneeRejected],
        )?;
        self.require_adjudicator(&draft.job, Operation::DenyAssigneeRejection, context.actor)?;
        let reason = required_text("reason", reason)?;

        let Some(resume) = draft.job.resume_status else {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::DenyAssigneeRejection,
                draft.job.status,
                "no working status was recorded before the rejection",
            ));
        };

        let job = &mut draft.job;
        job.status = resume;
        job.resume_status = None;
        job.log_activity(
            ActivityKind::AssigneeRejectionDenied,
            Some(context.actor),
            Some(reason.clone()),
            context.now,
        );
        let notification = Notification::new(NotificationKind::AssigneeRejectionDenied, job.id)
            .to(job.assignee_id)
            .with("reason", reason);
        draft.notify(notification);
        Ok(true)
    }

    fn extend_due_date(
        &self,
        draft: &mut Draft,
        days: u32,
        reason: &str,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        if draft.job.status.is_terminal() {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::ExtendDueDate,
                draft.job.status,
                "terminal jobs keep their final due date",
            ));
        }
        let resolver = ApprovalFlowResolver::new(self.directory);
        let is_party = draft.job.requester_id == context.actor
            || draft.job.assignee_id == Some(context.actor)
            || resolver.is_flow_approver(context.actor, &draft.job);
        if !is_party {
            return Err(WorkflowError::unauthorized(
                context.actor,
                Operation::ExtendDueDate,
                "only the requester, assignee, or an approver can extend the due date",
            ));
        }
        let max = self.policy.max_extension_days;
        if days == 0 || days > max {
            return Err(WorkflowError::validation(
                "days",
                format!("extension must be between 1 and {max} working days, got {days}"),
            ));
        }
        let reason = required_text("reason", reason)?;

        let job = &mut draft.job;
        let new_due_date = add_working_days(job.due_date, days, context.holidays);
        let previous = job.push_due_date(new_due_date);
        job.extension_count += 1;
        job.log_activity(
            ActivityKind::DueDateExtended,
            Some(context.actor),
            Some(format!("{reason} ({previous} -> {new_due_date}, +{days} working days)")),
            context.now,
        );
        let notification = Notification::new(NotificationKind::DeadlineExtended, job.id)
            .to([job.requester_id])
            .to(job.assignee_id)
            .with("previous_due_date", previous.to_string())
            .with("new_due_date", new_due_date.to_string())
            .with("reason", reason);
        draft.notify(notification);
        Ok(true)
    }

    fn cancel(
        &self,
        draft: &mut Draft,
        reason: Option<&str>,
        context: &TransitionContext<'_>,
    ) -> Result<bool, WorkflowError> {
        if draft.job.status.is_terminal() {
            return Err(WorkflowError::invalid(
                draft.job.id,
                Operation::Cancel,
                draft.job.status,
                "job is already terminal",
            ));
        }
        if draft.job.requester_id != context.actor {
            return Err(WorkflowError::unauthorized(
                context.actor,
                Operation::Cancel,
                "only the requester can cancel a job",
            ));
        }

        let reason = optional_text(reason);
        let job = &mut draft.job;
        job.status = JobStatus::Cancelled;
        job.log_activity(ActivityKind::Cancelled, Some(context.actor), reason, context.now);
        let notification =
            Notification::new(NotificationKind::JobCancelled, job.id).to(job.worker_id());
        draft.notify(notification);
        Ok(true)
    }

    fn enter_level(&self, draft: &mut Draft, level: u32, context: &TransitionContext<'_>) {
        let job = &mut draft.job;
        job.current_level = level;
        job.status = JobStatus::pending_at(level);
        if level == 1 {
            job.log_activity(ActivityKind::Submitted, Some(context.actor), None, context.now);
        }

        let approvers =
            job.flow_snapshot.level(level).map(|entry| entry.approvers.clone()).unwrap_or_default();
        let role =
            job.flow_snapshot.level(level).map(|entry| entry.role.clone()).unwrap_or_default();
        let notification = Notification::new(NotificationKind::ApprovalRequested, job.id)
            .to(approvers)
            .with("level", level.to_string())
            .with("role", role);
        draft.notify(notification);
    }

    fn finish_approval(&self, draft: &mut Draft, context: &TransitionContext<'_>) {
        draft.job.current_level = FULLY_APPROVED_LEVEL;
        let decision = AutoAssignmentResolver::new(self.directory).resolve(&draft.job);

        let job = &mut draft.job;
        let notification = match &decision {
            AssignmentDecision::Assign { assignee_id, source } => {
                job.assignee_id = Some(*assignee_id);
                job.status = JobStatus::Assigned;
                job.log_activity(
                    ActivityKind::Assigned,
                    None,
                    Some(format!("auto-assigned to {assignee_id} via {}", source.as_str())),
                    context.now,
                );
                Notification::new(NotificationKind::JobAssigned, job.id)
                    .to([*assignee_id])
                    .with("source", source.as_str())
            }
            AssignmentDecision::NeedsManualAssign { .. } => {
                job.assignee_id = None;
                job.status = JobStatus::Approved;
                Notification::new(NotificationKind::ManualAssignmentRequired, job.id)
                    .to([job.requester_id])
            }
        };
        draft.notify(notification);
        draft.assignment = Some(decision);
    }

    fn actionable_level(
        &self,
        job: &Job,
        operation: Operation,
        actor: UserId,
    ) -> Result<FlowLevel, WorkflowError> {
        ApprovalFlowResolver::new(self.directory)
            .check_actor(actor, job)
            .cloned()
            .map_err(|denial| denial_error(job, operation, actor, &denial))
    }

    fn require_requester_or_approver(
        &self,
        job: &Job,
        operation: Operation,
        actor: UserId,
    ) -> Result<(), WorkflowError> {
        if job.requester_id == actor
            || ApprovalFlowResolver::new(self.directory).is_flow_approver(actor, job)
        {
            return Ok(());
        }
        Err(WorkflowError::unauthorized(
            actor,
            operation,
            "only the requester or an approver can do this",
        ))
    }

    /// Approvers adjudicate assignee rejections; with no approval levels the
    /// requester stands in for them.
    fn require_adjudicator(
        &self,
        job: &Job,
        operation: Operation,
        actor: UserId,
    ) -> Result<(), WorkflowError> {
        let resolver = ApprovalFlowResolver::new(self.directory);
        let allowed = if job.flow_snapshot.skips_approval() {
            job.requester_id == actor
        } else {
            resolver.is_flow_approver(actor, job)
        };
        if allowed {
            return Ok(());
        }
        Err(WorkflowError::unauthorized(
            actor,
            operation,
            "only an approver of this job can adjudicate",
        ))
    }
}

fn denial_error(
    job: &Job,
    operation: Operation,
    actor: UserId,
    denial: &ApprovalDenial,
) -> WorkflowError {
    if denial.is_actor_denial() {
        WorkflowError::unauthorized(actor, operation, denial.reason())
    } else {
        WorkflowError::invalid(job.id, operation, job.status, denial.reason())
    }
}

fn require_status(
    job: &Job,
    operation: Operation,
    allowed: &[JobStatus],
) -> Result<(), WorkflowError> {
    if allowed.contains(&job.status) {
        return Ok(());
    }
    let expected = allowed.iter().map(JobStatus::to_string).collect::<Vec<_>>().join(" or ");
    Err(WorkflowError::invalid(job.id, operation, job.status, format!("job must be {expected}")))
}

fn require_assignee(job: &Job, operation: Operation, actor: UserId) -> Result<(), WorkflowError> {
    if job.assignee_id == Some(actor) {
        return Ok(());
    }
    Err(WorkflowError::unauthorized(actor, operation, "only the assignee can do this"))
}

/// Assignment and due-date events that accompany an applied transition.
fn follow_up_events(
    audit: &AuditContext,
    before: &Job,
    outcome: &TransitionOutcome,
) -> Vec<AuditEvent> {
    let mut events = Vec::new();
    if let Some(decision) = &outcome.assignment {
        events.push(audit.assignment_event(decision));
    }
    if !outcome.changed {
        return events;
    }
    match outcome.operation {
        Operation::AssignManually => {
            let assignee = outcome.job.assignee_id.map(|id| id.to_string()).unwrap_or_default();
            events.push(
                audit
                    .event(
                        "workflow.job_assigned",
                        AuditCategory::Assignment,
                        AuditOutcome::Success,
                    )
                    .with_metadata("assignee_id", assignee)
                    .with_metadata("source", "manual"),
            );
        }
        Operation::ExtendDueDate => events.push(
            audit
                .event("workflow.due_date_extended", AuditCategory::Sla, AuditOutcome::Success)
                .with_metadata("from_due_date", before.due_date.to_string())
                .with_metadata("to_due_date", outcome.job.due_date.to_string())
                .with_metadata("extension_count", outcome.job.extension_count.to_string()),
        ),
        _ => {}
    }
    events
}

fn required_text(field: &'static str, value: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

fn validate_cc_emails(emails: &[String]) -> Result<Vec<String>, WorkflowError> {
    emails
        .iter()
        .map(|email| email.trim())
        .filter(|email| !email.is_empty())
        .map(|email| {
            let valid = email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            if valid {
                Ok(email.to_string())
            } else {
                Err(WorkflowError::validation("cc_emails", format!("`{email}` is not an email")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{WorkflowEngine, WorkflowPolicy};
    use crate::assignment::AssignmentDecision;
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::directory::{DirectoryUser, InMemoryOrgDirectory};
    use crate::domain::flow::{FlowSnapshot, FlowTemplate, LevelLogic};
    use crate::domain::job::{ApprovalDecision, Job, JobTypeId, Priority, ProjectId};
    use crate::domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
    use crate::domain::user::UserId;
    use crate::errors::WorkflowError;
    use crate::flows::states::{
        JobCommand, JobEffect, NewJob, Operation, RejectMode, StartTrigger, TransitionContext,
    };
    use crate::notify::NotificationKind;
    use crate::sla::HolidayCalendar;
    use crate::test_support::{date, job_fixture, template, REQUESTER};

    const LEAD: UserId = UserId(20);
    const WORKER: UserId = UserId(50);

    fn directory() -> InMemoryOrgDirectory {
        InMemoryOrgDirectory::default()
            .with_user(DirectoryUser::active(REQUESTER).with_team_lead(LEAD))
            .with_user(DirectoryUser::active(LEAD))
            .with_user(DirectoryUser::active(WORKER))
            .with_user(DirectoryUser::active(UserId(1)))
            .with_user(DirectoryUser::active(UserId(2)))
            .with_user(DirectoryUser::active(UserId(3)))
    }

    fn two_level_flow() -> FlowTemplate {
        template(&[(LevelLogic::All, &[1, 2]), (LevelLogic::Any, &[3])])
    }

    fn apply(
        engine: &WorkflowEngine<'_, InMemoryOrgDirectory>,
        job: &Job,
        actor: i64,
        command: JobCommand,
        holidays: &HolidayCalendar,
    ) -> Result<Job, WorkflowError> {
        engine
            .apply(job, &command, &TransitionContext::new(UserId(actor), holidays))
            .map(|outcome| outcome.job)
    }

    fn approve() -> JobCommand {
        JobCommand::Approve { comment: None }
    }

    fn start() -> JobCommand {
        JobCommand::Start { trigger: StartTrigger::Manual }
    }

    fn requests_shift(effect: &JobEffect) -> bool {
        matches!(effect, JobEffect::PropagateSlaShift { .. })
    }

    fn new_job(priority: Priority, nominated: Option<UserId>) -> NewJob {
        NewJob {
            title: "Launch video cut-downs".to_string(),
            project_id: ProjectId(1),
            job_type_id: JobTypeId(2),
            department_id: None,
            priority,
            requester_id: REQUESTER,
            nominated_assignee_id: nominated,
            sla_days: 3,
            start_date: date(2024, 6, 5),
            is_parent: false,
            parent_job_id: None,
        }
    }

    /// Drives a two-level job through approval and returns it assigned to the
    /// requester's team lead.
    fn assigned_job(engine: &WorkflowEngine<'_, InMemoryOrgDirectory>) -> Job {
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());
        let job = apply(engine, &job, 1, approve(), &holidays).expect("first approval");
        let job = apply(engine, &job, 2, approve(), &holidays).expect("second approval");
        apply(engine, &job, 3, approve(), &holidays).expect("final approval")
    }

    #[test]
    fn two_level_flow_progresses_to_auto_assignment() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());
        assert_eq!(job.status, JobStatus::PENDING_APPROVAL);
        assert_eq!(job.current_level, 1);

        let job = apply(&engine, &job, 1, approve(), &holidays).expect("first approver");
        assert_eq!(job.current_level, 1, "ALL level waits for every approver");
        assert_eq!(job.status, JobStatus::PENDING_APPROVAL);

        let job = apply(&engine, &job, 2, approve(), &holidays).expect("second approver");
        assert_eq!(job.current_level, 2);
        assert_eq!(job.status, JobStatus::pending_at(2));

        let outcome = engine
            .apply(&job, &approve(), &TransitionContext::new(UserId(3), &holidays))
            .expect("level two approver");
        assert_eq!(outcome.job.current_level, FULLY_APPROVED_LEVEL);
        assert_eq!(outcome.job.status, JobStatus::Assigned);
        assert_eq!(outcome.job.assignee_id, Some(LEAD));
        assert_eq!(outcome.assignment.as_ref().and_then(AssignmentDecision::assignee), Some(LEAD));
        assert_eq!(outcome.job.approvals.len(), 3);
        assert!(outcome.effects.iter().any(|effect| matches!(
            effect,
            JobEffect::Notify(notification) if notification.kind == NotificationKind::JobAssigned
        )));
    }

    #[test]
    fn any_level_transitions_on_single_approval() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&template(&[(LevelLogic::Any, &[1, 2]), (LevelLogic::All, &[3])]));

        let job = apply(&engine, &job, 2, approve(), &holidays).expect("any approver");
        assert_eq!(job.current_level, 2);
    }

    #[test]
    fn unlisted_actor_is_unauthorized_and_nothing_is_recorded() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let error = apply(&engine, &job, 3, approve(), &holidays).expect_err("level 2 approver");
        assert!(matches!(error, WorkflowError::Unauthorized { operation: Operation::Approve, .. }));
        assert!(job.approvals.is_empty());
        assert_eq!(job.current_level, 1);
    }

    #[test]
    fn same_approver_cannot_approve_a_level_twice() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let job = apply(&engine, &job, 1, approve(), &holidays).expect("first approval");
        let error = apply(&engine, &job, 1, approve(), &holidays).expect_err("duplicate");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn return_resets_level_and_resubmission_starts_a_new_round() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let job = apply(&engine, &job, 1, approve(), &holidays).expect("first approval");
        let returned = apply(
            &engine,
            &job,
            2,
            JobCommand::Reject { comment: "needs new copy".to_string(), mode: RejectMode::Return },
            &holidays,
        )
        .expect("return");
        assert_eq!(returned.status, JobStatus::Returned);
        assert_eq!(returned.current_level, 0);
        assert_eq!(
            returned.approvals.last().map(|record| record.decision),
            Some(ApprovalDecision::Returned)
        );

        let error = apply(&engine, &returned, 1, approve(), &holidays).expect_err("not pending");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));

        let error = apply(&engine, &returned, 1, JobCommand::Resubmit, &holidays)
            .expect_err("only requester resubmits");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let resubmitted = apply(&engine, &returned, REQUESTER.0, JobCommand::Resubmit, &holidays)
            .expect("resubmit");
        assert_eq!(resubmitted.status, JobStatus::PENDING_APPROVAL);
        assert_eq!(resubmitted.current_level, 1);
        assert_eq!(resubmitted.approval_round, 2);

        // The first-round approval from user 1 no longer counts.
        let job = apply(&engine, &resubmitted, 2, approve(), &holidays).expect("approve");
        assert_eq!(job.current_level, 1);
    }

    #[test]
    fn reject_is_terminal_and_requires_a_comment() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let error = apply(
            &engine,
            &job,
            1,
            JobCommand::Reject { comment: "  ".to_string(), mode: RejectMode::Reject },
            &holidays,
        )
        .expect_err("blank comment");
        assert!(matches!(error, WorkflowError::Validation { field: "comment", .. }));

        let rejected = apply(
            &engine,
            &job,
            1,
            JobCommand::Reject { comment: "off brief".to_string(), mode: RejectMode::Reject },
            &holidays,
        )
        .expect("reject");
        assert_eq!(rejected.status, JobStatus::Rejected);
        assert!(rejected.status.is_terminal());

        let error = apply(&engine, &rejected, 2, approve(), &holidays).expect_err("terminal");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn zero_level_creation_skips_approval() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let context = TransitionContext::new(REQUESTER, &holidays);

        let outcome = engine
            .create(
                &new_job(Priority::Normal, Some(WORKER)),
                &FlowTemplate::skip_approval(),
                &context,
            )
            .expect("create");
        assert_eq!(outcome.job.status, JobStatus::Assigned);
        assert_eq!(outcome.job.assignee_id, Some(WORKER));
        assert_eq!(outcome.job.current_level, FULLY_APPROVED_LEVEL);
        // 2024-06-05 (Wed) + 3 working days.
        assert_eq!(outcome.job.due_date, date(2024, 6, 10));

        let lonely = InMemoryOrgDirectory::default();
        let engine = WorkflowEngine::new(&lonely);
        let outcome = engine
            .create(&new_job(Priority::Normal, None), &FlowTemplate::skip_approval(), &context)
            .expect("create");
        assert_eq!(outcome.job.status, JobStatus::Approved);
        assert_eq!(outcome.job.assignee_id, None);
        assert!(matches!(outcome.assignment, Some(AssignmentDecision::NeedsManualAssign { .. })));
    }

    #[test]
    fn creation_with_levels_enters_first_level_and_notifies_its_approvers() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let context = TransitionContext::new(REQUESTER, &holidays);

        let outcome = engine
            .create(&new_job(Priority::High, None), &two_level_flow(), &context)
            .expect("create");
        assert_eq!(outcome.job.status, JobStatus::PENDING_APPROVAL);
        assert_eq!(outcome.job.current_level, 1);
        assert!(outcome.job.assignee_id.is_none());
        assert!(outcome.effects.iter().any(|effect| matches!(
            effect,
            JobEffect::Notify(notification)
                if notification.kind == NotificationKind::ApprovalRequested
                    && notification.recipients == vec![UserId(1), UserId(2)]
        )));
        assert!(!outcome.effects.iter().any(requests_shift));
    }

    #[test]
    fn urgent_creation_with_known_worker_requests_sla_shift() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let context = TransitionContext::new(REQUESTER, &holidays);

        let outcome = engine
            .create(&new_job(Priority::Urgent, Some(WORKER)), &two_level_flow(), &context)
            .expect("create");
        assert!(outcome
            .effects
            .contains(&JobEffect::PropagateSlaShift { worker_id: WORKER }));

        let outcome = engine
            .create(&new_job(Priority::Urgent, None), &two_level_flow(), &context)
            .expect("create");
        assert!(!outcome.effects.iter().any(requests_shift));
    }

    #[test]
    fn creation_requires_a_title() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let mut request = new_job(Priority::Normal, None);
        request.title = " ".to_string();

        let error = engine
            .create(&request, &two_level_flow(), &TransitionContext::new(REQUESTER, &holidays))
            .expect_err("blank title");
        assert!(matches!(error, WorkflowError::Validation { field: "title", .. }));
    }

    #[test]
    fn creation_rejects_sla_outside_policy_bounds() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let context = TransitionContext::new(REQUESTER, &holidays);
        let max = engine.policy().max_sla_days;

        for sla_days in [0, max + 1, u32::MAX] {
            let mut request = new_job(Priority::Normal, None);
            request.sla_days = sla_days;
            let error = engine
                .create(&request, &two_level_flow(), &context)
                .expect_err("sla out of bounds");
            assert!(
                matches!(error, WorkflowError::Validation { field: "sla_days", .. }),
                "sla_days = {sla_days}: {error}"
            );
        }

        let mut request = new_job(Priority::Normal, None);
        request.sla_days = max;
        let outcome = engine.create(&request, &two_level_flow(), &context).expect("at the cap");
        assert!(outcome.job.due_date > request.start_date);
    }

    #[test]
    fn sla_cap_follows_policy() {
        let directory = directory();
        let engine = WorkflowEngine::with_policy(
            &directory,
            WorkflowPolicy { max_sla_days: 10, ..WorkflowPolicy::default() },
        );
        let holidays = HolidayCalendar::default();
        let mut request = new_job(Priority::Normal, None);
        request.sla_days = 11;

        let error = engine
            .create(&request, &two_level_flow(), &TransitionContext::new(REQUESTER, &holidays))
            .expect_err("over policy cap");
        assert!(matches!(error, WorkflowError::Validation { field: "sla_days", .. }));
    }

    #[test]
    fn manual_assignment_only_from_approved_and_unassigned() {
        let lonely = InMemoryOrgDirectory::default()
            .with_user(DirectoryUser::active(WORKER))
            .with_user(DirectoryUser::active(UserId(51)).inactive());
        let engine = WorkflowEngine::new(&lonely);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&FlowTemplate::skip_approval());
        assert_eq!(job.status, JobStatus::Approved);

        let error = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::AssignManually { assignee_id: UserId(51) },
            &holidays,
        )
        .expect_err("inactive assignee");
        assert!(matches!(error, WorkflowError::Validation { field: "assignee_id", .. }));

        let error = apply(
            &engine,
            &job,
            77,
            JobCommand::AssignManually { assignee_id: WORKER },
            &holidays,
        )
        .expect_err("stranger");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let assigned = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::AssignManually { assignee_id: WORKER },
            &holidays,
        )
        .expect("assign");
        assert_eq!(assigned.status, JobStatus::Assigned);
        assert_eq!(assigned.assignee_id, Some(WORKER));

        let error = apply(
            &engine,
            &assigned,
            REQUESTER.0,
            JobCommand::AssignManually { assignee_id: WORKER },
            &holidays,
        )
        .expect_err("already assigned");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn start_is_idempotent_and_assignee_only() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = assigned_job(&engine);
        let start = JobCommand::Start { trigger: StartTrigger::AutoOnView };

        let error = apply(&engine, &job, REQUESTER.0, start.clone(), &holidays)
            .expect_err("requester cannot start");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let started = apply(&engine, &job, LEAD.0, start.clone(), &holidays).expect("start");
        assert_eq!(started.status, JobStatus::InProgress);

        let outcome = engine
            .apply(&started, &start, &TransitionContext::new(LEAD, &holidays))
            .expect("second start is a no-op");
        assert!(!outcome.changed);
        assert!(outcome.effects.is_empty());
        assert_eq!(outcome.job, started);
    }

    #[test]
    fn completion_close_and_revision_cycle() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = assigned_job(&engine);
        let job = apply(&engine, &job, LEAD.0, start(), &holidays)
            .expect("start");

        let error = apply(
            &engine,
            &job,
            LEAD.0,
            JobCommand::Complete { final_link: "".to_string(), note: None },
            &holidays,
        )
        .expect_err("link required");
        assert!(matches!(error, WorkflowError::Validation { field: "final_link", .. }));

        let done = apply(
            &engine,
            &job,
            LEAD.0,
            JobCommand::Complete {
                final_link: "https://files.example.com/final.zip".to_string(),
                note: Some("v3".to_string()),
            },
            &holidays,
        )
        .expect("complete");
        assert_eq!(done.status, JobStatus::PendingClose);

        let rework = apply(
            &engine,
            &done,
            REQUESTER.0,
            JobCommand::RequestRevision { reason: Some("logo too small".to_string()) },
            &holidays,
        )
        .expect("revision");
        assert_eq!(rework.status, JobStatus::Rework);

        let resumed = apply(&engine, &rework, LEAD.0, start(), &holidays)
            .expect("resume");
        assert_eq!(resumed.status, JobStatus::InProgress);

        let error = apply(&engine, &done, LEAD.0, JobCommand::ConfirmClose, &holidays)
            .expect_err("assignee cannot close own work");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let closed =
            apply(&engine, &done, 3, JobCommand::ConfirmClose, &holidays).expect("approver closes");
        assert_eq!(closed.status, JobStatus::Closed);
    }

    #[test]
    fn denied_assignee_rejection_restores_working_status() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = assigned_job(&engine);
        let job = apply(&engine, &job, LEAD.0, start(), &holidays)
            .expect("start");

        let rejected = apply(
            &engine,
            &job,
            LEAD.0,
            JobCommand::AssigneeReject { reason: "no capacity".to_string() },
            &holidays,
        )
        .expect("assignee reject");
        assert_eq!(rejected.status, JobStatus::AssigneeRejected);

        let error = apply(
            &engine,
            &rejected,
            LEAD.0,
            JobCommand::DenyAssigneeRejection { reason: "please continue".to_string() },
            &holidays,
        )
        .expect_err("assignee cannot adjudicate");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let restored = apply(
            &engine,
            &rejected,
            1,
            JobCommand::DenyAssigneeRejection { reason: "please continue".to_string() },
            &holidays,
        )
        .expect("deny");
        assert_eq!(restored.status, JobStatus::InProgress);
        assert_eq!(restored.resume_status, None);
    }

    #[test]
    fn denying_a_rejection_without_a_recorded_status_is_invalid() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let mut job = assigned_job(&engine);
        job.status = JobStatus::AssigneeRejected;
        job.resume_status = None;

        let error = apply(
            &engine,
            &job,
            1,
            JobCommand::DenyAssigneeRejection { reason: "please continue".to_string() },
            &holidays,
        )
        .expect_err("nothing to restore");
        assert!(matches!(
            error,
            WorkflowError::InvalidTransition {
                operation: Operation::DenyAssigneeRejection,
                status: JobStatus::AssigneeRejected,
                ..
            }
        ));
    }

    #[test]
    fn confirmed_assignee_rejection_is_terminal_and_carries_cc_list() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = assigned_job(&engine);
        let job = apply(
            &engine,
            &job,
            LEAD.0,
            JobCommand::AssigneeReject { reason: "wrong team".to_string() },
            &holidays,
        )
        .expect("assignee reject");

        let error = apply(
            &engine,
            &job,
            3,
            JobCommand::ConfirmAssigneeRejection {
                comment: None,
                cc_emails: vec!["not-an-email".to_string()],
            },
            &holidays,
        )
        .expect_err("bad cc");
        assert!(matches!(error, WorkflowError::Validation { field: "cc_emails", .. }));

        let outcome = engine
            .apply(
                &job,
                &JobCommand::ConfirmAssigneeRejection {
                    comment: Some("agreed".to_string()),
                    cc_emails: vec!["studio@example.com".to_string()],
                },
                &TransitionContext::new(UserId(3), &holidays),
            )
            .expect("confirm");
        assert_eq!(outcome.job.status, JobStatus::Rejected);
        let cc = outcome.effects.iter().find_map(|effect| match effect {
            JobEffect::Notify(notification)
                if notification.kind == NotificationKind::AssigneeRejectionConfirmed =>
            {
                Some(notification.cc_emails.clone())
            }
            _ => None,
        });
        assert_eq!(cc, Some(vec!["studio@example.com".to_string()]));
    }

    #[test]
    fn extension_beyond_cap_is_rejected_without_mutation() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let error = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::ExtendDueDate { days: 35, reason: "client delay".to_string() },
            &holidays,
        )
        .expect_err("over cap");
        assert!(matches!(error, WorkflowError::Validation { field: "days", .. }));
        assert_eq!(job.due_date, date(2024, 6, 10));
        assert_eq!(job.extension_count, 0);

        let error = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::ExtendDueDate { days: 0, reason: "client delay".to_string() },
            &holidays,
        )
        .expect_err("zero days");
        assert!(matches!(error, WorkflowError::Validation { field: "days", .. }));
    }

    #[test]
    fn extension_moves_due_date_later_and_pins_original_once() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::from_dates([date(2024, 6, 11)]);
        let job = job_fixture(&two_level_flow());

        let extended = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::ExtendDueDate { days: 2, reason: "assets late".to_string() },
            &holidays,
        )
        .expect("extend");
        // Monday 06-10 + 2 working days, skipping the 11th.
        assert_eq!(extended.due_date, date(2024, 6, 13));
        assert_eq!(extended.original_due_date, Some(date(2024, 6, 10)));
        assert_eq!(extended.extension_count, 1);

        let again = apply(
            &engine,
            &extended,
            1,
            JobCommand::ExtendDueDate { days: 1, reason: "legal review".to_string() },
            &holidays,
        )
        .expect("extend again");
        assert_eq!(again.due_date, date(2024, 6, 14));
        assert_eq!(again.original_due_date, Some(date(2024, 6, 10)));
        assert_eq!(again.extension_count, 2);
        assert!(again.due_date >= extended.due_date);
    }

    #[test]
    fn extension_cap_follows_policy() {
        let directory = directory();
        let engine = WorkflowEngine::with_policy(
            &directory,
            WorkflowPolicy { max_extension_days: 5, ..WorkflowPolicy::default() },
        );
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let error = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::ExtendDueDate { days: 6, reason: "delay".to_string() },
            &holidays,
        )
        .expect_err("over policy cap");
        assert!(matches!(error, WorkflowError::Validation { .. }));
    }

    #[test]
    fn terminal_jobs_cannot_be_extended_or_cancelled() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let mut job = job_fixture(&two_level_flow());
        job.status = JobStatus::Closed;

        let error = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::ExtendDueDate { days: 1, reason: "late".to_string() },
            &holidays,
        )
        .expect_err("terminal");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));

        let cancel = JobCommand::Cancel { reason: None };
        let error =
            apply(&engine, &job, REQUESTER.0, cancel, &holidays).expect_err("terminal");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn only_requester_cancels() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let job = job_fixture(&two_level_flow());

        let error = apply(&engine, &job, 1, JobCommand::Cancel { reason: None }, &holidays)
            .expect_err("approver cannot cancel");
        assert!(matches!(error, WorkflowError::Unauthorized { .. }));

        let cancelled = apply(
            &engine,
            &job,
            REQUESTER.0,
            JobCommand::Cancel { reason: Some("campaign dropped".to_string()) },
            &holidays,
        )
        .expect("cancel");
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn parent_jobs_are_not_actionable() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let mut parent = job_fixture(&two_level_flow());
        parent.is_parent = true;
        parent.status = JobStatus::PendingDependency;

        let error = apply(&engine, &parent, 1, approve(), &holidays).expect_err("parent");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn transition_emits_audit_events_for_success_and_rejection() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let sink = InMemoryAuditSink::default();
        let job = job_fixture(&two_level_flow());
        let audit = AuditContext::new(Some(job.id), "req-42", "user:1");

        let approver = TransitionContext::new(UserId(1), &holidays);
        let stranger = TransitionContext::new(UserId(9), &holidays);
        let _ = engine
            .apply_with_audit(&job, &approve(), &approver, &sink, &audit)
            .expect("approve");
        let _ = engine
            .apply_with_audit(&job, &approve(), &stranger, &sink, &audit)
            .expect_err("stranger");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "workflow.transition_applied");
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[1].event_type, "workflow.transition_rejected");
        assert_eq!(events[1].metadata.get("error_class").map(String::as_str), Some("unauthorized"));
    }

    #[test]
    fn assignment_and_extension_emit_their_own_audit_categories() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, "req-7", "user:3");

        let job = job_fixture(&two_level_flow());
        let job = apply(&engine, &job, 1, approve(), &holidays).expect("first approval");
        let job = apply(&engine, &job, 2, approve(), &holidays).expect("second approval");
        let context = TransitionContext::new(UserId(3), &holidays);
        let assigned = engine
            .apply_with_audit(&job, &approve(), &context, &sink, &audit)
            .expect("final approval")
            .job;

        let assignment = sink.in_category(AuditCategory::Assignment);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment[0].event_type, "workflow.job_assigned");
        assert_eq!(assignment[0].job_id, Some(job.id));
        assert_eq!(assignment[0].meta("assignee_id"), Some(LEAD.to_string().as_str()));
        assert_eq!(assignment[0].meta("source"), Some("team_lead"));

        let extend = JobCommand::ExtendDueDate { days: 2, reason: "client delay".to_string() };
        let context = TransitionContext::new(REQUESTER, &holidays);
        let extended = engine
            .apply_with_audit(&assigned, &extend, &context, &sink, &audit)
            .expect("extend")
            .job;

        let sla = sink.in_category(AuditCategory::Sla);
        assert_eq!(sla.len(), 1);
        assert_eq!(sla[0].event_type, "workflow.due_date_extended");
        assert_eq!(sla[0].meta("from_due_date"), Some(assigned.due_date.to_string().as_str()));
        assert_eq!(sla[0].meta("to_due_date"), Some(extended.due_date.to_string().as_str()));
        assert_eq!(sla[0].outcome, AuditOutcome::Success);
    }

    #[test]
    fn manual_assignment_is_audited_as_assignment() {
        let directory = InMemoryOrgDirectory::default().with_user(DirectoryUser::active(WORKER));
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let sink = InMemoryAuditSink::default();
        let job = job_fixture(&FlowTemplate::skip_approval());
        let audit = AuditContext::new(Some(job.id), "req-8", "user:10");

        engine
            .apply_with_audit(
                &job,
                &JobCommand::AssignManually { assignee_id: WORKER },
                &TransitionContext::new(REQUESTER, &holidays),
                &sink,
                &audit,
            )
            .expect("assign");

        let assignment = sink.in_category(AuditCategory::Assignment);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment[0].meta("source"), Some("manual"));
        assert_eq!(assignment[0].meta("assignee_id"), Some(WORKER.to_string().as_str()));
    }

    #[test]
    fn replay_is_deterministic_for_same_command_sequence() {
        let directory = directory();
        let engine = WorkflowEngine::new(&directory);
        let holidays = HolidayCalendar::default();
        let now = Utc::now();
        let commands = [(1, approve()), (2, approve()), (3, approve())];

        let run = || {
            let mut job = job_fixture(&two_level_flow());
            job.created_at = now;
            job.updated_at = now;
            job.flow_snapshot = FlowSnapshot::capture(&two_level_flow(), None, now);
            for (actor, command) in &commands {
                let context = TransitionContext::new(UserId(*actor), &holidays).at(now);
                job = engine.apply(&job, command, &context).expect("replay").job;
            }
            job
        };

        assert_eq!(run(), run());
    }
}
