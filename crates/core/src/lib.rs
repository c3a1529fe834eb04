pub mod aggregate;
pub mod approvals;
pub mod assignment;
pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notify;
pub mod shift;
pub mod sla;

#[cfg(test)]
mod test_support;

pub use aggregate::{aggregate, ApprovalRollup, ParentRollup, WorkRollup};
pub use approvals::{ApprovalDenial, ApprovalFlowResolver};
pub use assignment::{AssignmentDecision, AssignmentSource, AutoAssignmentResolver};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink};
pub use directory::{DirectoryUser, InMemoryOrgDirectory, OrgDirectory};
pub use domain::flow::{FlowLevel, FlowSnapshot, FlowTemplate, FlowTemplateId, LevelLogic};
pub use domain::job::{
    ActivityEntry, ActivityKind, ApprovalDecision, ApprovalRecord, Job, JobCode, JobCodeFormat,
    JobId, JobTypeId, Priority, ProjectId,
};
pub use domain::shift::{ShiftFailure, ShiftLogEntry, ShiftReport};
pub use domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
pub use domain::user::{DepartmentId, UserId};
pub use errors::{ApplicationError, InterfaceError, WorkflowError};
pub use flows::{
    JobCommand, JobEffect, NewJob, Operation, RejectMode, StartTrigger, TransitionContext,
    TransitionOutcome, WorkflowEngine, WorkflowPolicy,
};
pub use notify::{InMemoryNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use shift::{ShiftedJob, SlaShiftPropagator};
pub use sla::{
    add_working_days, sla_status, working_days_between, Holiday, HolidayCalendar, SlaStatus,
};
