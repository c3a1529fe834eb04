//! Audit trail of workflow decisions. Events are handed to an [`AuditSink`]
//! next to the tracing output; the sink decides where they are kept.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assignment::AssignmentDecision;
use crate::domain::job::JobId;
use crate::domain::shift::{ShiftFailure, ShiftLogEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Status transitions and job creation.
    Workflow,
    /// Automatic and manual worker assignment.
    Assignment,
    /// Due-date extensions and urgent-job shifts.
    Sla,
    /// Writes that did not make it to the store.
    Persistence,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Assignment => "assignment",
            Self::Sla => "sla",
            Self::Persistence => "persistence",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Who is acting and under which request id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub job_id: Option<JobId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        job_id: Option<JobId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { job_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    /// Same request, another job. Used when one command touches several jobs.
    pub fn for_job(&self, job_id: JobId) -> Self {
        Self { job_id: Some(job_id), ..self.clone() }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            self.job_id,
            self.correlation_id.clone(),
            event_type,
            category,
            self.actor.clone(),
            outcome,
        )
    }

    pub fn assignment_event(&self, decision: &AssignmentDecision) -> AuditEvent {
        match decision {
            AssignmentDecision::Assign { assignee_id, source } => self
                .event("workflow.job_assigned", AuditCategory::Assignment, AuditOutcome::Success)
                .with_metadata("assignee_id", assignee_id.to_string())
                .with_metadata("source", source.as_str()),
            AssignmentDecision::NeedsManualAssign { skipped } => self
                .event(
                    "workflow.manual_assignment_required",
                    AuditCategory::Assignment,
                    AuditOutcome::Failed,
                )
                .with_metadata("skipped_candidates", skipped.len().to_string()),
        }
    }

    pub fn shift_event(&self, entry: &ShiftLogEntry) -> AuditEvent {
        self.for_job(entry.job_id)
            .event("workflow.due_date_shifted", AuditCategory::Sla, AuditOutcome::Success)
            .with_metadata("urgent_job_id", entry.urgent_job_id.to_string())
            .with_metadata("original_due_date", entry.original_due_date.to_string())
            .with_metadata("new_due_date", entry.new_due_date.to_string())
            .with_metadata("shift_days", entry.shift_days.to_string())
    }

    pub fn shift_failure_event(&self, failure: &ShiftFailure) -> AuditEvent {
        self.for_job(failure.job_id)
            .event(
                "workflow.due_date_shift_failed",
                AuditCategory::Persistence,
                AuditOutcome::Failed,
            )
            .with_metadata("error", failure.reason.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub job_id: Option<JobId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        job_id: Option<JobId>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            job_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Keeps every event in memory; the CLI and the tests read them back.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn in_category(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.category == category).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::assignment::{AssignmentDecision, AssignmentSource};
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink};
    use crate::domain::job::JobId;
    use crate::domain::shift::{ShiftFailure, ShiftLogEntry};
    use crate::domain::user::UserId;
    use crate::test_support::date;

    #[test]
    fn context_events_carry_request_fields() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new(Some(JobId(42)), "req-123", "user:7");
        sink.emit(
            context
                .event(
                    "workflow.transition_applied",
                    AuditCategory::Workflow,
                    AuditOutcome::Success,
                )
                .with_metadata("to", "pending_level_2"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].actor, "user:7");
        assert_eq!(events[0].job_id, Some(JobId(42)));
        assert_eq!(events[0].meta("to"), Some("pending_level_2"));
    }

    #[test]
    fn assignment_decisions_map_to_assignment_events() {
        let context = AuditContext::new(Some(JobId(3)), "req-1", "user:1");

        let assigned = context.assignment_event(&AssignmentDecision::Assign {
            assignee_id: UserId(50),
            source: AssignmentSource::TeamLead,
        });
        assert_eq!(assigned.category, AuditCategory::Assignment);
        assert_eq!(assigned.outcome, AuditOutcome::Success);
        assert_eq!(assigned.meta("source"), Some("team_lead"));

        let manual = AssignmentDecision::NeedsManualAssign { skipped: Vec::new() };
        let deferred = context.assignment_event(&manual);
        assert_eq!(deferred.event_type, "workflow.manual_assignment_required");
        assert_eq!(deferred.outcome, AuditOutcome::Failed);
    }

    #[test]
    fn shift_events_point_at_the_moved_job() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new(Some(JobId(1)), "req-9", "user:4");
        sink.emit(context.shift_event(&ShiftLogEntry {
            job_id: JobId(7),
            urgent_job_id: JobId(1),
            original_due_date: date(2024, 6, 10),
            new_due_date: date(2024, 6, 12),
            shift_days: 2,
            created_at: Utc::now(),
        }));
        sink.emit(context.shift_failure_event(&ShiftFailure {
            job_id: JobId(8),
            reason: "version conflict".to_string(),
        }));

        let sla = sink.in_category(AuditCategory::Sla);
        assert_eq!(sla.len(), 1);
        assert_eq!(sla[0].job_id, Some(JobId(7)));
        assert_eq!(sla[0].meta("new_due_date"), Some("2024-06-12"));
        assert_eq!(sla[0].correlation_id, "req-9");

        let failed = sink.in_category(AuditCategory::Persistence);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, Some(JobId(8)));
        assert_eq!(failed[0].outcome, AuditOutcome::Failed);
    }
}
