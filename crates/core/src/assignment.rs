use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::OrgDirectory;
use crate::domain::job::Job;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    FlowDefault,
    TeamLead,
    DepartmentManager,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowDefault => "flow_default",
            Self::TeamLead => "team_lead",
            Self::DepartmentManager => "department_manager",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub source: AssignmentSource,
    pub candidate: Option<UserId>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentDecision {
    Assign { assignee_id: UserId, source: AssignmentSource },
    NeedsManualAssign { skipped: Vec<SkippedCandidate> },
}

impl AssignmentDecision {
    pub fn assignee(&self) -> Option<UserId> {
        match self {
            Self::Assign { assignee_id, .. } => Some(*assignee_id),
            Self::NeedsManualAssign { .. } => None,
        }
    }
}

/// Picks a worker for a fully approved job: flow default, then the
/// requester's team lead, then the department manager.
pub struct AutoAssignmentResolver<'a, D: ?Sized> {
    directory: &'a D,
}

impl<'a, D> AutoAssignmentResolver<'a, D>
where
    D: OrgDirectory + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn resolve(&self, job: &Job) -> AssignmentDecision {
        let department =
            job.department_id.or_else(|| self.directory.department_of(job.requester_id));
        let candidates = [
            (AssignmentSource::FlowDefault, job.flow_snapshot.default_assignee_id()),
            (AssignmentSource::TeamLead, self.directory.team_lead(job.requester_id)),
            (
                AssignmentSource::DepartmentManager,
                department.and_then(|department| self.directory.department_manager(department)),
            ),
        ];

        let mut skipped = Vec::new();
        for (source, candidate) in candidates {
            match candidate {
                Some(user) if self.directory.is_active(user) => {
                    debug!(
                        event_name = "workflow.assignment.resolved",
                        job_id = job.id.0,
                        assignee_id = user.0,
                        source = source.as_str(),
                        "auto-assignment candidate selected"
                    );
                    return AssignmentDecision::Assign { assignee_id: user, source };
                }
                Some(user) => skipped.push(SkippedCandidate {
                    source,
                    candidate: Some(user),
                    reason: format!("{user} is inactive or unknown"),
                }),
                None => skipped.push(SkippedCandidate {
                    source,
                    candidate: None,
                    reason: "no candidate configured".to_string(),
                }),
            }
        }

        debug!(
            event_name = "workflow.assignment.exhausted",
            job_id = job.id.0,
            skipped = skipped.len(),
            "auto-assignment cascade exhausted; manual assignment required"
        );
        AssignmentDecision::NeedsManualAssign { skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::{AssignmentDecision, AssignmentSource, AutoAssignmentResolver};
    use crate::directory::{DirectoryUser, InMemoryOrgDirectory};
    use crate::domain::user::{DepartmentId, UserId};
    use crate::test_support::{job_fixture, template};

    const REQUESTER: UserId = UserId(100);

    fn directory() -> InMemoryOrgDirectory {
        InMemoryOrgDirectory::default()
            .with_user(
                DirectoryUser::active(REQUESTER)
                    .with_team_lead(UserId(20))
                    .in_department(DepartmentId(3)),
            )
            .with_user(DirectoryUser::active(UserId(10)))
            .with_user(DirectoryUser::active(UserId(20)))
            .with_user(DirectoryUser::active(UserId(30)))
            .with_department_manager(DepartmentId(3), UserId(30))
    }

    #[test]
    fn flow_default_wins_when_active() {
        let mut flow = template(&[]);
        flow.default_assignee_id = Some(UserId(10));
        let job = job_fixture(&flow);
        let directory = directory();

        let decision = AutoAssignmentResolver::new(&directory).resolve(&job);
        assert_eq!(
            decision,
            AssignmentDecision::Assign {
                assignee_id: UserId(10),
                source: AssignmentSource::FlowDefault
            }
        );
    }

    #[test]
    fn falls_back_to_team_lead_then_department_manager() {
        let mut flow = template(&[]);
        flow.default_assignee_id = Some(UserId(99));
        let job = job_fixture(&flow);

        let directory = directory();
        let decision = AutoAssignmentResolver::new(&directory).resolve(&job);
        assert_eq!(decision.assignee(), Some(UserId(20)));

        let directory = directory.with_user(DirectoryUser::active(UserId(20)).inactive());
        let decision = AutoAssignmentResolver::new(&directory).resolve(&job);
        assert_eq!(
            decision,
            AssignmentDecision::Assign {
                assignee_id: UserId(30),
                source: AssignmentSource::DepartmentManager
            }
        );
    }

    #[test]
    fn job_department_takes_precedence_over_requester_department() {
        let mut job = job_fixture(&template(&[]));
        job.department_id = Some(DepartmentId(8));
        let directory = InMemoryOrgDirectory::default()
            .with_user(DirectoryUser::active(REQUESTER).in_department(DepartmentId(3)))
            .with_user(DirectoryUser::active(UserId(30)))
            .with_user(DirectoryUser::active(UserId(80)))
            .with_department_manager(DepartmentId(3), UserId(30))
            .with_department_manager(DepartmentId(8), UserId(80));

        let decision = AutoAssignmentResolver::new(&directory).resolve(&job);
        assert_eq!(decision.assignee(), Some(UserId(80)));
    }

    #[test]
    fn exhausted_cascade_requires_manual_assignment() {
        let job = job_fixture(&template(&[]));
        let directory = InMemoryOrgDirectory::default();

        let decision = AutoAssignmentResolver::new(&directory).resolve(&job);
        match decision {
            AssignmentDecision::NeedsManualAssign { skipped } => {
                assert_eq!(skipped.len(), 3);
                assert_eq!(skipped[0].source, AssignmentSource::FlowDefault);
            }
            other => panic!("expected manual assignment, got {other:?}"),
        }
    }
}
