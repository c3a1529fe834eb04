use chrono::NaiveDate;

use jobflow_core::directory::{DirectoryUser, InMemoryOrgDirectory};
use jobflow_core::domain::flow::{FlowLevel, FlowTemplate, LevelLogic};
use jobflow_core::domain::job::{Job, JobTypeId, Priority, ProjectId};
use jobflow_core::domain::user::UserId;
use jobflow_core::flows::{NewJob, TransitionContext, WorkflowEngine};
use jobflow_core::sla::HolidayCalendar;

pub(crate) const REQUESTER: UserId = UserId(100);
pub(crate) const APPROVER: UserId = UserId(1);
pub(crate) const WORKER: UserId = UserId(50);

pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

pub(crate) fn flow_template(levels: &[(LevelLogic, &[i64])]) -> FlowTemplate {
    FlowTemplate {
        id: None,
        name: "creative-review".to_string(),
        project_id: None,
        job_type_id: None,
        levels: levels
            .iter()
            .enumerate()
            .map(|(index, (logic, approvers))| FlowLevel {
                level: index as u32 + 1,
                role: format!("level_{}_role", index + 1),
                logic: *logic,
                approvers: approvers.iter().copied().map(UserId).collect(),
            })
            .collect(),
        default_assignee_id: None,
    }
}

pub(crate) fn one_level_flow() -> FlowTemplate {
    flow_template(&[(LevelLogic::Any, &[APPROVER.0])])
}

pub(crate) fn directory() -> InMemoryOrgDirectory {
    InMemoryOrgDirectory::default()
        .with_user(DirectoryUser::active(REQUESTER))
        .with_user(DirectoryUser::active(APPROVER))
        .with_user(DirectoryUser::active(WORKER))
}

pub(crate) fn new_job(priority: Priority, worker: Option<UserId>) -> NewJob {
    NewJob {
        title: "Autumn catalogue layout".to_string(),
        project_id: ProjectId(7),
        job_type_id: JobTypeId(3),
        department_id: None,
        priority,
        requester_id: REQUESTER,
        nominated_assignee_id: worker,
        sla_days: 3,
        start_date: date(2024, 6, 3),
        is_parent: false,
        parent_job_id: None,
    }
}

/// Runs `request` through the engine to get an unsaved job ready for insert.
pub(crate) fn prepared_job(template: &FlowTemplate, request: &NewJob) -> Job {
    let directory = directory();
    let holidays = HolidayCalendar::default();
    WorkflowEngine::new(&directory)
        .create(request, template, &TransitionContext::new(request.requester_id, &holidays))
        .expect("job should be created")
        .job
}
