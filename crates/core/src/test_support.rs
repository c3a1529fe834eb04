use chrono::{NaiveDate, Utc};

use crate::domain::flow::{FlowLevel, FlowSnapshot, FlowTemplate, LevelLogic};
use crate::domain::job::{Job, JobCode, JobId, JobTypeId, Priority, ProjectId};
use crate::domain::status::{JobStatus, FULLY_APPROVED_LEVEL};
use crate::domain::user::UserId;

pub(crate) const REQUESTER: UserId = UserId(100);

pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

pub(crate) fn template(levels: &[(LevelLogic, &[i64])]) -> FlowTemplate {
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

/// A persisted-looking job bound to `template`, sitting at its first level
/// (or fully approved when the template has no levels).
pub(crate) fn job_fixture(template: &FlowTemplate) -> Job {
    let now = Utc::now();
    let snapshot = FlowSnapshot::capture(template, None, now);
    let (status, current_level) = if snapshot.skips_approval() {
        (JobStatus::Approved, FULLY_APPROVED_LEVEL)
    } else {
        (JobStatus::PENDING_APPROVAL, 1)
    };

    Job {
        id: JobId(1),
        code: JobCode("DJ-00001".to_string()),
        title: "Spring campaign banners".to_string(),
        project_id: ProjectId(1),
        job_type_id: JobTypeId(1),
        department_id: None,
        priority: Priority::Normal,
        status,
        current_level,
        approval_round: 1,
        requester_id: REQUESTER,
        assignee_id: None,
        due_date: date(2024, 6, 10),
        original_due_date: None,
        shifted_by_job_id: None,
        extension_count: 0,
        is_parent: false,
        parent_job_id: None,
        flow_snapshot: snapshot,
        approvals: Vec::new(),
        activity: Vec::new(),
        resume_status: None,
        final_link: None,
        completion_note: None,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}
