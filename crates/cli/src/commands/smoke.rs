use std::sync::Arc;
use std::time::Instant;

use anyhow::{ensure, Context};
use chrono::{NaiveDate, Utc};
use jobflow_core::config::{AppConfig, LoadOptions};
use jobflow_core::directory::{DirectoryUser, InMemoryOrgDirectory};
use jobflow_core::domain::flow::{FlowLevel, FlowTemplate, LevelLogic};
use jobflow_core::domain::job::{JobTypeId, Priority, ProjectId};
use jobflow_core::domain::status::JobStatus;
use jobflow_core::domain::user::UserId;
use jobflow_core::flows::{NewJob, StartTrigger};
use jobflow_core::notify::InMemoryNotifier;
use jobflow_core::sla::Holiday;
use jobflow_db::{
    connect_with_settings, migrations, FlowTemplateRepository, HolidayRepository,
    RequestContext, SqlFlowTemplateRepository, SqlHolidayRepository, SqlJobRepository,
    WorkflowService,
};
use serde::Serialize;

use crate::commands::{exit_code, CommandResult};

const REQUESTER: UserId = UserId(1);
const APPROVER: UserId = UserId(2);
const WORKER: UserId = UserId(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    runtime.block_on(async {
        pool.close().await;
    });

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: format!("migration execution failed: {error}"),
        }),
    }

    let workflow_started = Instant::now();
    let workflow_result = runtime.block_on(workflow_round_trip(&config));
    checks.push(match workflow_result {
        Ok(message) => SmokeCheck {
            name: "workflow_round_trip",
            status: SmokeStatus::Pass,
            elapsed_ms: workflow_started.elapsed().as_millis() as u64,
            message,
        },
        Err(error) => SmokeCheck {
            name: "workflow_round_trip",
            status: SmokeStatus::Fail,
            elapsed_ms: workflow_started.elapsed().as_millis() as u64,
            message: format!("{error:#}"),
        },
    });

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Drives one job from creation to close against a scratch in-memory
/// database, using the configured policy, codes, and holidays.
async fn workflow_round_trip(config: &AppConfig) -> anyhow::Result<String> {
    let pool = connect_with_settings("sqlite::memory:", 1, config.database.timeout_secs)
        .await
        .context("open scratch database")?;
    migrations::run_pending(&pool).await.context("migrate scratch database")?;

    let holidays = Arc::new(SqlHolidayRepository::new(pool.clone()));
    for date in &config.holidays.dates {
        holidays
            .save_holiday(Holiday { date: *date, name: "configured".to_string(), recurring: false })
            .await
            .context("load configured holidays")?;
    }
    for (month, day) in &config.holidays.recurring {
        let date = NaiveDate::from_ymd_opt(2024, *month, *day)
            .with_context(|| format!("recurring holiday {month:02}-{day:02}"))?;
        holidays
            .save_holiday(Holiday { date, name: "configured".to_string(), recurring: true })
            .await
            .context("load configured holidays")?;
    }

    let flows = Arc::new(SqlFlowTemplateRepository::new(pool.clone()));
    flows
        .save(FlowTemplate {
            id: None,
            name: "smoke-review".to_string(),
            project_id: Some(ProjectId(1)),
            job_type_id: None,
            levels: vec![FlowLevel {
                level: 1,
                role: "reviewer".to_string(),
                logic: LevelLogic::Any,
                approvers: vec![APPROVER],
            }],
            default_assignee_id: Some(WORKER),
        })
        .await
        .context("save flow template")?;

    let directory = InMemoryOrgDirectory::default()
        .with_user(DirectoryUser::active(REQUESTER))
        .with_user(DirectoryUser::active(APPROVER))
        .with_user(DirectoryUser::active(WORKER));
    let notifier = InMemoryNotifier::default();
    let service = WorkflowService::new(
        Arc::new(SqlJobRepository::with_code_format(pool.clone(), config.workflow.code_format())),
        holidays,
        flows,
        Arc::new(directory),
        Arc::new(notifier.clone()),
    )
    .with_policy(config.workflow.policy());

    let requester = RequestContext::new(REQUESTER, "smoke-requester");
    let approver = RequestContext::new(APPROVER, "smoke-approver");
    let worker = RequestContext::new(WORKER, "smoke-worker");

    let created = service
        .create_job(
            &requester,
            NewJob {
                title: "Smoke test banner".to_string(),
                project_id: ProjectId(1),
                job_type_id: JobTypeId(1),
                department_id: None,
                priority: Priority::Normal,
                requester_id: REQUESTER,
                nominated_assignee_id: None,
                sla_days: config.workflow.default_sla_days,
                start_date: Utc::now().date_naive(),
                is_parent: false,
                parent_job_id: None,
            },
        )
        .await
        .context("create job")?;
    let job_id = created.job.id;

    service.approve_job(job_id, &approver, None).await.context("approve job")?;
    service.start_job(job_id, &worker, StartTrigger::Manual).await.context("start job")?;
    service
        .complete_job(job_id, &worker, "https://example.invalid/smoke.zip".to_string(), None)
        .await
        .context("complete job")?;
    let closed = service.confirm_close_job(job_id, &requester).await.context("close job")?;
    ensure!(closed.to == JobStatus::Closed, "expected a closed job, got `{}`", closed.to);

    pool.close().await;
    Ok(format!(
        "{} went through create, approve, start, complete and close ({} notification(s))",
        closed.job.code.0,
        notifier.sent().len()
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let code = if failed { exit_code::SMOKE_FAILED } else { exit_code::OK };
    CommandResult::report("smoke", code, &report.summary, &report)
}
