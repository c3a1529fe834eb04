use std::collections::BTreeSet;

use chrono::{Datelike, Utc};
use jobflow_core::config::{AppConfig, HolidayConfig, LoadOptions};
use jobflow_core::domain::job::JobId;
use jobflow_core::sla::add_working_days;
use jobflow_db::{
    connect_with_settings, migrations, DbPool, HolidayRepository, SqlHolidayRepository,
};
use serde::Serialize;
use sqlx::Row;

use crate::commands::{exit_code, CommandResult};

const SHIFT_LOG_GUARDS: [&str; 2] = ["job_shift_log_no_update", "job_shift_log_no_delete"];
const STORE_CHECKS: &[&str] =
    &["database_schema", "flow_templates", "holiday_calendar", "shift_log_guards"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    /// Works, but probably not the way the operator intended.
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let code = if report.overall_status == CheckStatus::Fail {
        exit_code::CHECK_FAILED
    } else {
        exit_code::OK
    };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            serde_json::json!({
                "overall_status": "fail",
                "summary": "doctor serialization failed",
                "error": error.to_string(),
            })
            .to_string()
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code: code, output }
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks = vec![
                DoctorCheck::new(
                    "config_validation",
                    CheckStatus::Pass,
                    "configuration loaded and validated",
                ),
                check_workflow_policy(&config),
            ];
            checks.extend(store_checks(&config));
            checks
        }
        Err(error) => {
            let mut checks =
                vec![DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string())];
            checks.extend(skipped(&["workflow_policy"], "configuration did not load"));
            checks.extend(skipped(STORE_CHECKS, "configuration did not load"));
            checks
        }
    };

    let failed = checks.iter().filter(|check| check.status == CheckStatus::Fail).count();
    let warned = checks.iter().filter(|check| check.status == CheckStatus::Warn).count();
    let (overall_status, summary) = match (failed, warned) {
        (0, 0) => (CheckStatus::Pass, "doctor: all readiness checks passed".to_string()),
        (0, warned) => {
            (CheckStatus::Warn, format!("doctor: ready, with {warned} warning(s) to review"))
        }
        (failed, _) => (CheckStatus::Fail, format!("doctor: {failed} readiness check(s) failed")),
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(names: &[&'static str], reason: &str) -> Vec<DoctorCheck> {
    names
        .iter()
        .map(|&name| DoctorCheck::new(name, CheckStatus::Skipped, format!("skipped: {reason}")))
        .collect()
}

/// Shows the policy the engine will run with, plus a sample due date so the
/// configured holidays can be eyeballed.
fn check_workflow_policy(config: &AppConfig) -> DoctorCheck {
    let workflow = &config.workflow;
    let today = Utc::now().date_naive();
    let sample_due =
        add_working_days(today, workflow.default_sla_days, &config.holidays.calendar());

    DoctorCheck::new(
        "workflow_policy",
        CheckStatus::Pass,
        format!(
            "codes {}, shift {} working day(s), extensions up to {} day(s), \
             SLA up to {} day(s); a job opened today with the default SLA is due {sample_due}",
            workflow.code_format().format(JobId(1)).0,
            workflow.shift_days,
            workflow.max_extension_days,
            workflow.max_sla_days,
        ),
    )
}

/// Read-only checks against the configured database. Nothing is migrated
/// or written here; `jobflow migrate` does that.
fn store_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck::new(
                "database_schema",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            )];
            checks.extend(skipped(&STORE_CHECKS[1..], "no async runtime"));
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck::new(
                    "database_schema",
                    CheckStatus::Fail,
                    format!("failed to connect to `{}`: {error}", config.database.url),
                )];
                checks.extend(skipped(&STORE_CHECKS[1..], "database is unreachable"));
                return checks;
            }
        };

        let schema = check_schema(&pool).await;
        let checks = if schema.status == CheckStatus::Pass {
            vec![
                schema,
                check_flow_templates(&pool).await,
                check_holidays(&pool, &config.holidays).await,
                check_shift_log_guards(&pool).await,
            ]
        } else {
            let mut checks = vec![schema];
            checks.extend(skipped(&STORE_CHECKS[1..], "schema is not migrated"));
            checks
        };
        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = migrations::MIGRATOR.iter().count();
    let applied = sqlx::query("SELECT COUNT(*) AS applied FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await
        .and_then(|row| row.try_get::<i64, _>("applied"));

    match applied {
        Ok(applied) if applied as usize >= known => DoctorCheck::new(
            "database_schema",
            CheckStatus::Pass,
            format!("{applied}/{known} migration(s) applied"),
        ),
        Ok(applied) => DoctorCheck::new(
            "database_schema",
            CheckStatus::Fail,
            format!("{applied}/{known} migration(s) applied; run `jobflow migrate`"),
        ),
        Err(_) => DoctorCheck::new(
            "database_schema",
            CheckStatus::Fail,
            "no migrations have been applied; run `jobflow migrate`",
        ),
    }
}

/// Without an active template a project falls back to the zero-level flow
/// and its jobs skip approval entirely.
async fn check_flow_templates(pool: &DbPool) -> DoctorCheck {
    let counts = sqlx::query(
        "SELECT COUNT(*) AS active,
                COUNT(DISTINCT project_id) AS projects,
                COALESCE(SUM(levels_json = '[]'), 0) AS empty
         FROM flow_template
         WHERE is_active = 1",
    )
    .fetch_one(pool)
    .await
    .and_then(|row| {
        Ok((
            row.try_get::<i64, _>("active")?,
            row.try_get::<i64, _>("projects")?,
            row.try_get::<i64, _>("empty")?,
        ))
    });

    match counts {
        Ok((0, _, _)) => DoctorCheck::new(
            "flow_templates",
            CheckStatus::Warn,
            "no active flow templates; every job will skip approval",
        ),
        Ok((active, projects, 0)) => DoctorCheck::new(
            "flow_templates",
            CheckStatus::Pass,
            format!("{active} active template(s) across {projects} project(s)"),
        ),
        Ok((active, projects, empty)) => DoctorCheck::new(
            "flow_templates",
            CheckStatus::Warn,
            format!(
                "{active} active template(s) across {projects} project(s); \
                 {empty} have no levels and skip approval"
            ),
        ),
        Err(error) => DoctorCheck::new(
            "flow_templates",
            CheckStatus::Fail,
            format!("could not read flow templates: {error}"),
        ),
    }
}

/// The service reads holidays from the table only, so configured holidays
/// that were never stored do not move due dates.
async fn check_holidays(pool: &DbPool, configured: &HolidayConfig) -> DoctorCheck {
    let stored = match SqlHolidayRepository::new(pool.clone()).list_holidays().await {
        Ok(stored) => stored,
        Err(error) => {
            return DoctorCheck::new(
                "holiday_calendar",
                CheckStatus::Fail,
                format!("could not read holidays: {error}"),
            );
        }
    };

    let fixed: BTreeSet<_> =
        stored.iter().filter(|holiday| !holiday.recurring).map(|holiday| holiday.date).collect();
    let yearly: BTreeSet<_> = stored
        .iter()
        .filter(|holiday| holiday.recurring)
        .map(|holiday| (holiday.date.month(), holiday.date.day()))
        .collect();
    let missing = configured.dates.iter().filter(|&&date| !fixed.contains(&date)).count()
        + configured.recurring.iter().filter(|&&day| !yearly.contains(&day)).count();

    if stored.is_empty() && missing == 0 {
        DoctorCheck::new(
            "holiday_calendar",
            CheckStatus::Warn,
            "holiday table is empty; due dates only skip weekends",
        )
    } else if missing > 0 {
        DoctorCheck::new(
            "holiday_calendar",
            CheckStatus::Warn,
            format!(
                "{missing} configured holiday(s) are not in the holiday table \
                 and will not move due dates"
            ),
        )
    } else {
        DoctorCheck::new(
            "holiday_calendar",
            CheckStatus::Pass,
            format!("{} fixed and {} recurring holiday(s) stored", fixed.len(), yearly.len()),
        )
    }
}

async fn check_shift_log_guards(pool: &DbPool) -> DoctorCheck {
    let present = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = 'job_shift_log'",
    )
    .fetch_all(pool)
    .await
    .and_then(|rows| {
        rows.iter().map(|row| row.try_get::<String, _>("name")).collect::<Result<Vec<_>, _>>()
    });

    match present {
        Ok(present) => {
            let missing: Vec<&str> = SHIFT_LOG_GUARDS
                .iter()
                .copied()
                .filter(|guard| !present.iter().any(|name| name == guard))
                .collect();
            if missing.is_empty() {
                DoctorCheck::new(
                    "shift_log_guards",
                    CheckStatus::Pass,
                    "shift log is append-only (update and delete triggers present)",
                )
            } else {
                DoctorCheck::new(
                    "shift_log_guards",
                    CheckStatus::Fail,
                    format!(
                        "shift log can be rewritten; missing trigger(s): {}",
                        missing.join(", ")
                    ),
                )
            }
        }
        Err(error) => DoctorCheck::new(
            "shift_log_guards",
            CheckStatus::Fail,
            format!("could not inspect triggers: {error}"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];
    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }
    lines.join("\n")
}
