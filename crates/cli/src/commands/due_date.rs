use chrono::NaiveDate;
use clap::Args;
use jobflow_core::config::{AppConfig, LoadOptions};
use jobflow_core::sla::{add_working_days, is_weekend, sla_status};
use serde_json::json;

use crate::commands::{exit_code, CommandResult};

#[derive(Debug, Clone, Args)]
pub struct DueDateArgs {
    #[arg(long, help = "First day of work, YYYY-MM-DD")]
    pub start: String,
    #[arg(long, help = "Working days to add; defaults to workflow.default_sla_days")]
    pub days: Option<u32>,
    #[arg(
        long = "holiday",
        help = "Extra holiday on top of configured ones, YYYY-MM-DD (repeatable)"
    )]
    pub holidays: Vec<String>,
    #[arg(long, help = "Also report the SLA status as of this date, YYYY-MM-DD")]
    pub today: Option<String>,
}

pub fn run(args: &DueDateArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("due-date", &error),
    };

    let start = match parse_date("--start", &args.start) {
        Ok(start) => start,
        Err(message) => return invalid_input(message),
    };
    let today = match args.today.as_deref().map(|raw| parse_date("--today", raw)).transpose() {
        Ok(today) => today,
        Err(message) => return invalid_input(message),
    };
    let mut holidays = config.holidays.clone();
    for raw in &args.holidays {
        match parse_date("--holiday", raw) {
            Ok(date) => holidays.dates.push(date),
            Err(message) => {
                return invalid_input(message);
            }
        }
    }

    let calendar = holidays.calendar();
    let days = args.days.unwrap_or(config.workflow.default_sla_days);
    let due_date = add_working_days(start, days, &calendar);
    let skipped_holidays: Vec<String> = start
        .iter_days()
        .skip(1)
        .take_while(|date| *date <= due_date)
        .filter(|date| !is_weekend(*date) && calendar.is_holiday(*date))
        .map(|date| date.to_string())
        .collect();

    let mut details = json!({
        "start": start.to_string(),
        "working_days": days,
        "due_date": due_date.to_string(),
        "skipped_holidays": skipped_holidays,
    });
    if let Some(today) = today {
        let status = sla_status(due_date, today, config.workflow.due_soon_days, &calendar);
        details["today"] = json!(today.to_string());
        details["sla_status"] = json!(status);
    }

    CommandResult::success_with(
        "due-date",
        format!("due {due_date} ({days} working day(s) after {start})"),
        details,
    )
}

fn invalid_input(message: String) -> CommandResult {
    CommandResult::failure("due-date", "invalid_input", message, exit_code::INVALID_INPUT)
}

fn parse_date(flag: &str, raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{flag} expects a YYYY-MM-DD date, got `{raw}`"))
}
