use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::job::JobCodeFormat;
use crate::flows::WorkflowPolicy;
use crate::sla::HolidayCalendar;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub holidays: HolidayConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub code_prefix: String,
    pub code_width: usize,
    pub shift_days: u32,
    pub max_extension_days: u32,
    pub max_sla_days: u32,
    pub default_sla_days: u32,
    pub due_soon_days: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HolidayConfig {
    pub dates: Vec<NaiveDate>,
    /// `(month, day)` pairs observed every year.
    pub recurring: Vec<(u32, u32)>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub shift_days: Option<u32>,
    pub max_extension_days: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://jobflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig::default(),
            holidays: HolidayConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let policy = WorkflowPolicy::default();
        let codes = JobCodeFormat::default();
        Self {
            code_prefix: codes.prefix,
            code_width: codes.width,
            shift_days: policy.shift_days,
            max_extension_days: policy.max_extension_days,
            max_sla_days: policy.max_sla_days,
            default_sla_days: 3,
            due_soon_days: 1,
        }
    }
}

impl WorkflowConfig {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            shift_days: self.shift_days,
            max_extension_days: self.max_extension_days,
            max_sla_days: self.max_sla_days,
        }
    }

    pub fn code_format(&self) -> JobCodeFormat {
        JobCodeFormat { prefix: self.code_prefix.clone(), width: self.code_width }
    }
}

impl HolidayConfig {
    pub fn calendar(&self) -> HolidayCalendar {
        self.recurring.iter().fold(
            HolidayCalendar::from_dates(self.dates.iter().copied()),
            |calendar, (month, day)| calendar.with_recurring(*month, *day),
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("jobflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(code_prefix) = workflow.code_prefix {
                self.workflow.code_prefix = code_prefix;
            }
            if let Some(code_width) = workflow.code_width {
                self.workflow.code_width = code_width;
            }
            if let Some(shift_days) = workflow.shift_days {
                self.workflow.shift_days = shift_days;
            }
            if let Some(max_extension_days) = workflow.max_extension_days {
                self.workflow.max_extension_days = max_extension_days;
            }
            if let Some(max_sla_days) = workflow.max_sla_days {
                self.workflow.max_sla_days = max_sla_days;
            }
            if let Some(default_sla_days) = workflow.default_sla_days {
                self.workflow.default_sla_days = default_sla_days;
            }
            if let Some(due_soon_days) = workflow.due_soon_days {
                self.workflow.due_soon_days = due_soon_days;
            }
        }

        if let Some(holidays) = patch.holidays {
            if let Some(dates) = holidays.dates {
                self.holidays.dates = dates
                    .iter()
                    .map(|raw| parse_holiday_date("holidays.dates", raw))
                    .collect::<Result<_, _>>()?;
            }
            if let Some(recurring) = holidays.recurring {
                self.holidays.recurring = recurring
                    .iter()
                    .map(|raw| parse_month_day("holidays.recurring", raw))
                    .collect::<Result<_, _>>()?;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("JOBFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("JOBFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("JOBFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("JOBFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("JOBFLOW_WORKFLOW_CODE_PREFIX") {
            self.workflow.code_prefix = value;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_CODE_WIDTH") {
            self.workflow.code_width = parse_usize("JOBFLOW_WORKFLOW_CODE_WIDTH", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_SHIFT_DAYS") {
            self.workflow.shift_days = parse_u32("JOBFLOW_WORKFLOW_SHIFT_DAYS", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_MAX_EXTENSION_DAYS") {
            self.workflow.max_extension_days =
                parse_u32("JOBFLOW_WORKFLOW_MAX_EXTENSION_DAYS", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_MAX_SLA_DAYS") {
            self.workflow.max_sla_days = parse_u32("JOBFLOW_WORKFLOW_MAX_SLA_DAYS", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_DEFAULT_SLA_DAYS") {
            self.workflow.default_sla_days =
                parse_u32("JOBFLOW_WORKFLOW_DEFAULT_SLA_DAYS", &value)?;
        }
        if let Some(value) = read_env("JOBFLOW_WORKFLOW_DUE_SOON_DAYS") {
            self.workflow.due_soon_days = parse_u32("JOBFLOW_WORKFLOW_DUE_SOON_DAYS", &value)?;
        }

        if let Some(value) = read_env("JOBFLOW_HOLIDAYS_DATES") {
            self.holidays.dates = split_list(&value)
                .map(|raw| parse_env_value("JOBFLOW_HOLIDAYS_DATES", raw, |raw| {
                    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
                }))
                .collect::<Result<_, _>>()?;
        }
        if let Some(value) = read_env("JOBFLOW_HOLIDAYS_RECURRING") {
            self.holidays.recurring = split_list(&value)
                .map(|raw| parse_env_value("JOBFLOW_HOLIDAYS_RECURRING", raw, month_day))
                .collect::<Result<_, _>>()?;
        }

        let log_level =
            read_env("JOBFLOW_LOGGING_LEVEL").or_else(|| read_env("JOBFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("JOBFLOW_LOGGING_FORMAT").or_else(|| read_env("JOBFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(shift_days) = overrides.shift_days {
            self.workflow.shift_days = shift_days;
        }
        if let Some(max_extension_days) = overrides.max_extension_days {
            self.workflow.max_extension_days = max_extension_days;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("jobflow.toml"), PathBuf::from("config/jobflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    let prefix = workflow.code_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(
            "workflow.code_prefix must be non-empty and alphanumeric (e.g. `DJ`)".to_string(),
        ));
    }

    if workflow.code_width == 0 || workflow.code_width > 12 {
        return Err(ConfigError::Validation(
            "workflow.code_width must be in range 1..=12".to_string(),
        ));
    }

    if workflow.shift_days == 0 || workflow.shift_days > 10 {
        return Err(ConfigError::Validation(
            "workflow.shift_days must be in range 1..=10".to_string(),
        ));
    }

    if workflow.max_extension_days == 0 || workflow.max_extension_days > 90 {
        return Err(ConfigError::Validation(
            "workflow.max_extension_days must be in range 1..=90".to_string(),
        ));
    }

    if workflow.max_sla_days == 0 || workflow.max_sla_days > 1000 {
        return Err(ConfigError::Validation(
            "workflow.max_sla_days must be in range 1..=1000".to_string(),
        ));
    }

    if workflow.default_sla_days == 0 || workflow.default_sla_days > workflow.max_sla_days {
        return Err(ConfigError::Validation(format!(
            "workflow.default_sla_days must be in range 1..={}",
            workflow.max_sla_days
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn month_day(raw: &str) -> Option<(u32, u32)> {
    let (month, day) = raw.trim().split_once('-')?;
    let month = month.parse::<u32>().ok()?;
    let day = day.parse::<u32>().ok()?;
    // 2024 is a leap year, so 02-29 is accepted.
    NaiveDate::from_ymd_opt(2024, month, day).map(|_| (month, day))
}

fn parse_holiday_date(field: &str, raw: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ConfigError::Validation(format!("{field} entries must be YYYY-MM-DD dates, got `{raw}`"))
    })
}

fn parse_month_day(field: &str, raw: &str) -> Result<(u32, u32), ConfigError> {
    month_day(raw).ok_or_else(|| {
        ConfigError::Validation(format!("{field} entries must be MM-DD, got `{raw}`"))
    })
}

fn parse_env_value<T>(
    key: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    parse(value).ok_or_else(|| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    parse_env_value(key, value, |raw| raw.trim().parse::<u32>().ok())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    parse_env_value(key, value, |raw| raw.trim().parse::<u64>().ok())
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    parse_env_value(key, value, |raw| raw.trim().parse::<usize>().ok())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    holidays: Option<HolidayPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    code_prefix: Option<String>,
    code_width: Option<usize>,
    shift_days: Option<u32>,
    max_extension_days: Option<u32>,
    max_sla_days: Option<u32>,
    default_sla_days: Option<u32>,
    due_soon_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct HolidayPatch {
    dates: Option<Vec<String>>,
    recurring: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
