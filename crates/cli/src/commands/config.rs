use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use jobflow_core::config::{AppConfig, LoadOptions, LogFormat};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

type ConfigEntry = (&'static str, String, &'static [&'static str]);

fn entry(key_path: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigEntry {
    (key_path, value, env_keys)
}

fn effective_values(config: &AppConfig) -> Vec<ConfigEntry> {
    vec![
        entry("database.url", config.database.url.clone(), &["JOBFLOW_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["JOBFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["JOBFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "workflow.code_prefix",
            config.workflow.code_prefix.clone(),
            &["JOBFLOW_WORKFLOW_CODE_PREFIX"],
        ),
        entry(
            "workflow.code_width",
            config.workflow.code_width.to_string(),
            &["JOBFLOW_WORKFLOW_CODE_WIDTH"],
        ),
        entry(
            "workflow.shift_days",
            config.workflow.shift_days.to_string(),
            &["JOBFLOW_WORKFLOW_SHIFT_DAYS"],
        ),
        entry(
            "workflow.max_extension_days",
            config.workflow.max_extension_days.to_string(),
            &["JOBFLOW_WORKFLOW_MAX_EXTENSION_DAYS"],
        ),
        entry(
            "workflow.max_sla_days",
            config.workflow.max_sla_days.to_string(),
            &["JOBFLOW_WORKFLOW_MAX_SLA_DAYS"],
        ),
        entry(
            "workflow.default_sla_days",
            config.workflow.default_sla_days.to_string(),
            &["JOBFLOW_WORKFLOW_DEFAULT_SLA_DAYS"],
        ),
        entry(
            "workflow.due_soon_days",
            config.workflow.due_soon_days.to_string(),
            &["JOBFLOW_WORKFLOW_DUE_SOON_DAYS"],
        ),
        entry(
            "holidays.dates",
            render_list(config.holidays.dates.iter().map(|date| date.to_string())),
            &["JOBFLOW_HOLIDAYS_DATES"],
        ),
        entry(
            "holidays.recurring",
            render_list(
                config.holidays.recurring.iter().map(|(month, day)| format!("{month:02}-{day:02}")),
            ),
            &["JOBFLOW_HOLIDAYS_RECURRING"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["JOBFLOW_LOGGING_LEVEL", "JOBFLOW_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            log_format_name(config.logging.format).to_string(),
            &["JOBFLOW_LOGGING_FORMAT", "JOBFLOW_LOG_FORMAT"],
        ),
    ]
}

fn log_format_name(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    }
}

fn render_list(items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.collect();
    if items.is_empty() {
        return "<none>".to_string();
    }
    format!("[{}]", items.join(", "))
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("jobflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/jobflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
