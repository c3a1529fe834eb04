pub mod config;
pub mod doctor;
pub mod due_date;
pub mod migrate;
pub mod smoke;

use jobflow_core::config::ConfigError;
use serde::Serialize;
use serde_json::{json, Value};

/// Process exit codes shared by the subcommands.
pub mod exit_code {
    pub const OK: u8 = 0;
    /// A readiness check reported a failure.
    pub const CHECK_FAILED: u8 = 1;
    /// Bad configuration or bad arguments.
    pub const INVALID_INPUT: u8 = 2;
    pub const RUNTIME: u8 = 3;
    pub const DATABASE: u8 = 4;
    pub const MIGRATION: u8 = 5;
    pub const SMOKE_FAILED: u8 = 6;
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// The one-line JSON payload every non-report command prints.
#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'a str,
    error_class: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: exit_code::OK, output: output.into() }
    }

    pub fn success_with(command: &str, message: impl Into<String>, details: Value) -> Self {
        let payload = CommandOutcome {
            command,
            status: "ok",
            error_class: None,
            message: message.into(),
            details: Some(details),
        };
        Self { exit_code: exit_code::OK, output: to_json(command, &payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: to_json(command, &payload) }
    }

    pub fn config_failure(command: &str, error: &ConfigError) -> Self {
        Self::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            exit_code::INVALID_INPUT,
        )
    }

    /// A summary line for people followed by the full report as JSON.
    pub fn report<T: Serialize>(command: &str, exit_code: u8, summary: &str, report: &T) -> Self {
        Self { exit_code, output: format!("{summary}\n{}", to_json(command, report)) }
    }
}

fn to_json<T: Serialize + ?Sized>(command: &str, value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|error| {
        json!({
            "command": command,
            "status": "error",
            "error_class": "serialization",
            "message": error.to_string(),
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use jobflow_core::config::ConfigError;
    use serde_json::{json, Value};

    use super::{exit_code, CommandResult};

    fn payload(result: &CommandResult) -> Value {
        serde_json::from_str(&result.output).expect("payload json")
    }

    #[test]
    fn success_carries_details_and_failure_omits_them() {
        let ok = CommandResult::success_with("due-date", "due 2024-06-13", json!({ "days": 2 }));
        assert_eq!(ok.exit_code, exit_code::OK);
        assert_eq!(payload(&ok)["details"]["days"], 2);
        assert!(payload(&ok)["error_class"].is_null());

        let failed = CommandResult::failure("migrate", "migration", "boom", exit_code::MIGRATION);
        assert_eq!(failed.exit_code, 5);
        assert_eq!(payload(&failed)["status"], "error");
        assert!(payload(&failed).get("details").is_none());
    }

    #[test]
    fn config_failures_share_one_class_and_exit_code() {
        let error = ConfigError::Validation("workflow.shift_days must be in range 1..=10".into());
        let result = CommandResult::config_failure("migrate", &error);
        assert_eq!(result.exit_code, exit_code::INVALID_INPUT);
        let payload = payload(&result);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("shift_days"));
    }
}
