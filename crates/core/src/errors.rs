use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::job::JobId;
use crate::domain::shift::ShiftFailure;
use crate::domain::status::JobStatus;
use crate::domain::user::UserId;
use crate::flows::Operation;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {operation} {job_id} while it is `{status}`: {reason}")]
    InvalidTransition { job_id: JobId, operation: Operation, status: JobStatus, reason: String },
    #[error("{actor} is not allowed to {operation}: {reason}")]
    Unauthorized { actor: UserId, operation: Operation, reason: String },
    #[error("invalid `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{} of {attempted} jobs could not be updated", failures.len())]
    PartialFailure { attempted: usize, failures: Vec<ShiftFailure> },
}

impl WorkflowError {
    pub fn invalid(
        job_id: JobId,
        operation: Operation,
        status: JobStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition { job_id, operation, status, reason: reason.into() }
    }

    pub fn unauthorized(actor: UserId, operation: Operation, reason: impl Into<String>) -> Self {
        Self::Unauthorized { actor, operation, reason: reason.into() }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::PartialFailure { .. } => "partial_failure",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("concurrent update conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action on this job.",
            Self::NotFound { .. } => "The requested job or configuration does not exist.",
            Self::Conflict { .. } => {
                "The job was changed by someone else. Reload it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(error) => {
                let message = error.to_string();
                match error {
                    WorkflowError::Unauthorized { .. } => {
                        Self::Forbidden { message, correlation_id }
                    }
                    WorkflowError::NotFound { .. } => Self::NotFound { message, correlation_id },
                    WorkflowError::InvalidTransition { .. }
                    | WorkflowError::Validation { .. }
                    | WorkflowError::PartialFailure { .. } => {
                        Self::BadRequest { message, correlation_id }
                    }
                }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::job::JobId;
    use crate::domain::status::JobStatus;
    use crate::domain::user::UserId;
    use crate::config::ConfigError;
    use crate::errors::{ApplicationError, InterfaceError, WorkflowError};
    use crate::flows::Operation;

    #[test]
    fn invalid_transition_message_names_operation_and_state() {
        let error = WorkflowError::invalid(
            JobId(42),
            Operation::Approve,
            JobStatus::Closed,
            "job is already terminal",
        );

        assert_eq!(
            error.to_string(),
            "cannot approve job:42 while it is `closed`: job is already terminal"
        );
        assert_eq!(error.error_class(), "invalid_transition");
    }

    #[test]
    fn unauthorized_maps_to_forbidden_interface_error() {
        let interface = ApplicationError::from(WorkflowError::unauthorized(
            UserId(9),
            Operation::Approve,
            "not listed on level 1",
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Forbidden { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn validation_maps_to_bad_request_with_user_safe_message() {
        let interface = ApplicationError::from(WorkflowError::validation(
            "days",
            "must be between 1 and 30",
        ))
        .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn conflict_and_configuration_errors_map_to_their_classes() {
        let conflict = ApplicationError::Conflict("job:1 version 3".to_owned()).into_interface("r");
        assert!(matches!(conflict, InterfaceError::Conflict { .. }));

        let config = ApplicationError::from(ConfigError::Validation(
            "holidays.recurring entry `13-01` is not a valid month-day".to_owned(),
        ));
        assert!(matches!(config, ApplicationError::Configuration(ref message)
            if message.contains("holidays.recurring")));
        let internal = config.into_interface("r");
        assert_eq!(internal.user_message(), "An unexpected internal error occurred.");
    }
}
