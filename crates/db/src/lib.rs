pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod service;

#[cfg(test)]
mod test_support;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    FlowTemplateRepository, HolidayRepository, InMemoryFlowTemplateRepository,
    InMemoryHolidayRepository, InMemoryJobRepository, JobRepository, RepositoryError,
    SqlFlowTemplateRepository, SqlHolidayRepository, SqlJobRepository,
};
pub use service::{CreatedJob, RequestContext, ServiceError, WorkflowService};
