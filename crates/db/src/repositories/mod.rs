use async_trait::async_trait;
use thiserror::Error;

use jobflow_core::domain::flow::{FlowTemplate, FlowTemplateId};
use jobflow_core::domain::job::{Job, JobId, JobTypeId, ProjectId};
use jobflow_core::domain::shift::ShiftLogEntry;
use jobflow_core::domain::user::UserId;
use jobflow_core::sla::Holiday;

pub mod flow;
pub mod holiday;
pub mod job;
pub mod memory;

pub use flow::SqlFlowTemplateRepository;
pub use holiday::SqlHolidayRepository;
pub use job::SqlJobRepository;
pub use memory::{
    InMemoryFlowTemplateRepository, InMemoryHolidayRepository, InMemoryJobRepository,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("{job_id} was modified concurrently (expected version {expected})")]
    VersionConflict { job_id: JobId, expected: u32 },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;

    /// Stores a new job, allocating its id and code. The returned job is at
    /// version 1.
    async fn insert(&self, job: Job) -> Result<Job, RepositoryError>;

    /// Saves `job` only if the stored copy is still at `expected_version`.
    /// The returned job carries the bumped version.
    async fn update(&self, job: Job, expected_version: u32) -> Result<Job, RepositoryError>;

    async fn list_children(&self, parent: JobId) -> Result<Vec<Job>, RepositoryError>;

    /// Non-parent jobs occupying `worker` whose status is open for shifting.
    async fn list_open_for_worker(
        &self,
        worker: UserId,
        excluding: JobId,
    ) -> Result<Vec<Job>, RepositoryError>;

    /// Version-checked job update and shift log append, committed together.
    async fn apply_shift(
        &self,
        job: Job,
        expected_version: u32,
        entry: ShiftLogEntry,
    ) -> Result<Job, RepositoryError>;

    async fn shift_log_for_job(&self, job: JobId) -> Result<Vec<ShiftLogEntry>, RepositoryError>;

    async fn shift_log_for_urgent_job(
        &self,
        urgent_job: JobId,
    ) -> Result<Vec<ShiftLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait HolidayRepository: Send + Sync {
    async fn list_holidays(&self) -> Result<Vec<Holiday>, RepositoryError>;
    async fn save_holiday(&self, holiday: Holiday) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FlowTemplateRepository: Send + Sync {
    /// Most specific active template for the pair: project and job type,
    /// then project-wide, then the zero-level template.
    async fn find_flow(
        &self,
        project: ProjectId,
        job_type: JobTypeId,
    ) -> Result<FlowTemplate, RepositoryError>;

    async fn save(&self, template: FlowTemplate) -> Result<FlowTemplateId, RepositoryError>;
}
