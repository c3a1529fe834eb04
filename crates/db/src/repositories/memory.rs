use std::collections::BTreeMap;

use tokio::sync::RwLock;

use jobflow_core::domain::flow::{FlowTemplate, FlowTemplateId};
use jobflow_core::domain::job::{Job, JobCodeFormat, JobId, JobTypeId, ProjectId};
use jobflow_core::domain::shift::ShiftLogEntry;
use jobflow_core::domain::user::UserId;
use jobflow_core::sla::Holiday;

use super::{FlowTemplateRepository, HolidayRepository, JobRepository, RepositoryError};

#[derive(Default)]
struct JobStore {
    jobs: BTreeMap<JobId, Job>,
    shift_log: Vec<ShiftLogEntry>,
    last_id: i64,
}

impl JobStore {
    fn check_version(&self, id: JobId, expected_version: u32) -> Result<(), RepositoryError> {
        match self.jobs.get(&id) {
            Some(stored) if stored.version == expected_version => Ok(()),
            Some(_) => {
                Err(RepositoryError::VersionConflict { job_id: id, expected: expected_version })
            }
            None => Err(RepositoryError::NotFound { entity: "job", id: id.to_string() }),
        }
    }
}

/// Job store with the same versioning rules as the SQLite repository.
#[derive(Default)]
pub struct InMemoryJobRepository {
    store: RwLock<JobStore>,
    code_format: JobCodeFormat,
}

impl InMemoryJobRepository {
    pub fn with_code_format(code_format: JobCodeFormat) -> Self {
        Self { store: RwLock::default(), code_format }
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.jobs.get(&id).cloned())
    }

    async fn insert(&self, mut job: Job) -> Result<Job, RepositoryError> {
        let mut store = self.store.write().await;
        store.last_id += 1;
        job.id = JobId(store.last_id);
        job.code = self.code_format.format(job.id);
        job.version = 1;
        store.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, mut job: Job, expected_version: u32) -> Result<Job, RepositoryError> {
        let mut store = self.store.write().await;
        store.check_version(job.id, expected_version)?;
        job.version = expected_version + 1;
        store.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn list_children(&self, parent: JobId) -> Result<Vec<Job>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.jobs.values().filter(|job| job.parent_job_id == Some(parent)).cloned().collect())
    }

    async fn list_open_for_worker(
        &self,
        worker: UserId,
        excluding: JobId,
    ) -> Result<Vec<Job>, RepositoryError> {
        let store = self.store.read().await;
        let mut jobs: Vec<Job> = store
            .jobs
            .values()
            .filter(|job| {
                job.id != excluding
                    && !job.is_parent
                    && job.worker_id() == Some(worker)
                    && job.status.is_open_for_shift()
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.due_date, job.id));
        Ok(jobs)
    }

    async fn apply_shift(
        &self,
        mut job: Job,
        expected_version: u32,
        entry: ShiftLogEntry,
    ) -> Result<Job, RepositoryError> {
        let mut store = self.store.write().await;
        store.check_version(job.id, expected_version)?;
        job.version = expected_version + 1;
        store.jobs.insert(job.id, job.clone());
        store.shift_log.push(entry);
        Ok(job)
    }

    async fn shift_log_for_job(&self, job: JobId) -> Result<Vec<ShiftLogEntry>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.shift_log.iter().filter(|entry| entry.job_id == job).cloned().collect())
    }

    async fn shift_log_for_urgent_job(
        &self,
        urgent_job: JobId,
    ) -> Result<Vec<ShiftLogEntry>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .shift_log
            .iter()
            .filter(|entry| entry.urgent_job_id == urgent_job)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryHolidayRepository {
    holidays: RwLock<Vec<Holiday>>,
}

#[async_trait::async_trait]
impl HolidayRepository for InMemoryHolidayRepository {
    async fn list_holidays(&self) -> Result<Vec<Holiday>, RepositoryError> {
        let holidays = self.holidays.read().await;
        Ok(holidays.clone())
    }

    async fn save_holiday(&self, holiday: Holiday) -> Result<(), RepositoryError> {
        let mut holidays = self.holidays.write().await;
        let slot = holidays.iter_mut().find(|existing| {
            existing.date == holiday.date && existing.recurring == holiday.recurring
        });
        match slot {
            Some(existing) => existing.name = holiday.name,
            None => holidays.push(holiday),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFlowTemplateRepository {
    templates: RwLock<BTreeMap<FlowTemplateId, FlowTemplate>>,
}

#[async_trait::async_trait]
impl FlowTemplateRepository for InMemoryFlowTemplateRepository {
    async fn find_flow(
        &self,
        project: ProjectId,
        job_type: JobTypeId,
    ) -> Result<FlowTemplate, RepositoryError> {
        let templates = self.templates.read().await;
        let scoped = |job_type: Option<JobTypeId>| {
            templates
                .values()
                .rev()
                .find(|t| t.project_id == Some(project) && t.job_type_id == job_type)
                .cloned()
        };

        Ok(scoped(Some(job_type))
            .or_else(|| scoped(None))
            .unwrap_or_else(FlowTemplate::skip_approval))
    }

    async fn save(&self, mut template: FlowTemplate) -> Result<FlowTemplateId, RepositoryError> {
        let mut templates = self.templates.write().await;
        let id = match template.id {
            Some(id) => id,
            None => FlowTemplateId(templates.keys().next_back().map_or(1, |last| last.0 + 1)),
        };
        template.id = Some(id);
        templates.insert(id, template);
        Ok(id)
    }
}
