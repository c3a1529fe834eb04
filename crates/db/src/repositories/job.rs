use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};

use jobflow_core::domain::flow::FlowSnapshot;
use jobflow_core::domain::job::{
    ActivityEntry, ApprovalRecord, Job, JobCode, JobCodeFormat, JobId, JobTypeId, Priority,
    ProjectId,
};
use jobflow_core::domain::shift::ShiftLogEntry;
use jobflow_core::domain::status::JobStatus;
use jobflow_core::domain::user::{DepartmentId, UserId};

use super::{JobRepository, RepositoryError};
use crate::DbPool;

macro_rules! job_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, title, project_id, job_type_id, department_id, priority, status,
                    current_level, approval_round, requester_id, assignee_id, due_date,
                    original_due_date, shifted_by_job_id, extension_count, is_parent,
                    parent_job_id, flow_snapshot_json, approvals_json, activity_json,
                    resume_status, final_link, completion_note, version, created_at, updated_at
             FROM job ",
            $tail
        )
    };
}

pub struct SqlJobRepository {
    pool: DbPool,
    code_format: JobCodeFormat,
}

impl SqlJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_code_format(pool, JobCodeFormat::default())
    }

    pub fn with_code_format(pool: DbPool, code_format: JobCodeFormat) -> Self {
        Self { pool, code_format }
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}`: {e}")))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}`: {e}")))
}

fn parse_status(field: &str, raw: &str) -> Result<JobStatus, RepositoryError> {
    JobStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("{field}: unknown status `{raw}`")))
}

fn parse_json<T>(field: &str, raw: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{field}: {e}")))
}

fn to_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Encode(format!("{field}: {e}")))
}

fn row_to_job(row: &SqliteRow) -> Result<Job, RepositoryError> {
    let code: Option<String> = column(row, "code")?;
    let priority_str: String = column(row, "priority")?;
    let status_str: String = column(row, "status")?;
    let due_date_str: String = column(row, "due_date")?;
    let original_due_date_str: Option<String> = column(row, "original_due_date")?;
    let snapshot_json: String = column(row, "flow_snapshot_json")?;
    let approvals_json: String = column(row, "approvals_json")?;
    let activity_json: String = column(row, "activity_json")?;
    let resume_status_str: Option<String> = column(row, "resume_status")?;
    let created_at_str: String = column(row, "created_at")?;
    let updated_at_str: String = column(row, "updated_at")?;

    let priority = Priority::parse(&priority_str)
        .ok_or_else(|| RepositoryError::Decode(format!("priority: unknown `{priority_str}`")))?;
    let flow_snapshot: FlowSnapshot = parse_json("flow_snapshot_json", &snapshot_json)?;
    let approvals: Vec<ApprovalRecord> = parse_json("approvals_json", &approvals_json)?;
    let activity: Vec<ActivityEntry> = parse_json("activity_json", &activity_json)?;

    Ok(Job {
        id: JobId(column(row, "id")?),
        code: JobCode(code.unwrap_or_default()),
        title: column(row, "title")?,
        project_id: ProjectId(column(row, "project_id")?),
        job_type_id: JobTypeId(column(row, "job_type_id")?),
        department_id: column::<Option<i64>>(row, "department_id")?.map(DepartmentId),
        priority,
        status: parse_status("status", &status_str)?,
        current_level: column(row, "current_level")?,
        approval_round: column(row, "approval_round")?,
        requester_id: UserId(column(row, "requester_id")?),
        assignee_id: column::<Option<i64>>(row, "assignee_id")?.map(UserId),
        due_date: parse_date("due_date", &due_date_str)?,
        original_due_date: original_due_date_str
            .as_deref()
            .map(|raw| parse_date("original_due_date", raw))
            .transpose()?,
        shifted_by_job_id: column::<Option<i64>>(row, "shifted_by_job_id")?.map(JobId),
        extension_count: column(row, "extension_count")?,
        is_parent: column(row, "is_parent")?,
        parent_job_id: column::<Option<i64>>(row, "parent_job_id")?.map(JobId),
        flow_snapshot,
        approvals,
        activity,
        resume_status: resume_status_str
            .as_deref()
            .map(|raw| parse_status("resume_status", raw))
            .transpose()?,
        final_link: column(row, "final_link")?,
        completion_note: column(row, "completion_note")?,
        version: column(row, "version")?,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

fn row_to_shift_entry(row: &SqliteRow) -> Result<ShiftLogEntry, RepositoryError> {
    let original_due_date_str: String = column(row, "original_due_date")?;
    let new_due_date_str: String = column(row, "new_due_date")?;
    let created_at_str: String = column(row, "created_at")?;

    Ok(ShiftLogEntry {
        job_id: JobId(column(row, "job_id")?),
        urgent_job_id: JobId(column(row, "urgent_job_id")?),
        original_due_date: parse_date("original_due_date", &original_due_date_str)?,
        new_due_date: parse_date("new_due_date", &new_due_date_str)?,
        shift_days: column(row, "shift_days")?,
        created_at: parse_timestamp("created_at", &created_at_str)?,
    })
}

/// Column values that need encoding before binding.
struct EncodedJob {
    status: String,
    due_date: String,
    original_due_date: Option<String>,
    flow_snapshot: String,
    approvals: String,
    activity: String,
    resume_status: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EncodedJob {
    fn new(job: &Job) -> Result<Self, RepositoryError> {
        Ok(Self {
            status: job.status.as_storage(),
            due_date: job.due_date.format("%Y-%m-%d").to_string(),
            original_due_date: job
                .original_due_date
                .map(|date| date.format("%Y-%m-%d").to_string()),
            flow_snapshot: to_json("flow_snapshot", &job.flow_snapshot)?,
            approvals: to_json("approvals", &job.approvals)?,
            activity: to_json("activity", &job.activity)?,
            resume_status: job.resume_status.map(|status| status.as_storage()),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        })
    }
}

async fn write_job(
    conn: &mut SqliteConnection,
    job: &Job,
    expected_version: u32,
) -> Result<(), RepositoryError> {
    let encoded = EncodedJob::new(job)?;

    let result = sqlx::query(
        "UPDATE job SET
             title = ?, department_id = ?, priority = ?, status = ?, current_level = ?,
             approval_round = ?, assignee_id = ?, worker_id = ?, due_date = ?,
             original_due_date = ?, shifted_by_job_id = ?, extension_count = ?,
             flow_snapshot_json = ?, approvals_json = ?, activity_json = ?, resume_status = ?,
             final_link = ?, completion_note = ?, version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&job.title)
    .bind(job.department_id.map(|id| id.0))
    .bind(job.priority.as_str())
    .bind(&encoded.status)
    .bind(job.current_level)
    .bind(job.approval_round)
    .bind(job.assignee_id.map(|id| id.0))
    .bind(job.worker_id().map(|id| id.0))
    .bind(&encoded.due_date)
    .bind(&encoded.original_due_date)
    .bind(job.shifted_by_job_id.map(|id| id.0))
    .bind(job.extension_count)
    .bind(&encoded.flow_snapshot)
    .bind(&encoded.approvals)
    .bind(&encoded.activity)
    .bind(&encoded.resume_status)
    .bind(&job.final_link)
    .bind(&job.completion_note)
    .bind(&encoded.updated_at)
    .bind(job.id.0)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists = sqlx::query("SELECT 1 FROM job WHERE id = ?")
        .bind(job.id.0)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    if exists {
        Err(RepositoryError::VersionConflict { job_id: job.id, expected: expected_version })
    } else {
        Err(RepositoryError::NotFound { entity: "job", id: job.id.to_string() })
    }
}

#[async_trait::async_trait]
impl JobRepository for SqlJobRepository {
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(job_select!("WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_job(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, mut job: Job) -> Result<Job, RepositoryError> {
        let encoded = EncodedJob::new(&job)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO job (title, project_id, job_type_id, department_id, priority, status,
                              current_level, approval_round, requester_id, assignee_id,
                              worker_id, due_date, original_due_date, shifted_by_job_id,
                              extension_count, is_parent, parent_job_id, flow_snapshot_json,
                              approvals_json, activity_json, resume_status, final_link,
                              completion_note, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&job.title)
        .bind(job.project_id.0)
        .bind(job.job_type_id.0)
        .bind(job.department_id.map(|id| id.0))
        .bind(job.priority.as_str())
        .bind(&encoded.status)
        .bind(job.current_level)
        .bind(job.approval_round)
        .bind(job.requester_id.0)
        .bind(job.assignee_id.map(|id| id.0))
        .bind(job.worker_id().map(|id| id.0))
        .bind(&encoded.due_date)
        .bind(&encoded.original_due_date)
        .bind(job.shifted_by_job_id.map(|id| id.0))
        .bind(job.extension_count)
        .bind(job.is_parent)
        .bind(job.parent_job_id.map(|id| id.0))
        .bind(&encoded.flow_snapshot)
        .bind(&encoded.approvals)
        .bind(&encoded.activity)
        .bind(&encoded.resume_status)
        .bind(&job.final_link)
        .bind(&job.completion_note)
        .bind(&encoded.created_at)
        .bind(&encoded.updated_at)
        .execute(&mut *tx)
        .await?;

        let id = JobId(result.last_insert_rowid());
        let code = self.code_format.format(id);
        sqlx::query("UPDATE job SET code = ? WHERE id = ?")
            .bind(&code.0)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        job.id = id;
        job.code = code;
        job.version = 1;
        Ok(job)
    }

    async fn update(&self, mut job: Job, expected_version: u32) -> Result<Job, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        write_job(&mut conn, &job, expected_version).await?;
        job.version = expected_version + 1;
        Ok(job)
    }

    async fn list_children(&self, parent: JobId) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(job_select!("WHERE parent_job_id = ? ORDER BY id ASC"))
            .bind(parent.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_job).collect::<Result<Vec<_>, _>>()
    }

    async fn list_open_for_worker(
        &self,
        worker: UserId,
        excluding: JobId,
    ) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(job_select!(
            "WHERE worker_id = ? AND id != ? AND is_parent = 0 ORDER BY due_date ASC, id ASC"
        ))
        .bind(worker.0)
        .bind(excluding.0)
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>, _>>()?;
        Ok(jobs.into_iter().filter(|job| job.status.is_open_for_shift()).collect())
    }

    async fn apply_shift(
        &self,
        mut job: Job,
        expected_version: u32,
        entry: ShiftLogEntry,
    ) -> Result<Job, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        write_job(&mut tx, &job, expected_version).await?;

        sqlx::query(
            "INSERT INTO job_shift_log (job_id, urgent_job_id, original_due_date, new_due_date,
                                        shift_days, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.job_id.0)
        .bind(entry.urgent_job_id.0)
        .bind(entry.original_due_date.format("%Y-%m-%d").to_string())
        .bind(entry.new_due_date.format("%Y-%m-%d").to_string())
        .bind(entry.shift_days)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        job.version = expected_version + 1;
        Ok(job)
    }

    async fn shift_log_for_job(&self, job: JobId) -> Result<Vec<ShiftLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT job_id, urgent_job_id, original_due_date, new_due_date, shift_days, created_at
             FROM job_shift_log WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_shift_entry).collect::<Result<Vec<_>, _>>()
    }

    async fn shift_log_for_urgent_job(
        &self,
        urgent_job: JobId,
    ) -> Result<Vec<ShiftLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT job_id, urgent_job_id, original_due_date, new_due_date, shift_days, created_at
             FROM job_shift_log WHERE urgent_job_id = ? ORDER BY id ASC",
        )
        .bind(urgent_job.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_shift_entry).collect::<Result<Vec<_>, _>>()
    }
}
