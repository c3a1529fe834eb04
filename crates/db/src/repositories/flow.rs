use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use jobflow_core::domain::flow::{FlowLevel, FlowTemplate, FlowTemplateId};
use jobflow_core::domain::job::{JobTypeId, ProjectId};
use jobflow_core::domain::user::UserId;

use super::{FlowTemplateRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowTemplateRepository {
    pool: DbPool,
}

impl SqlFlowTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FlowTemplateRepository for SqlFlowTemplateRepository {
    async fn find_flow(
        &self,
        project: ProjectId,
        job_type: JobTypeId,
    ) -> Result<FlowTemplate, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, project_id, job_type_id, default_assignee_id, levels_json
             FROM flow_template
             WHERE is_active = 1 AND project_id = ? AND (job_type_id = ? OR job_type_id IS NULL)
             ORDER BY job_type_id IS NULL, id DESC
             LIMIT 1",
        )
        .bind(project.0)
        .bind(job_type.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(
                event_name = "workflow.flow.fallback",
                project_id = project.0,
                job_type_id = job_type.0,
                "no active flow template; approval is skipped"
            );
            return Ok(FlowTemplate::skip_approval());
        };

        let levels_json: String = row.try_get("levels_json")?;
        let levels: Vec<FlowLevel> = serde_json::from_str(&levels_json)
            .map_err(|e| RepositoryError::Decode(format!("levels_json: {e}")))?;

        Ok(FlowTemplate {
            id: Some(FlowTemplateId(row.try_get("id")?)),
            name: row.try_get("name")?,
            project_id: row.try_get::<Option<i64>, _>("project_id")?.map(ProjectId),
            job_type_id: row.try_get::<Option<i64>, _>("job_type_id")?.map(JobTypeId),
            levels,
            default_assignee_id: row.try_get::<Option<i64>, _>("default_assignee_id")?.map(UserId),
        })
    }

    async fn save(&self, template: FlowTemplate) -> Result<FlowTemplateId, RepositoryError> {
        let levels_json = serde_json::to_string(&template.levels)
            .map_err(|e| RepositoryError::Encode(format!("levels: {e}")))?;

        if let Some(id) = template.id {
            let result = sqlx::query(
                "UPDATE flow_template
                 SET name = ?, project_id = ?, job_type_id = ?, default_assignee_id = ?,
                     levels_json = ?
                 WHERE id = ?",
            )
            .bind(&template.name)
            .bind(template.project_id.map(|id| id.0))
            .bind(template.job_type_id.map(|id| id.0))
            .bind(template.default_assignee_id.map(|id| id.0))
            .bind(&levels_json)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "flow_template",
                    id: id.0.to_string(),
                });
            }
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO flow_template (name, project_id, job_type_id, default_assignee_id,
                                        levels_json, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&template.name)
        .bind(template.project_id.map(|id| id.0))
        .bind(template.job_type_id.map(|id| id.0))
        .bind(template.default_assignee_id.map(|id| id.0))
        .bind(&levels_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(FlowTemplateId(result.last_insert_rowid()))
    }
}
