use chrono::NaiveDate;
use sqlx::Row;

use jobflow_core::sla::Holiday;

use super::{HolidayRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHolidayRepository {
    pool: DbPool,
}

impl SqlHolidayRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HolidayRepository for SqlHolidayRepository {
    async fn list_holidays(&self) -> Result<Vec<Holiday>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT holiday_date, name, recurring FROM holiday ORDER BY holiday_date ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Holiday, RepositoryError> {
                let raw: String = row.try_get("holiday_date")?;
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|e| RepositoryError::Decode(format!("holiday_date `{raw}`: {e}")))?;
                Ok(Holiday {
                    date,
                    name: row.try_get("name")?,
                    recurring: row.try_get("recurring")?,
                })
            })
            .collect()
    }

    /// Saving the same date and recurrence twice renames the existing entry.
    async fn save_holiday(&self, holiday: Holiday) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO holiday (holiday_date, name, recurring) VALUES (?, ?, ?)
             ON CONFLICT(holiday_date, recurring) DO UPDATE SET name = excluded.name",
        )
        .bind(holiday.date.format("%Y-%m-%d").to_string())
        .bind(&holiday.name)
        .bind(holiday.recurring)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
