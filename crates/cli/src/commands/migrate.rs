use jobflow_core::config::{AppConfig, LoadOptions};
use jobflow_db::{connect_with_settings, migrations, DbPool};
use serde_json::json;
use sqlx::Row;
use tracing::info;

use crate::commands::{exit_code, CommandResult};

struct MigrateFailure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl MigrateFailure {
    fn new(error_class: &'static str, message: impl ToString, exit_code: u8) -> Self {
        Self { error_class, message: message.to_string(), exit_code }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("migrate", &error),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                exit_code::RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| MigrateFailure::new("db_connectivity", error, exit_code::DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| MigrateFailure::new("migration", error, exit_code::MIGRATION))?;
        let applied = applied_versions(&pool)
            .await
            .map_err(|error| MigrateFailure::new("migration", error, exit_code::MIGRATION))?;
        pool.close().await;
        Ok::<Vec<i64>, MigrateFailure>(applied)
    });

    match result {
        Ok(applied) => {
            info!(
                event_name = "system.migrations.applied",
                applied = applied.len(),
                "database migrations applied"
            );
            let known = migrations::MIGRATOR.iter().count();
            CommandResult::success_with(
                "migrate",
                format!("applied pending migrations ({}/{known} recorded)", applied.len()),
                json!({ "applied_versions": applied }),
            )
        }
        Err(failure) => CommandResult::failure(
            "migrate",
            failure.error_class,
            failure.message,
            failure.exit_code,
        ),
    }
}

async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows =
        sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
            .fetch_all(pool)
            .await?;
    rows.iter().map(|row| row.try_get::<i64, _>("version")).collect()
}
