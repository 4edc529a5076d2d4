//! Schema setup for the milestones table.
//!
//! Each step in [`schema::MIGRATIONS`] runs at most once per database. The
//! step and its history row commit in the same transaction, so two workers
//! racing through `migrate` cannot both record a step.

use sqlx::PgPool;
use thiserror::Error;

use super::schema::{self, tables};

/// Errors raised while applying the schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A schema step was rejected by the server.
    #[error("Migration {name} failed: {source}")]
    StepFailed {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Applies pending schema steps on the primary.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies every step not yet recorded and returns how many ran.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        self.ensure_history_table().await?;

        let mut applied = 0;
        for (name, sql) in schema::MIGRATIONS {
            if self.apply_step(name, sql).await? {
                tracing::info!(migration = name, "Applied migration");
                applied += 1;
            } else {
                tracing::debug!(migration = name, "Migration already applied");
            }
        }

        Ok(applied)
    }

    async fn ensure_history_table(&self) -> Result<(), MigrationError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            tables::SCHEMA_HISTORY
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Runs one step unless its name is already recorded. Returns whether it ran.
    async fn apply_step(&self, name: &'static str, sql: &str) -> Result<bool, MigrationError> {
        let mut tx = self.pool.begin().await?;

        let record = format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
            tables::SCHEMA_HISTORY
        );
        let inserted = sqlx::query(&record)
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Multi-statement scripts need the simple query protocol.
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::StepFailed { name, source })?;

        tx.commit().await?;
        Ok(true)
    }
}
