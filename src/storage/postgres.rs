//! PostgreSQL implementation of [`MilestoneStore`].
//!
//! Claims run as a single `UPDATE ... WHERE milestone_id = (SELECT ... FOR
//! UPDATE SKIP LOCKED)`: the inner select re-checks the eligibility
//! predicate while holding the row lock and skips rows another claimant
//! already holds, so a lost race shows up as zero returned rows.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::milestone::{Claimant, FromRowValues, Milestone, RowValues, StageStatus};
use crate::pipeline::{EligibilityQuery, Stage};

use super::database::{PgClient, StoreError};
use super::rows::row_values;
use super::schema::{tables, MILESTONE_COLUMNS};
use super::store::MilestoneStore;

/// Milestone store backed by a primary and its read replicas.
#[derive(Clone)]
pub struct PgMilestoneStore {
    client: Arc<PgClient>,
}

impl PgMilestoneStore {
    pub fn new(client: Arc<PgClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<PgClient> {
        &self.client
    }
}

fn process_id_param(claimant: &Claimant) -> i64 {
    i64::from(claimant.process_id)
}

#[async_trait]
impl MilestoneStore for PgMilestoneStore {
    async fn insert(&self, milestone: &Milestone) -> Result<(), StoreError> {
        let placeholders = (1..=MILESTONE_COLUMNS.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            tables::MILESTONES,
            MILESTONE_COLUMNS.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(&milestone.id);
        for stage in Stage::ALL {
            query = query.bind(milestone.status(stage).as_str());
        }
        query
            .bind(&milestone.overridden_by)
            .bind(&milestone.claimant.host)
            .bind(process_id_param(&milestone.claimant))
            .bind(i32::try_from(milestone.retries).unwrap_or(i32::MAX))
            .bind(milestone.start_time)
            .bind(milestone.end_time)
            .bind(&milestone.error_message)
            .execute(self.client.primary())
            .await?;

        Ok(())
    }

    async fn fetch(&self, milestone_id: &str) -> Result<Option<Milestone>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE milestone_id = $1",
            MILESTONE_COLUMNS.join(", "),
            tables::MILESTONES
        );

        let row = sqlx::query(&sql)
            .bind(milestone_id)
            .fetch_optional(self.client.replica())
            .await?;

        match row {
            Some(row) => Ok(Some(Milestone::from_row_values(&row_values(&row))?)),
            None => Ok(None),
        }
    }

    async fn eligible_rows(&self, query: &EligibilityQuery) -> Result<Vec<RowValues>, StoreError> {
        let rows = sqlx::query(query.select_sql())
            .bind(StageStatus::Failed.as_str())
            .bind(query.max_retries_param())
            .bind(StageStatus::Pending.as_str())
            .bind(StageStatus::Completed.as_str())
            .fetch_all(self.client.replica())
            .await?;

        Ok(rows.iter().map(row_values).collect())
    }

    async fn claim(
        &self,
        query: &EligibilityQuery,
        milestone_id: &str,
        claimant: &Claimant,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let claimed: Option<(String,)> = sqlx::query_as(query.claim_sql())
            .bind(StageStatus::Failed.as_str())
            .bind(query.max_retries_param())
            .bind(StageStatus::Pending.as_str())
            .bind(StageStatus::Completed.as_str())
            .bind(StageStatus::InProgress.as_str())
            .bind(&claimant.host)
            .bind(process_id_param(claimant))
            .bind(started_at)
            .bind(milestone_id)
            .fetch_optional(self.client.primary())
            .await?;

        Ok(claimed.is_some())
    }

    async fn record_success(
        &self,
        stage: Stage,
        milestone_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET {} = $1, error_message = '', end_time = $2, retries = 0 \
             WHERE milestone_id = $3",
            tables::MILESTONES,
            stage.status_column()
        );

        let result = sqlx::query(&sql)
            .bind(StageStatus::Completed.as_str())
            .bind(ended_at)
            .bind(milestone_id)
            .execute(self.client.primary())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Milestone {}", milestone_id)));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        stage: Stage,
        milestone_id: &str,
        error: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Milestone, StoreError> {
        let sql = format!(
            "UPDATE {} SET {} = $1, error_message = $2, end_time = $3, retries = retries + 1 \
             WHERE milestone_id = $4 RETURNING {}",
            tables::MILESTONES,
            stage.status_column(),
            MILESTONE_COLUMNS.join(", ")
        );

        let row = sqlx::query(&sql)
            .bind(StageStatus::Failed.as_str())
            .bind(error)
            .bind(ended_at)
            .bind(milestone_id)
            .fetch_optional(self.client.primary())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Milestone {}", milestone_id)))?;

        Ok(Milestone::from_row_values(&row_values(&row))?)
    }

    async fn override_stage(
        &self,
        stage: Stage,
        milestone_id: &str,
        operator: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET {} = $1, overridden_by = $2 WHERE milestone_id = $3",
            tables::MILESTONES,
            stage.status_column()
        );

        let result = sqlx::query(&sql)
            .bind(StageStatus::Overridden.as_str())
            .bind(operator)
            .bind(milestone_id)
            .execute(self.client.primary())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Milestone {}", milestone_id)));
        }
        Ok(())
    }

    async fn requeue_stage(&self, stage: Stage, milestone_id: &str) -> Result<(), StoreError> {
        let column = stage.status_column();
        let sql = format!(
            "UPDATE {} SET {column} = $1, retries = 0, error_message = '' \
             WHERE milestone_id = $2 AND {column} = $3",
            tables::MILESTONES,
        );

        let result = sqlx::query(&sql)
            .bind(StageStatus::Pending.as_str())
            .bind(milestone_id)
            .bind(StageStatus::Failed.as_str())
            .execute(self.client.primary())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "Milestone {} has no failed {} stage",
                milestone_id, stage
            )));
        }
        Ok(())
    }
}
