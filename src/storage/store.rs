//! The storage seam used by the pipeline core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::milestone::{Claimant, Milestone, RowValues};
use crate::pipeline::{EligibilityQuery, Stage};

use super::database::StoreError;

/// Durable milestone state shared by every worker process.
///
/// Implementations must make [`claim`](MilestoneStore::claim) atomic: of any
/// number of concurrent claims for the same stage of the same milestone, at
/// most one returns `true`. Losers get `Ok(false)`, never an error, and never
/// wait on the winner.
#[async_trait]
pub trait MilestoneStore: Send + Sync {
    /// Inserts a freshly created milestone.
    async fn insert(&self, milestone: &Milestone) -> Result<(), StoreError>;

    /// Reads one milestone. May be served from a replica and lag behind.
    async fn fetch(&self, milestone_id: &str) -> Result<Option<Milestone>, StoreError>;

    /// Returns the rows currently matching `query`'s predicate, undecoded.
    /// May be served from a replica and lag behind.
    async fn eligible_rows(&self, query: &EligibilityQuery) -> Result<Vec<RowValues>, StoreError>;

    /// Moves the stage to in-progress if the milestone still satisfies
    /// `query`'s predicate and no concurrent claimant holds the row.
    async fn claim(
        &self,
        query: &EligibilityQuery,
        milestone_id: &str,
        claimant: &Claimant,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Marks the stage completed, clears the error and resets retries.
    async fn record_success(
        &self,
        stage: Stage,
        milestone_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Marks the stage failed, stores the error and increments retries.
    ///
    /// Returns the row as written by this update. `retries` is shared by
    /// every stage of the milestone, so only this value tells whether the
    /// ceiling has been reached.
    async fn record_failure(
        &self,
        stage: Stage,
        milestone_id: &str,
        error: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Milestone, StoreError>;

    /// Operator action: marks the stage overridden by `operator`.
    async fn override_stage(
        &self,
        stage: Stage,
        milestone_id: &str,
        operator: &str,
    ) -> Result<(), StoreError>;

    /// Operator action: returns a failed stage to pending with retries reset.
    async fn requeue_stage(&self, stage: Stage, milestone_id: &str) -> Result<(), StoreError>;
}
