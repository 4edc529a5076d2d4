//! In-process implementation of [`MilestoneStore`].
//!
//! Every operation takes one mutex, so a claim evaluates the eligibility
//! predicate and flips the status in a single critical section. This gives
//! the same at-most-one-winner behavior as the row-locked claim in
//! PostgreSQL.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::milestone::{Claimant, Milestone, RowValues, StageStatus};
use crate::pipeline::{EligibilityQuery, Stage};

use super::database::StoreError;
use super::store::MilestoneStore;

/// Milestone store kept in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    milestones: Mutex<HashMap<String, Milestone>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a milestone without any checks.
    pub fn put(&self, milestone: Milestone) {
        self.lock().insert(milestone.id.clone(), milestone);
    }

    /// Returns a copy of one milestone.
    pub fn get(&self, milestone_id: &str) -> Option<Milestone> {
        self.lock().get(milestone_id).cloned()
    }

    /// Returns a copy of every milestone, ordered by id.
    pub fn snapshot(&self) -> Vec<Milestone> {
        let mut all: Vec<Milestone> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Milestone>> {
        // Mutations never panic midway, so a poisoned map is still consistent.
        self.milestones
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` to one milestone and returns the updated copy.
    fn update<F>(&self, milestone_id: &str, f: F) -> Result<Milestone, StoreError>
    where
        F: FnOnce(&mut Milestone),
    {
        let mut milestones = self.lock();
        let milestone = milestones
            .get_mut(milestone_id)
            .ok_or_else(|| StoreError::NotFound(format!("Milestone {}", milestone_id)))?;
        f(milestone);
        Ok(milestone.clone())
    }
}

#[async_trait]
impl MilestoneStore for InMemoryStore {
    async fn insert(&self, milestone: &Milestone) -> Result<(), StoreError> {
        let mut milestones = self.lock();
        if milestones.contains_key(&milestone.id) {
            return Err(StoreError::Conflict(format!(
                "Milestone {} already exists",
                milestone.id
            )));
        }
        milestones.insert(milestone.id.clone(), milestone.clone());
        Ok(())
    }

    async fn fetch(&self, milestone_id: &str) -> Result<Option<Milestone>, StoreError> {
        Ok(self.get(milestone_id))
    }

    async fn eligible_rows(&self, query: &EligibilityQuery) -> Result<Vec<RowValues>, StoreError> {
        let milestones = self.lock();
        Ok(milestones
            .values()
            .filter(|m| query.matches(m))
            .map(Milestone::to_row_values)
            .collect())
    }

    async fn claim(
        &self,
        query: &EligibilityQuery,
        milestone_id: &str,
        claimant: &Claimant,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut milestones = self.lock();
        let Some(milestone) = milestones.get_mut(milestone_id) else {
            return Ok(false);
        };
        if !query.matches(milestone) {
            return Ok(false);
        }

        milestone
            .statuses
            .set(query.stage(), StageStatus::InProgress);
        milestone.claimant = claimant.clone();
        milestone.start_time = started_at;
        Ok(true)
    }

    async fn record_success(
        &self,
        stage: Stage,
        milestone_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(milestone_id, |m| {
            m.statuses.set(stage, StageStatus::Completed);
            m.error_message.clear();
            m.end_time = ended_at;
            m.retries = 0;
        })?;
        Ok(())
    }

    async fn record_failure(
        &self,
        stage: Stage,
        milestone_id: &str,
        error: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Milestone, StoreError> {
        self.update(milestone_id, |m| {
            m.statuses.set(stage, StageStatus::Failed);
            m.error_message = error.to_string();
            m.end_time = ended_at;
            m.retries = m.retries.saturating_add(1);
        })
    }

    async fn override_stage(
        &self,
        stage: Stage,
        milestone_id: &str,
        operator: &str,
    ) -> Result<(), StoreError> {
        self.update(milestone_id, |m| {
            m.statuses.set(stage, StageStatus::Overridden);
            m.overridden_by = operator.to_string();
        })?;
        Ok(())
    }

    async fn requeue_stage(&self, stage: Stage, milestone_id: &str) -> Result<(), StoreError> {
        let mut milestones = self.lock();
        match milestones.get_mut(milestone_id) {
            Some(m) if m.status(stage) == StageStatus::Failed => {
                m.statuses.set(stage, StageStatus::Pending);
                m.retries = 0;
                m.error_message.clear();
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!(
                "Milestone {} has no failed {} stage",
                milestone_id, stage
            ))),
        }
    }
}
