//! Claim, execute and record for one stage.
//!
//! A single generic [`StageProcessor`] serves every stage; what differs per
//! stage is its [`StageDefinition`] and the injected [`StageWork`].
//!
//! The lifecycle is enforced by types: [`StageProcessor::execute`] and
//! [`StageProcessor::record`] take a [`Claimed`] token that only a
//! successful [`StageProcessor::claim`] can produce.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::milestone::{Claimant, Milestone, StageStatus};
use crate::storage::{MilestoneStore, StoreError};

use super::config::PipelineConfig;
use super::eligibility::EligibilityQuery;
use super::stage::{Stage, StageDefinition};
use super::work::StageWork;

/// Infrastructure failure during one processing attempt.
///
/// Nothing was committed for the failed step; the milestone stays eligible
/// and the attempt consumed no retry.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The claim could not be issued or timed out.
    #[error("Claim failed: {0}")]
    Claim(#[source] StoreError),

    /// The execution result could not be recorded.
    #[error("Failed to record result: {0}")]
    Record(#[source] StoreError),
}

/// Terminal outcome of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The stage was executed and recorded as completed.
    Completed,
    /// Another claimant won, or the milestone was no longer eligible.
    ClaimLost,
    /// The work failed and the failure was recorded.
    Failed {
        error: String,
        /// The failure used up the last automatic retry.
        dead_lettered: bool,
    },
}

/// Proof that this process holds the claim on one stage of one milestone.
///
/// Not `Clone`; only [`StageProcessor::claim`] creates one.
#[derive(Debug)]
pub struct Claimed {
    stage: Stage,
    milestone: Milestone,
}

impl Claimed {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The milestone as it looks right after the claim.
    pub fn milestone(&self) -> &Milestone {
        &self.milestone
    }
}

/// Runs the claim/execute/record lifecycle for one stage.
pub struct StageProcessor {
    query: EligibilityQuery,
    work: Arc<dyn StageWork>,
    store: Arc<dyn MilestoneStore>,
    claimant: Claimant,
    operation_timeout: Duration,
}

impl StageProcessor {
    pub fn new(
        definition: &StageDefinition,
        work: Arc<dyn StageWork>,
        store: Arc<dyn MilestoneStore>,
        config: &PipelineConfig,
        claimant: Claimant,
    ) -> Self {
        Self {
            query: EligibilityQuery::new(definition, config.max_retries),
            work,
            store,
            claimant,
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn stage(&self) -> Stage {
        self.query.stage()
    }

    /// The eligibility predicate shared with this stage's poller.
    pub fn query(&self) -> &EligibilityQuery {
        &self.query
    }

    pub fn store(&self) -> &Arc<dyn MilestoneStore> {
        &self.store
    }

    pub fn claimant(&self) -> &Claimant {
        &self.claimant
    }

    /// Attempts to claim the stage of `milestone` on the primary.
    ///
    /// Returns `Ok(None)` when another claimant won or the milestone is no
    /// longer eligible.
    pub async fn claim(&self, mut milestone: Milestone) -> Result<Option<Claimed>, StoreError> {
        let stage = self.stage();
        let started_at = Utc::now();

        let won = bounded(
            self.operation_timeout,
            self.store
                .claim(&self.query, &milestone.id, &self.claimant, started_at),
        )
        .await?;

        if !won {
            debug!(stage = %stage, milestone_id = %milestone.id, "Claim lost");
            return Ok(None);
        }

        milestone.statuses.set(stage, StageStatus::InProgress);
        milestone.claimant = self.claimant.clone();
        milestone.start_time = started_at;

        Ok(Some(Claimed { stage, milestone }))
    }

    /// Runs the stage's work. Not bounded by any deadline.
    pub async fn execute(&self, claimed: &Claimed) -> anyhow::Result<()> {
        self.work.run(&claimed.milestone).await
    }

    /// Persists the result of [`execute`](Self::execute), releasing the claim.
    pub async fn record(
        &self,
        claimed: Claimed,
        result: &anyhow::Result<()>,
    ) -> Result<ProcessOutcome, StoreError> {
        let stage = claimed.stage;
        let milestone_id = claimed.milestone.id.as_str();
        let ended_at = Utc::now();

        match result {
            Ok(()) => {
                bounded(
                    self.operation_timeout,
                    self.store.record_success(stage, milestone_id, ended_at),
                )
                .await?;
                Ok(ProcessOutcome::Completed)
            }
            Err(e) => {
                let error = format!("{:#}", e);
                let written = bounded(
                    self.operation_timeout,
                    self.store
                        .record_failure(stage, milestone_id, &error, ended_at),
                )
                .await?;

                let max_retries = self.query.max_retries();
                let dead_lettered = written.is_dead_lettered(stage, max_retries);
                if dead_lettered {
                    warn!(
                        stage = %stage,
                        milestone_id = %milestone_id,
                        retries = written.retries,
                        error = %error,
                        "Retry ceiling reached, stage dead-lettered"
                    );
                }
                // The counter is per milestone: this failure may also have
                // pushed a sibling's earlier failure past the ceiling.
                if written.retries == max_retries {
                    for sibling in Stage::ALL {
                        if sibling != stage && written.is_dead_lettered(sibling, max_retries) {
                            warn!(
                                stage = %sibling,
                                milestone_id = %milestone_id,
                                retries = written.retries,
                                failed_stage = %stage,
                                "Retry ceiling reached, stage dead-lettered"
                            );
                        }
                    }
                }

                Ok(ProcessOutcome::Failed {
                    error,
                    dead_lettered,
                })
            }
        }
    }

    /// Claim, then execute and record if the claim was won.
    pub async fn process(&self, milestone: Milestone) -> Result<ProcessOutcome, ProcessError> {
        let Some(claimed) = self.claim(milestone).await.map_err(ProcessError::Claim)? else {
            return Ok(ProcessOutcome::ClaimLost);
        };

        let result = self.execute(&claimed).await;
        self.record(claimed, &result)
            .await
            .map_err(ProcessError::Record)
    }
}

async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FnWork, PipelineDefinition};
    use crate::storage::InMemoryStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::DateTime;

    fn processor_with(
        stage: Stage,
        store: Arc<dyn MilestoneStore>,
        work: Arc<dyn StageWork>,
    ) -> StageProcessor {
        let definition = PipelineDefinition::standard();
        StageProcessor::new(
            definition.get(stage).unwrap(),
            work,
            store,
            &PipelineConfig::default(),
            Claimant::new("worker-a", 11),
        )
    }

    fn succeed() -> Arc<dyn StageWork> {
        Arc::new(FnWork::new(|_m: Milestone| async { Ok::<(), anyhow::Error>(()) }))
    }

    fn fail(message: &'static str) -> Arc<dyn StageWork> {
        Arc::new(FnWork::new(move |_m: Milestone| async move {
            Err::<(), _>(anyhow!(message))
        }))
    }

    #[tokio::test]
    async fn test_process_success() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let processor = processor_with(Stage::Ingest, store.clone(), succeed());
        let outcome = processor.process(m.clone()).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        let stored = store.get(&m.id).unwrap();
        assert_eq!(stored.status(Stage::Ingest), StageStatus::Completed);
        assert_eq!(stored.claimant, Claimant::new("worker-a", 11));
        assert_eq!(stored.retries, 0);
    }

    #[tokio::test]
    async fn test_claim_marks_in_progress() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let processor = processor_with(Stage::Ingest, store.clone(), succeed());
        let claimed = processor.claim(m.clone()).await.unwrap().unwrap();

        assert_eq!(claimed.stage(), Stage::Ingest);
        assert_eq!(
            claimed.milestone().status(Stage::Ingest),
            StageStatus::InProgress
        );
        assert_eq!(
            store.get(&m.id).unwrap().status(Stage::Ingest),
            StageStatus::InProgress
        );

        // Second claim on the same stage loses.
        assert!(processor.claim(m).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_exclusivity_under_concurrency() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let processor = Arc::new(processor_with(Stage::Ingest, store.clone(), succeed()));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let processor = Arc::clone(&processor);
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                processor.claim(m).await.unwrap().is_some()
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn test_dependency_gating_blocks_claim() {
        let store = Arc::new(InMemoryStore::new());
        let mut m = Milestone::new(Claimant::new("creator", 1));
        m.statuses.set(Stage::Ingest, StageStatus::Completed);
        m.statuses.set(Stage::Transcode, StageStatus::Completed);
        store.put(m.clone());

        let processor = processor_with(Stage::Assemble, store.clone(), succeed());
        assert_eq!(
            processor.process(m.clone()).await.unwrap(),
            ProcessOutcome::ClaimLost
        );

        let mut ready = m.clone();
        ready.statuses.set(Stage::MetadataGen, StageStatus::Completed);
        store.put(ready.clone());
        assert_eq!(
            processor.process(ready).await.unwrap(),
            ProcessOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_dead_letters() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let processor = processor_with(Stage::Ingest, store.clone(), fail("disk full"));

        for attempt in 1..=3u32 {
            let current = store.get(&m.id).unwrap();
            let outcome = processor.process(current).await.unwrap();
            assert_eq!(
                outcome,
                ProcessOutcome::Failed {
                    error: "disk full".to_string(),
                    dead_lettered: attempt == 3,
                }
            );
            assert_eq!(store.get(&m.id).unwrap().retries, attempt);
        }

        let stored = store.get(&m.id).unwrap();
        assert!(stored.is_dead_lettered(Stage::Ingest, 3));
        assert!(!processor.query().matches(&stored));
        assert_eq!(
            processor.process(stored).await.unwrap(),
            ProcessOutcome::ClaimLost
        );
    }

    #[tokio::test]
    async fn test_success_resets_retry_state() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let failing = processor_with(Stage::Ingest, store.clone(), fail("flaky"));
        failing.process(m.clone()).await.unwrap();
        let stored = store.get(&m.id).unwrap();
        assert_eq!(stored.retries, 1);
        assert_eq!(stored.error_message, "flaky");

        let working = processor_with(Stage::Ingest, store.clone(), succeed());
        assert_eq!(
            working.process(stored).await.unwrap(),
            ProcessOutcome::Completed
        );

        let stored = store.get(&m.id).unwrap();
        assert_eq!(stored.status(Stage::Ingest), StageStatus::Completed);
        assert_eq!(stored.retries, 0);
        assert!(stored.error_message.is_empty());
    }

    #[tokio::test]
    async fn test_error_chain_is_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let m = Milestone::new(Claimant::new("creator", 1));
        store.put(m.clone());

        let work: Arc<dyn StageWork> = Arc::new(FnWork::new(|_m: Milestone| async {
            Err::<(), _>(anyhow!("connection reset").context("upload failed"))
        }));
        let processor = processor_with(Stage::Ingest, store.clone(), work);
        processor.process(m.clone()).await.unwrap();

        assert_eq!(
            store.get(&m.id).unwrap().error_message,
            "upload failed: connection reset"
        );
    }

    /// Delegates to an in-memory store, except that the chosen steps never
    /// answer.
    struct StalledStore {
        inner: InMemoryStore,
        stall_claim: bool,
        stall_record: bool,
    }

    impl StalledStore {
        fn stalling(stall_claim: bool, stall_record: bool) -> Self {
            Self {
                inner: InMemoryStore::new(),
                stall_claim,
                stall_record,
            }
        }
    }

    #[async_trait]
    impl MilestoneStore for StalledStore {
        async fn insert(&self, milestone: &Milestone) -> Result<(), StoreError> {
            self.inner.insert(milestone).await
        }
        async fn fetch(&self, id: &str) -> Result<Option<Milestone>, StoreError> {
            self.inner.fetch(id).await
        }
        async fn eligible_rows(
            &self,
            query: &EligibilityQuery,
        ) -> Result<Vec<crate::milestone::RowValues>, StoreError> {
            self.inner.eligible_rows(query).await
        }
        async fn claim(
            &self,
            query: &EligibilityQuery,
            id: &str,
            claimant: &Claimant,
            started_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            if self.stall_claim {
                std::future::pending::<()>().await;
            }
            self.inner.claim(query, id, claimant, started_at).await
        }
        async fn record_success(
            &self,
            stage: Stage,
            id: &str,
            ended_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            if self.stall_record {
                std::future::pending::<()>().await;
            }
            self.inner.record_success(stage, id, ended_at).await
        }
        async fn record_failure(
            &self,
            stage: Stage,
            id: &str,
            error: &str,
            ended_at: DateTime<Utc>,
        ) -> Result<Milestone, StoreError> {
            if self.stall_record {
                std::future::pending::<()>().await;
            }
            self.inner.record_failure(stage, id, error, ended_at).await
        }
        async fn override_stage(
            &self,
            stage: Stage,
            id: &str,
            operator: &str,
        ) -> Result<(), StoreError> {
            self.inner.override_stage(stage, id, operator).await
        }
        async fn requeue_stage(&self, stage: Stage, id: &str) -> Result<(), StoreError> {
            self.inner.requeue_stage(stage, id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_timeout_consumes_no_retry() {
        let store = Arc::new(StalledStore::stalling(true, false));
        let m = Milestone::new(Claimant::new("creator", 1));
        store.inner.put(m.clone());

        let processor = processor_with(Stage::Ingest, store.clone(), succeed());
        let result = processor.process(m.clone()).await;

        assert!(matches!(
            result,
            Err(ProcessError::Claim(StoreError::Timeout(_)))
        ));
        let stored = store.inner.get(&m.id).unwrap();
        assert_eq!(stored.status(Stage::Ingest), StageStatus::Pending);
        assert_eq!(stored.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_timeout_surfaces_and_consumes_no_retry() {
        for work in [succeed(), fail("encoder crashed")] {
            let store = Arc::new(StalledStore::stalling(false, true));
            let m = Milestone::new(Claimant::new("creator", 1));
            store.inner.put(m.clone());

            let processor = processor_with(Stage::Ingest, store.clone(), work);
            let result = processor.process(m.clone()).await;

            assert!(matches!(
                result,
                Err(ProcessError::Record(StoreError::Timeout(_)))
            ));
            let stored = store.inner.get(&m.id).unwrap();
            assert_eq!(stored.status(Stage::Ingest), StageStatus::InProgress);
            assert_eq!(stored.retries, 0);
            assert!(stored.error_message.is_empty());
        }
    }

    #[tokio::test]
    async fn test_sibling_failures_share_the_retry_ceiling() {
        let store = Arc::new(InMemoryStore::new());
        let mut m = Milestone::new(Claimant::new("creator", 1));
        m.statuses.set(Stage::Ingest, StageStatus::Completed);
        m.retries = 1;
        store.put(m.clone());

        // Both siblings were polled from the same snapshot (retries = 1).
        let transcode = processor_with(Stage::Transcode, store.clone(), fail("no codec"));
        let metadata = processor_with(Stage::MetadataGen, store.clone(), fail("no tags"));

        let first = transcode.process(m.clone()).await.unwrap();
        assert_eq!(
            first,
            ProcessOutcome::Failed {
                error: "no codec".to_string(),
                dead_lettered: false,
            }
        );

        let second = metadata.process(m.clone()).await.unwrap();
        assert_eq!(
            second,
            ProcessOutcome::Failed {
                error: "no tags".to_string(),
                dead_lettered: true,
            }
        );

        let stored = store.get(&m.id).unwrap();
        assert_eq!(stored.retries, 3);
        assert!(stored.is_dead_lettered(Stage::Transcode, 3));
        assert!(stored.is_dead_lettered(Stage::MetadataGen, 3));
        assert!(!transcode.query().matches(&stored));
        assert!(!metadata.query().matches(&stored));
    }
}
