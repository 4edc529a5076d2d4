//! Owns every stage's poller and scheduler.
//!
//! `start` spawns one poller and one scheduler per stage of the pipeline
//! definition, connected by a bounded queue. `shutdown` fires the shared
//! cancellation token: pollers finish their cycle and close their queues,
//! schedulers drain and wait for in-flight executions.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ConfigError;
use crate::milestone::Claimant;
use crate::pipeline::{PipelineConfig, PipelineDefinition, Stage, StageProcessor, StageWork};
use crate::storage::MilestoneStore;

use super::poller::Poller;
use super::stage_scheduler::{SchedulerStats, StageScheduler};

/// Errors that can occur while running the pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Runner is already running.
    #[error("Runner is already running")]
    AlreadyRunning,

    /// Runner is not running.
    #[error("Runner is not running")]
    NotRunning,
}

/// Runs the whole pipeline inside one process.
pub struct PipelineRunner {
    config: PipelineConfig,
    store: Arc<dyn MilestoneStore>,
    schedulers: Vec<Arc<StageScheduler>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineRunner {
    /// Builds one processor and scheduler per stage of `definition`.
    ///
    /// `work_for` supplies the business logic of each stage.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Config` if `config` fails validation.
    pub fn new<F>(
        definition: &PipelineDefinition,
        store: Arc<dyn MilestoneStore>,
        config: PipelineConfig,
        claimant: Claimant,
        mut work_for: F,
    ) -> Result<Self, RunnerError>
    where
        F: FnMut(Stage) -> Arc<dyn StageWork>,
    {
        config.validate()?;

        let schedulers = definition
            .stages()
            .iter()
            .map(|stage_def| {
                let processor = StageProcessor::new(
                    stage_def,
                    work_for(stage_def.stage),
                    Arc::clone(&store),
                    &config,
                    claimant.clone(),
                );
                Arc::new(StageScheduler::new(Arc::new(processor), &config))
            })
            .collect();

        Ok(Self {
            config,
            store,
            schedulers,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// Spawns every poller and scheduler.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::AlreadyRunning` if already started.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        if self.is_running() {
            return Err(RunnerError::AlreadyRunning);
        }

        for scheduler in &self.schedulers {
            let poller = Poller::new(
                scheduler.processor().query().clone(),
                Arc::clone(&self.store),
                &self.config,
            );
            let (poller_handle, queue) =
                poller.spawn(self.config.queue_capacity, self.cancel.child_token());

            let scheduler = Arc::clone(scheduler);
            let scheduler_handle = tokio::spawn(async move { scheduler.run(queue).await });

            self.handles.push(poller_handle);
            self.handles.push(scheduler_handle);
        }

        info!(stages = self.schedulers.len(), "Pipeline started");
        Ok(())
    }

    /// Token whose cancellation stops the pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Cancels all pollers and waits for the schedulers to drain.
    ///
    /// In-flight executions are never aborted; this returns once the last
    /// one has been recorded.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::NotRunning` if the runner was never started.
    pub async fn shutdown(&mut self) -> Result<(), RunnerError> {
        if !self.is_running() {
            return Err(RunnerError::NotRunning);
        }

        info!("Initiating pipeline shutdown");
        self.cancel.cancel();
        self.wait().await;
        info!("Pipeline shutdown complete");
        Ok(())
    }

    /// Waits for every spawned task to finish.
    pub async fn wait(&mut self) {
        for joined in join_all(self.handles.drain(..)).await {
            if let Err(e) = joined {
                error!(error = %e, "Pipeline task panicked");
            }
        }
    }

    /// Current counters for every stage, in pipeline order.
    pub fn stats(&self) -> Vec<SchedulerStats> {
        self.schedulers.iter().map(|s| s.stats()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
