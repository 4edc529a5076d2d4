//! Stage work strategies.
//!
//! The core never looks inside a stage's business logic. It hands a claimed
//! milestone to a [`StageWork`] and treats any returned error as a failed
//! execution.

use std::future::Future;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::milestone::Milestone;

use super::stage::Stage;

/// Business logic executed for one stage of one milestone.
///
/// Implementations should be idempotent: a milestone may be executed more
/// than once for the same stage.
#[async_trait]
pub trait StageWork: Send + Sync {
    async fn run(&self, milestone: &Milestone) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`StageWork`].
pub struct FnWork<F> {
    f: F,
}

impl<F, Fut> FnWork<F>
where
    F: Fn(Milestone) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StageWork for FnWork<F>
where
    F: Fn(Milestone) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, milestone: &Milestone) -> anyhow::Result<()> {
        (self.f)(milestone.clone()).await
    }
}

/// Stand-in business logic: sleeps for a random duration and fails with a
/// fixed probability.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    max_latency: Duration,
    failure_rate: f64,
}

impl SimulatedWork {
    /// Probability that a simulated execution fails.
    pub const DEFAULT_FAILURE_RATE: f64 = 0.2;

    pub fn new(max_latency: Duration, failure_rate: f64) -> Self {
        Self {
            max_latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Latency profile used for each stage when serving without real
    /// business logic.
    pub fn for_stage(stage: Stage) -> Self {
        let max_secs = match stage {
            Stage::Ingest => 5,
            Stage::Transcode => 10,
            Stage::MetadataGen => 5,
            Stage::Assemble => 10,
            Stage::Publish => 30,
        };
        Self::new(Duration::from_secs(max_secs), Self::DEFAULT_FAILURE_RATE)
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

#[async_trait]
impl StageWork for SimulatedWork {
    async fn run(&self, _milestone: &Milestone) -> anyhow::Result<()> {
        let (delay, fail) = {
            use rand::RngExt;

            let mut rng = rand::rng();
            let max_ms = self.max_latency.as_millis() as u64;
            let delay = if max_ms == 0 {
                0
            } else {
                rng.random_range(0..max_ms)
            };
            (delay, rng.random_bool(self.failure_rate))
        };

        tokio::time::sleep(Duration::from_millis(delay)).await;

        if fail {
            bail!("simulated stage failure");
        }
        Ok(())
    }
}
