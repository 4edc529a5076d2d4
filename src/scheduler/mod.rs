//! Polling and dispatch for every pipeline stage.
//!
//! Worker processes coordinate only through the milestone table; nothing
//! in this module talks to another process.
//!
//! - **Poller**: periodic eligibility query against a read replica
//! - **StageScheduler**: spawns one claim/execute/record run per polled milestone
//! - **PipelineRunner**: owns all pollers and schedulers and their shutdown
//!
//! # Architecture
//!
//! ```text
//!   replica ──► Poller ──► mpsc queue ──► StageScheduler ──► spawned run
//!                                                               │
//!   primary ◄──────────── claim (SKIP LOCKED) / record ◄────────┘
//! ```
//!
//! One such chain runs per stage.
//!
//! # Example
//!
//! ```rust,ignore
//! use milestone_flow::scheduler::PipelineRunner;
//!
//! let mut runner = PipelineRunner::new(
//!     &PipelineDefinition::standard(),
//!     store,
//!     PipelineConfig::default(),
//!     Claimant::current(),
//!     |stage| Arc::new(SimulatedWork::for_stage(stage)) as Arc<dyn StageWork>,
//! )?;
//!
//! runner.start()?;
//! tokio::signal::ctrl_c().await?;
//! runner.shutdown().await?;
//! ```

pub mod outcome;
pub mod poller;
pub mod runner;
pub mod stage_scheduler;

pub use outcome::DispatchOutcome;
pub use poller::Poller;
pub use runner::{PipelineRunner, RunnerError};
pub use stage_scheduler::{SchedulerStats, StageScheduler};
