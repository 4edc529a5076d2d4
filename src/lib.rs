//! milestone_flow: a distributed, database-coordinated media pipeline.
//!
//! Milestones move through ingest, transcode, metadata generation, assemble
//! and publish. Independent worker processes poll read replicas for
//! eligible work, claim it on the primary with `FOR UPDATE SKIP LOCKED`,
//! run the stage and record the result. No process talks to another.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod milestone;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use error::{ConfigError, DecodeError};
pub use milestone::{Claimant, Milestone, StageStatus};
pub use pipeline::{PipelineConfig, PipelineDefinition, Stage};
pub use storage::{MilestoneStore, StoreError};
