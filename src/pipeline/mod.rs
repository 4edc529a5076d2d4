//! Stage model and the per-stage processing lifecycle.
//!
//! # Architecture
//!
//! - **Stage / PipelineDefinition**: the five stages and their dependency DAG
//! - **EligibilityQuery**: the claimability predicate, rendered once per stage
//! - **StageWork**: injected business logic for a stage
//! - **StageProcessor**: claim, execute and record for one stage
//! - **PipelineConfig**: intervals, deadlines and limits shared by all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use milestone_flow::pipeline::{PipelineConfig, PipelineDefinition, SimulatedWork, Stage, StageProcessor};
//!
//! let definition = PipelineDefinition::standard();
//! let processor = StageProcessor::new(
//!     definition.get(Stage::Ingest).unwrap(),
//!     Arc::new(SimulatedWork::for_stage(Stage::Ingest)),
//!     store,
//!     &PipelineConfig::default(),
//!     Claimant::current(),
//! );
//!
//! match processor.process(milestone).await? {
//!     ProcessOutcome::Completed => {}
//!     ProcessOutcome::ClaimLost => {}
//!     ProcessOutcome::Failed { error, .. } => eprintln!("{error}"),
//! }
//! ```

pub mod config;
pub mod eligibility;
pub mod processor;
pub mod stage;
pub mod work;

pub use config::PipelineConfig;
pub use eligibility::EligibilityQuery;
pub use processor::{Claimed, ProcessError, ProcessOutcome, StageProcessor};
pub use stage::{PipelineDefinition, Stage, StageDefinition};
pub use work::{FnWork, SimulatedWork, StageWork};
