//! Milestone data model and row mapping.
//!
//! A milestone is one work item carried through the pipeline. It holds an
//! independent status per stage, the identity of the last claimant, a retry
//! counter shared by the stages and the last recorded error.

pub mod decode;
pub mod types;

pub use decode::{ColumnValue, FromRowValues, RowValues};
pub use types::{end_time_sentinel, Claimant, Milestone, StageStatus, StageStatuses};
