//! Error types shared across milestone-flow subsystems.
//!
//! Defines the errors that do not belong to a single subsystem:
//! - Row decoding (the projection of untyped query rows into `Milestone`)
//! - Pipeline configuration and stage-graph validation
//!
//! Storage, processing and scheduling errors live next to the code that
//! raises them (`StoreError`, `ProcessError`, `MigrationError`).

use thiserror::Error;

/// Errors raised while projecting an untyped row into a typed record.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Row has {actual} columns but {expected} fields are required")]
    TooFewColumns { expected: usize, actual: usize },

    #[error("Cannot assign value of type {actual} to field '{field}' (expected {expected})")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("Value {value} is out of range for field '{field}'")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("Unknown stage status '{value}' in field '{field}'")]
    UnknownStatus { field: &'static str, value: String },

    #[error("Failed to read column {index}: {message}")]
    Column { index: usize, message: String },
}

/// Errors raised while validating pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing.
    #[error("Missing required setting: {0}")]
    Missing(String),

    /// A setting has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// A stage is declared more than once.
    #[error("Stage '{0}' is defined more than once")]
    DuplicateStage(String),

    /// A stage depends on a stage that is not part of the pipeline.
    #[error("Stage '{stage}' depends on undefined stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected involving stage '{0}'")]
    Cycle(String),
}
