//! Stage identifiers and the static pipeline definition.
//!
//! The pipeline is a fixed DAG:
//!
//! ```text
//!              ┌──────────────┐
//!         ┌───►│  transcode   │────┐
//! ┌──────┐│    └──────────────┘    │   ┌──────────┐    ┌─────────┐
//! │ingest├┤                        ├──►│ assemble ├───►│ publish │
//! └──────┘│    ┌──────────────┐    │   └──────────┘    └─────────┘
//!         └───►│ metadata_gen │────┘
//!              └──────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One phase of the pipeline. Each stage owns one status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Transcode,
    MetadataGen,
    Assemble,
    Publish,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Ingest,
        Stage::Transcode,
        Stage::MetadataGen,
        Stage::Assemble,
        Stage::Publish,
    ];

    /// Short, stable name used in logs, metrics labels and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Transcode => "transcode",
            Stage::MetadataGen => "metadata_gen",
            Stage::Assemble => "assemble",
            Stage::Publish => "publish",
        }
    }

    /// Name of the column holding this stage's status.
    ///
    /// Column names come from this fixed table only, so they are safe to
    /// splice into query text.
    pub fn status_column(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest_status",
            Stage::Transcode => "transcode_status",
            Stage::MetadataGen => "metadata_gen_status",
            Stage::Assemble => "assemble_status",
            Stage::Publish => "publish_status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ingest" => Ok(Stage::Ingest),
            "transcode" => Ok(Stage::Transcode),
            "metadata_gen" | "metadatagen" => Ok(Stage::MetadataGen),
            "assemble" => Ok(Stage::Assemble),
            "publish" => Ok(Stage::Publish),
            _ => Err(ConfigError::InvalidValue {
                key: "stage".to_string(),
                message: format!("unknown stage '{}'", s),
            }),
        }
    }
}

/// A stage together with the stages that must be completed before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    pub stage: Stage,
    pub dependencies: Vec<Stage>,
}

impl StageDefinition {
    /// Creates a definition with no dependencies.
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            dependencies: Vec::new(),
        }
    }

    /// Adds a dependency on `stage`.
    pub fn depends_on(mut self, stage: Stage) -> Self {
        if !self.dependencies.contains(&stage) {
            self.dependencies.push(stage);
        }
        self
    }
}

/// Validated set of stage definitions forming an acyclic graph.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Validates and wraps a list of stage definitions.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a stage is declared twice, depends on a stage
    /// that is not declared, or the graph contains a cycle.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for def in &stages {
            if !seen.insert(def.stage) {
                return Err(ConfigError::DuplicateStage(def.stage.to_string()));
            }
        }

        for def in &stages {
            for dep in &def.dependencies {
                if !seen.contains(dep) {
                    return Err(ConfigError::UnknownDependency {
                        stage: def.stage.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        let graph: HashMap<Stage, &[Stage]> = stages
            .iter()
            .map(|d| (d.stage, d.dependencies.as_slice()))
            .collect();

        // 0 = unvisited, 1 = on the current path, 2 = done
        let mut marks: HashMap<Stage, u8> = HashMap::new();
        for def in &stages {
            visit(def.stage, &graph, &mut marks)?;
        }

        Ok(Self { stages })
    }

    /// The standard five-stage pipeline:
    /// ingest → {transcode, metadata_gen} → assemble → publish.
    pub fn standard() -> Self {
        Self {
            stages: vec![
                StageDefinition::new(Stage::Ingest),
                StageDefinition::new(Stage::Transcode).depends_on(Stage::Ingest),
                StageDefinition::new(Stage::MetadataGen).depends_on(Stage::Ingest),
                StageDefinition::new(Stage::Assemble)
                    .depends_on(Stage::Transcode)
                    .depends_on(Stage::MetadataGen),
                StageDefinition::new(Stage::Publish).depends_on(Stage::Assemble),
            ],
        }
    }

    /// Returns the stage definitions in declaration order.
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up the definition for `stage`.
    pub fn get(&self, stage: Stage) -> Option<&StageDefinition> {
        self.stages.iter().find(|d| d.stage == stage)
    }
}

fn visit(
    stage: Stage,
    graph: &HashMap<Stage, &[Stage]>,
    marks: &mut HashMap<Stage, u8>,
) -> Result<(), ConfigError> {
    match marks.get(&stage).copied().unwrap_or(0) {
        2 => return Ok(()),
        1 => return Err(ConfigError::Cycle(stage.to_string())),
        _ => {}
    }
    marks.insert(stage, 1);
    for dep in graph.get(&stage).copied().unwrap_or(&[]) {
        visit(*dep, graph, marks)?;
    }
    marks.insert(stage, 2);
    Ok(())
}
