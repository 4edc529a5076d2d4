//! Milestone record and per-stage status types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::Stage;

/// Status of a single stage of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    #[serde(rename = "inprogress")]
    InProgress,
    Completed,
    Failed,
    /// Set only by an operator; never by the automatic state machine.
    Overridden,
}

impl StageStatus {
    /// Spelling stored in the status columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "inprogress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Overridden => "overridden",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "inprogress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            "overridden" => Ok(StageStatus::Overridden),
            other => Err(other.to_string()),
        }
    }
}

/// Status of every stage of one milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatuses {
    pub ingest: StageStatus,
    pub transcode: StageStatus,
    pub metadata_gen: StageStatus,
    pub assemble: StageStatus,
    pub publish: StageStatus,
}

impl StageStatuses {
    /// All stages pending.
    pub fn pending() -> Self {
        Self {
            ingest: StageStatus::Pending,
            transcode: StageStatus::Pending,
            metadata_gen: StageStatus::Pending,
            assemble: StageStatus::Pending,
            publish: StageStatus::Pending,
        }
    }

    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Ingest => self.ingest,
            Stage::Transcode => self.transcode,
            Stage::MetadataGen => self.metadata_gen,
            Stage::Assemble => self.assemble,
            Stage::Publish => self.publish,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        let slot = match stage {
            Stage::Ingest => &mut self.ingest,
            Stage::Transcode => &mut self.transcode,
            Stage::MetadataGen => &mut self.metadata_gen,
            Stage::Assemble => &mut self.assemble,
            Stage::Publish => &mut self.publish,
        };
        *slot = status;
    }
}

impl Default for StageStatuses {
    fn default() -> Self {
        Self::pending()
    }
}

/// Host and process of the worker that holds (or last held) a stage claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    pub host: String,
    pub process_id: u32,
}

impl Claimant {
    pub fn new(host: impl Into<String>, process_id: u32) -> Self {
        Self {
            host: host.into(),
            process_id,
        }
    }

    /// Identity of the running process.
    ///
    /// Falls back to `unknown-host` when the OS hostname is empty or not
    /// valid UTF-8.
    pub fn current() -> Self {
        let host = gethostname::gethostname()
            .into_string()
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self::new(host, std::process::id())
    }
}

/// Far-future end time meaning "not yet ended".
pub fn end_time_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One work item tracked through the pipeline.
///
/// Field order matches the column order of the `milestones` table; the
/// row decoder relies on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub statuses: StageStatuses,
    pub overridden_by: String,
    pub claimant: Claimant,
    pub retries: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error_message: String,
}

impl Milestone {
    /// Creates a fresh milestone owned by `claimant`: new UUID, every stage
    /// pending, zero retries, started now, sentinel end time.
    pub fn new(claimant: Claimant) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            statuses: StageStatuses::pending(),
            overridden_by: String::new(),
            claimant,
            retries: 0,
            start_time: Utc::now(),
            end_time: end_time_sentinel(),
            error_message: String::new(),
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses.get(stage)
    }

    /// Whether this stage has failed `max_retries` times and can no longer be
    /// claimed automatically.
    pub fn is_dead_lettered(&self, stage: Stage, max_retries: u32) -> bool {
        self.status(stage) == StageStatus::Failed && self.retries >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_spelling() {
        for status in [
            StageStatus::Pending,
            StageStatus::InProgress,
            StageStatus::Completed,
            StageStatus::Failed,
            StageStatus::Overridden,
        ] {
            assert_eq!(status.as_str().parse::<StageStatus>(), Ok(status));
        }
        assert!("in_progress".parse::<StageStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_column_spelling() {
        let json = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(json, "\"inprogress\"");
    }

    #[test]
    fn test_new_milestone_defaults() {
        let m = Milestone::new(Claimant::new("host-a", 7));

        assert!(Uuid::parse_str(&m.id).is_ok());
        for stage in Stage::ALL {
            assert_eq!(m.status(stage), StageStatus::Pending);
        }
        assert_eq!(m.retries, 0);
        assert_eq!(m.end_time, end_time_sentinel());
        assert!(m.error_message.is_empty());
        assert!(m.overridden_by.is_empty());
        assert_eq!(m.claimant.host, "host-a");
    }

    #[test]
    fn test_statuses_set_only_touches_one_stage() {
        let mut statuses = StageStatuses::pending();
        statuses.set(Stage::Transcode, StageStatus::Completed);

        assert_eq!(statuses.get(Stage::Transcode), StageStatus::Completed);
        assert_eq!(statuses.get(Stage::MetadataGen), StageStatus::Pending);
    }

    #[test]
    fn test_dead_lettered() {
        let mut m = Milestone::new(Claimant::new("h", 1));
        m.statuses.set(Stage::Ingest, StageStatus::Failed);
        m.retries = 2;
        assert!(!m.is_dead_lettered(Stage::Ingest, 3));
        m.retries = 3;
        assert!(m.is_dead_lettered(Stage::Ingest, 3));
        assert!(!m.is_dead_lettered(Stage::Publish, 3));
    }

    #[test]
    fn test_current_claimant_uses_own_pid() {
        let claimant = Claimant::current();
        assert_eq!(claimant.process_id, std::process::id());
        assert!(!claimant.host.is_empty());
    }

    #[test]
    fn test_current_claimant_reads_os_hostname() {
        let expected = gethostname::gethostname().to_string_lossy().trim().to_string();
        if expected.is_empty() {
            return;
        }
        assert_eq!(Claimant::current().host, expected);
        assert_ne!(Claimant::current().host, "unknown-host");
    }
}
