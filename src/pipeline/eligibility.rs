//! Eligibility predicate for a stage.
//!
//! A stage of a milestone is claimable when
//!
//! ```text
//! (status = failed AND retries < max_retries)
//!   OR (status = pending AND every dependency = completed)
//! ```
//!
//! The predicate is rendered to SQL once, when the stage is set up. Column
//! names come from the fixed `Stage` table and every value is a bind
//! parameter, so no runtime value is ever spliced into query text. The same
//! predicate is available in-process through [`EligibilityQuery::matches`].

use crate::milestone::{Milestone, StageStatus};
use crate::storage::schema::{tables, MILESTONE_COLUMNS};

use super::stage::{Stage, StageDefinition};

/// Precomputed eligibility predicate and queries for one stage.
///
/// Predicate bind parameters, shared by every query built here:
/// `$1` failed, `$2` retry ceiling, `$3` pending, `$4` completed.
#[derive(Debug, Clone)]
pub struct EligibilityQuery {
    stage: Stage,
    dependencies: Vec<Stage>,
    max_retries: u32,
    predicate_sql: String,
    select_sql: String,
    claim_sql: String,
}

impl EligibilityQuery {
    pub fn new(definition: &StageDefinition, max_retries: u32) -> Self {
        let predicate_sql = render_predicate(definition);
        let columns = MILESTONE_COLUMNS.join(", ");

        let select_sql = format!(
            "SELECT {columns} FROM {table} WHERE {predicate_sql}",
            table = tables::MILESTONES,
        );

        // $5 inprogress, $6 host, $7 pid, $8 start time, $9 milestone id
        let claim_sql = format!(
            "UPDATE {table} SET {status} = $5, host_machine = $6, process_id = $7, start_time = $8 \
             WHERE milestone_id = (\
             SELECT milestone_id FROM {table} \
             WHERE milestone_id = $9 AND ({predicate_sql}) \
             FOR UPDATE SKIP LOCKED\
             ) RETURNING milestone_id",
            table = tables::MILESTONES,
            status = definition.stage.status_column(),
        );

        Self {
            stage: definition.stage,
            dependencies: definition.dependencies.clone(),
            max_retries,
            predicate_sql,
            select_sql,
            claim_sql,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn dependencies(&self) -> &[Stage] {
        &self.dependencies
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retry ceiling as bound into `$2`.
    pub fn max_retries_param(&self) -> i32 {
        i32::try_from(self.max_retries).unwrap_or(i32::MAX)
    }

    /// The predicate alone, suitable for a `WHERE` clause.
    pub fn predicate_sql(&self) -> &str {
        &self.predicate_sql
    }

    /// Locking-free discovery query returning full rows in column order.
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// Conditional update that claims one milestone, skipping locked rows.
    pub fn claim_sql(&self) -> &str {
        &self.claim_sql
    }

    /// Evaluates the predicate against an in-memory milestone.
    pub fn matches(&self, milestone: &Milestone) -> bool {
        match milestone.status(self.stage) {
            StageStatus::Failed => milestone.retries < self.max_retries,
            StageStatus::Pending => self
                .dependencies
                .iter()
                .all(|dep| milestone.status(*dep) == StageStatus::Completed),
            _ => false,
        }
    }
}

fn render_predicate(definition: &StageDefinition) -> String {
    let column = definition.stage.status_column();
    let retry_clause = format!("({column} = $1 AND retries < $2)");

    if definition.dependencies.is_empty() {
        return format!("{retry_clause} OR {column} = $3");
    }

    let dependency_clause = definition
        .dependencies
        .iter()
        .map(|dep| format!("{} = $4", dep.status_column()))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!("{retry_clause} OR ({column} = $3 AND ({dependency_clause}))")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestone::Claimant;
    use crate::pipeline::PipelineDefinition;

    fn query_for(stage: Stage) -> EligibilityQuery {
        let pipeline = PipelineDefinition::standard();
        EligibilityQuery::new(pipeline.get(stage).unwrap(), 3)
    }

    fn milestone() -> Milestone {
        Milestone::new(Claimant::new("host", 1))
    }

    #[test]
    fn test_predicate_without_dependencies() {
        let q = query_for(Stage::Ingest);
        assert_eq!(
            q.predicate_sql(),
            "(ingest_status = $1 AND retries < $2) OR ingest_status = $3"
        );
    }

    #[test]
    fn test_predicate_with_dependencies() {
        let q = query_for(Stage::Assemble);
        assert_eq!(
            q.predicate_sql(),
            "(assemble_status = $1 AND retries < $2) OR \
             (assemble_status = $3 AND (transcode_status = $4 AND metadata_gen_status = $4))"
        );
    }

    #[test]
    fn test_select_and_claim_sql_shape() {
        let q = query_for(Stage::Publish);

        assert!(q.select_sql().starts_with("SELECT milestone_id, ingest_status"));
        assert!(q.select_sql().contains("FROM milestones WHERE"));
        assert!(!q.select_sql().contains("FOR UPDATE"));

        assert!(q.claim_sql().starts_with("UPDATE milestones SET publish_status = $5"));
        assert!(q.claim_sql().contains("milestone_id = $9"));
        assert!(q.claim_sql().contains("FOR UPDATE SKIP LOCKED"));
        assert!(q.claim_sql().contains(q.predicate_sql()));
        assert!(q.claim_sql().ends_with("RETURNING milestone_id"));
    }

    #[test]
    fn test_sql_has_no_literal_values() {
        for def in PipelineDefinition::standard().stages() {
            let q = EligibilityQuery::new(def, 3);
            for text in [q.select_sql(), q.claim_sql()] {
                assert!(!text.contains('\''));
                assert!(!text.contains("pending"));
                assert!(!text.contains(" 3"));
            }
        }
    }

    #[test]
    fn test_matches_pending_root_stage() {
        let q = query_for(Stage::Ingest);
        assert!(q.matches(&milestone()));
    }

    #[test]
    fn test_matches_dependency_gating() {
        let q = query_for(Stage::Assemble);
        let mut m = milestone();
        m.statuses.set(Stage::Ingest, StageStatus::Completed);
        assert!(!q.matches(&m));

        m.statuses.set(Stage::Transcode, StageStatus::Completed);
        assert!(!q.matches(&m));

        m.statuses.set(Stage::MetadataGen, StageStatus::InProgress);
        assert!(!q.matches(&m));

        m.statuses.set(Stage::MetadataGen, StageStatus::Completed);
        assert!(q.matches(&m));
    }

    #[test]
    fn test_matches_retry_ceiling() {
        let q = query_for(Stage::Ingest);
        let mut m = milestone();
        m.statuses.set(Stage::Ingest, StageStatus::Failed);

        for retries in 0..3 {
            m.retries = retries;
            assert!(q.matches(&m), "retries={} should be eligible", retries);
        }
        m.retries = 3;
        assert!(!q.matches(&m));
    }

    #[test]
    fn test_failed_retry_ignores_dependencies() {
        let q = query_for(Stage::Transcode);
        let mut m = milestone();
        m.statuses.set(Stage::Transcode, StageStatus::Failed);
        m.retries = 1;
        assert!(q.matches(&m));
    }

    #[test]
    fn test_terminal_statuses_not_eligible() {
        let q = query_for(Stage::Ingest);
        for status in [
            StageStatus::InProgress,
            StageStatus::Completed,
            StageStatus::Overridden,
        ] {
            let mut m = milestone();
            m.statuses.set(Stage::Ingest, status);
            assert!(!q.matches(&m));
        }
    }
}
