//! Database schema constants.
//!
//! The `milestones` table is the single source of truth for the pipeline.
//! Column order is significant: discovery queries select
//! [`MILESTONE_COLUMNS`] and the row decoder maps values positionally.

/// SQL schema for creating the milestones table.
pub const CREATE_MILESTONES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS milestones (
    milestone_id TEXT PRIMARY KEY,
    ingest_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (ingest_status IN ('pending', 'inprogress', 'completed', 'failed', 'overridden')),
    transcode_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (transcode_status IN ('pending', 'inprogress', 'completed', 'failed', 'overridden')),
    metadata_gen_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (metadata_gen_status IN ('pending', 'inprogress', 'completed', 'failed', 'overridden')),
    assemble_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (assemble_status IN ('pending', 'inprogress', 'completed', 'failed', 'overridden')),
    publish_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (publish_status IN ('pending', 'inprogress', 'completed', 'failed', 'overridden')),
    overridden_by TEXT NOT NULL DEFAULT '',
    host_machine TEXT NOT NULL,
    process_id BIGINT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    start_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    end_time TIMESTAMPTZ NOT NULL DEFAULT '2099-01-01 00:00:00+00',
    error_message TEXT NOT NULL DEFAULT ''
)
"#;

/// Partial indexes keeping each stage's discovery query cheap once most
/// rows have moved past it.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_milestones_ingest_open ON milestones(ingest_status) WHERE ingest_status IN ('pending', 'failed');
CREATE INDEX IF NOT EXISTS idx_milestones_transcode_open ON milestones(transcode_status) WHERE transcode_status IN ('pending', 'failed');
CREATE INDEX IF NOT EXISTS idx_milestones_metadata_gen_open ON milestones(metadata_gen_status) WHERE metadata_gen_status IN ('pending', 'failed');
CREATE INDEX IF NOT EXISTS idx_milestones_assemble_open ON milestones(assemble_status) WHERE assemble_status IN ('pending', 'failed');
CREATE INDEX IF NOT EXISTS idx_milestones_publish_open ON milestones(publish_status) WHERE publish_status IN ('pending', 'failed')
"#;

/// Columns of the milestones table, in decode order.
pub const MILESTONE_COLUMNS: [&str; 13] = [
    "milestone_id",
    "ingest_status",
    "transcode_status",
    "metadata_gen_status",
    "assemble_status",
    "publish_status",
    "overridden_by",
    "host_machine",
    "process_id",
    "retries",
    "start_time",
    "end_time",
    "error_message",
];

/// Named schema steps, in application order. Names are recorded once
/// applied and must never be reused for different SQL.
pub const MIGRATIONS: [(&str, &str); 2] = [
    ("0001_create_milestones", CREATE_MILESTONES_TABLE),
    ("0002_stage_status_indexes", CREATE_INDEXES),
];

/// Table names in the schema.
pub mod tables {
    /// Milestones table name.
    pub const MILESTONES: &str = "milestones";
    /// Names of applied schema steps.
    pub const SCHEMA_HISTORY: &str = "_migrations";
}
