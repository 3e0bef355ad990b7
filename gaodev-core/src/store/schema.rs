//! Schema DDL and migration phase definitions (§4.1).
//!
//! Generalizes the teacher's `state::schema` column-family registry (a flat
//! list of named collections) into SQL table DDL, since the Store here is
//! genuinely relational rather than a KV store.

/// Current schema version. Bump when adding a migration.
pub const SCHEMA_VERSION: i64 = 1;

/// Phase (a): schema DDL for version 1.
pub const V1_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS epics (
    epic_num        INTEGER PRIMARY KEY,
    feature_name    TEXT NOT NULL,
    scale_level     INTEGER NOT NULL,
    status          TEXT NOT NULL,
    total_stories   INTEGER NOT NULL DEFAULT 0,
    stories_completed INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    completed_at    TEXT
);

CREATE TABLE IF NOT EXISTS stories (
    epic_num        INTEGER NOT NULL,
    story_num       INTEGER NOT NULL,
    title           TEXT NOT NULL,
    status          TEXT NOT NULL,
    cycle_time_seconds INTEGER,
    rework_count    INTEGER NOT NULL DEFAULT 0,
    quality_gates_passed TEXT NOT NULL DEFAULT 'unknown',
    PRIMARY KEY (epic_num, story_num),
    FOREIGN KEY (epic_num) REFERENCES epics(epic_num)
);

CREATE TABLE IF NOT EXISTS ceremonies (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    epic_num        INTEGER NOT NULL,
    story_num       INTEGER,
    ceremony_type   TEXT NOT NULL,
    held_at         TEXT NOT NULL,
    duration_ms     INTEGER NOT NULL DEFAULT 0,
    participants    TEXT NOT NULL DEFAULT '[]',
    transcript      TEXT NOT NULL DEFAULT '',
    summary         TEXT NOT NULL DEFAULT '',
    outcome         TEXT NOT NULL,
    idempotency_key TEXT UNIQUE,
    commit_sha      TEXT,
    FOREIGN KEY (epic_num) REFERENCES epics(epic_num)
);

CREATE TABLE IF NOT EXISTS action_items (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    ceremony_id     INTEGER NOT NULL,
    priority        TEXT NOT NULL,
    description     TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'open',
    auto_promote_to_story INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    closed_at       TEXT,
    FOREIGN KEY (ceremony_id) REFERENCES ceremonies(id)
);

CREATE TABLE IF NOT EXISTS learnings (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    category        TEXT NOT NULL,
    text            TEXT NOT NULL,
    tags            TEXT NOT NULL DEFAULT '[]',
    scale_level     INTEGER NOT NULL,
    project_type    TEXT NOT NULL,
    base_relevance  REAL NOT NULL,
    application_count INTEGER NOT NULL DEFAULT 0,
    success_rate    REAL NOT NULL DEFAULT 1.0,
    confidence_score REAL NOT NULL DEFAULT 0.5,
    indexed_at      TEXT NOT NULL,
    superseded_by   INTEGER
);

CREATE TABLE IF NOT EXISTS learning_applications (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    learning_id     INTEGER NOT NULL,
    epic_num        INTEGER NOT NULL,
    story_num       INTEGER,
    outcome         TEXT NOT NULL,
    applied_at      TEXT NOT NULL,
    context         TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (learning_id) REFERENCES learnings(id)
);

CREATE TABLE IF NOT EXISTS safety_state (
    epic_num        INTEGER NOT NULL,
    ceremony_type   TEXT NOT NULL,
    last_held_at    TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    circuit         TEXT NOT NULL DEFAULT 'closed',
    total_ceremonies_this_epic INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (epic_num, ceremony_type)
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version         INTEGER PRIMARY KEY,
    applied_at      TEXT NOT NULL,
    checkpoint_tag  TEXT
);
"#;

/// Phase (c): indexes, built after backfill so they don't slow bulk writes.
pub const V1_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_stories_epic ON stories(epic_num);
CREATE INDEX IF NOT EXISTS idx_ceremonies_epic_type ON ceremonies(epic_num, ceremony_type);
CREATE INDEX IF NOT EXISTS idx_action_items_ceremony ON action_items(ceremony_id);
CREATE INDEX IF NOT EXISTS idx_action_items_status ON action_items(status, created_at);
CREATE INDEX IF NOT EXISTS idx_learning_applications_learning ON learning_applications(learning_id);
"#;
