//! Schema for the local host database.
//!
//! The local backend mirrors the three host resources a gate run touches:
//! change-request comments, check runs keyed by head SHA, and labels.

pub const HOST_DB_NAME: &str = "host.db";

pub const HOST_DB_SCHEMA_COMMENTS: &str = "
    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pr INTEGER NOT NULL,
        body TEXT NOT NULL,
        etag TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const HOST_DB_SCHEMA_COMMENTS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_comments_pr ON comments(pr)";

pub const HOST_DB_SCHEMA_CHECK_RUNS: &str = "
    CREATE TABLE IF NOT EXISTS check_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        head_sha TEXT NOT NULL,
        status TEXT NOT NULL,
        conclusion TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";
pub const HOST_DB_SCHEMA_CHECK_RUNS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_check_runs_sha ON check_runs(head_sha)";

pub const HOST_DB_SCHEMA_LABELS: &str = "
    CREATE TABLE IF NOT EXISTS labels (
        pr INTEGER NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (pr, name)
    )
";

pub const HOST_DB_SCHEMA: &[&str] = &[
    HOST_DB_SCHEMA_COMMENTS,
    HOST_DB_SCHEMA_COMMENTS_INDEX,
    HOST_DB_SCHEMA_CHECK_RUNS,
    HOST_DB_SCHEMA_CHECK_RUNS_INDEX,
    HOST_DB_SCHEMA_LABELS,
];
