use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateLedgerError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Malformed ledger: {0}")]
    MalformedLedger(String),
    #[error(
        "Ambiguous ledger: {count} comments carry the full anchor set; resolve manually before rerunning"
    )]
    AmbiguousLedger { count: usize },
    #[error("Concurrent edit conflict on ledger comment {comment_id} persisted after re-fetch")]
    ConcurrentEditConflict { comment_id: u64 },
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
    #[error("Check run rejected: {0}")]
    CheckRunRejected(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
