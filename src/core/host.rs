//! Seams to the code host: comments, check runs, labels.
//!
//! Every backend speaks in whole comment bodies. Concurrency control is an
//! ETag derived from the body (`sha256:<hex>`), so a backend that cannot hand
//! out version tokens can still answer "has this changed since I read it".

use crate::core::check_run::CheckRun;
use crate::core::error::GateLedgerError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    /// Sortable creation stamp (RFC 3339 or `<secs>Z`).
    pub created_at: String,
    pub etag: String,
}

impl Comment {
    pub fn new(id: u64, body: &str, created_at: &str) -> Self {
        Self {
            id,
            body: body.to_string(),
            created_at: created_at.to_string(),
            etag: body_etag(body),
        }
    }
}

pub fn body_etag(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Committed(Comment),
    /// The stored body no longer matches the expected ETag.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunReceipt {
    pub id: u64,
    pub name: String,
}

pub trait CommentApi {
    fn list_comments(&self, pr: u64) -> Result<Vec<Comment>, GateLedgerError>;
    fn get_comment(&self, pr: u64, id: u64) -> Result<Comment, GateLedgerError>;
    fn create_comment(&self, pr: u64, body: &str) -> Result<Comment, GateLedgerError>;
    /// Replaces the body only if the stored body still hashes to `expected_etag`.
    fn update_comment_if(
        &self,
        pr: u64,
        id: u64,
        expected_etag: &str,
        body: &str,
    ) -> Result<UpdateOutcome, GateLedgerError>;
}

pub trait CheckRunApi {
    fn create_check_run(&self, run: &CheckRun) -> Result<CheckRunReceipt, GateLedgerError>;
}

pub trait LabelApi {
    fn list_labels(&self, pr: u64) -> Result<Vec<String>, GateLedgerError>;
    fn apply_labels(&self, pr: u64, add: &[String], remove: &[String]) -> Result<(), GateLedgerError>;
}

/// Everything an orchestrated run needs from a backend.
pub trait Host: CommentApi + CheckRunApi + LabelApi {}

impl<T: CommentApi + CheckRunApi + LabelApi> Host for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_tracks_body_bytes() {
        let a = body_etag("ledger");
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
        assert_eq!(a, body_etag("ledger"));
        assert_ne!(a, body_etag("ledger "));
    }
}
