//! SQLite-backed code host for offline runs.
//!
//! Each call opens its own connection, so two `LocalHost` values on the same
//! file behave like two independent API clients. Conditional comment updates
//! are a single `UPDATE ... WHERE etag = ?`, which SQLite serializes.

use crate::core::check_run::CheckRun;
use crate::core::db;
use crate::core::error::GateLedgerError;
use crate::core::host::{
    CheckRunApi, CheckRunReceipt, Comment, CommentApi, LabelApi, UpdateOutcome, body_etag,
};
use crate::core::status::CheckConclusion;
use crate::core::time::now_epoch_z;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalHost {
    db_path: PathBuf,
}

impl LocalHost {
    pub fn open(db_path: &Path) -> Result<Self, GateLedgerError> {
        db::initialize_host_db(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection, GateLedgerError> {
        db::db_connect(&self.db_path)
    }

    /// Check runs recorded for a head SHA, oldest first.
    pub fn check_runs(&self, head_sha: &str) -> Result<Vec<CheckRun>, GateLedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, head_sha, status, conclusion, title, summary
             FROM check_runs WHERE head_sha = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![head_sha], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut runs = Vec::new();
        for row in rows {
            let (name, head_sha, status, conclusion, title, summary) = row?;
            let conclusion = CheckConclusion::parse(&conclusion).ok_or_else(|| {
                GateLedgerError::ValidationError(format!(
                    "stored check run '{}' has unknown conclusion '{}'",
                    name, conclusion
                ))
            })?;
            runs.push(CheckRun {
                name,
                head_sha,
                status,
                conclusion,
                title,
                summary,
            });
        }
        Ok(runs)
    }
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get::<_, i64>(0)? as u64,
        body: row.get(1)?,
        created_at: row.get(2)?,
        etag: row.get(3)?,
    })
}

impl CommentApi for LocalHost {
    fn list_comments(&self, pr: u64) -> Result<Vec<Comment>, GateLedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, body, created_at, etag FROM comments WHERE pr = ?1 ORDER BY id",
        )?;
        let comments = stmt
            .query_map(params![pr as i64], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn get_comment(&self, pr: u64, id: u64) -> Result<Comment, GateLedgerError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, body, created_at, etag FROM comments WHERE pr = ?1 AND id = ?2",
            params![pr as i64, id as i64],
            comment_from_row,
        )
        .optional()?
        .ok_or_else(|| GateLedgerError::NotFound(format!("comment {} on #{}", id, pr)))
    }

    fn create_comment(&self, pr: u64, body: &str) -> Result<Comment, GateLedgerError> {
        let conn = self.conn()?;
        let ts = now_epoch_z();
        conn.execute(
            "INSERT INTO comments (pr, body, etag, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![pr as i64, body, body_etag(body), ts],
        )?;
        let id = conn.last_insert_rowid() as u64;
        Ok(Comment::new(id, body, &ts))
    }

    fn update_comment_if(
        &self,
        pr: u64,
        id: u64,
        expected_etag: &str,
        body: &str,
    ) -> Result<UpdateOutcome, GateLedgerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE comments SET body = ?1, etag = ?2, updated_at = ?3
             WHERE pr = ?4 AND id = ?5 AND etag = ?6",
            params![
                body,
                body_etag(body),
                now_epoch_z(),
                pr as i64,
                id as i64,
                expected_etag
            ],
        )?;
        if changed == 1 {
            return Ok(UpdateOutcome::Committed(self.get_comment(pr, id)?));
        }
        // Distinguish a lost race from a comment that is gone.
        self.get_comment(pr, id)?;
        Ok(UpdateOutcome::Conflict)
    }
}

impl CheckRunApi for LocalHost {
    fn create_check_run(&self, run: &CheckRun) -> Result<CheckRunReceipt, GateLedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO check_runs (name, head_sha, status, conclusion, title, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.name,
                run.head_sha,
                run.status,
                run.conclusion.as_str(),
                run.title,
                run.summary,
                now_epoch_z()
            ],
        )?;
        Ok(CheckRunReceipt {
            id: conn.last_insert_rowid() as u64,
            name: run.name.clone(),
        })
    }
}

impl LabelApi for LocalHost {
    fn list_labels(&self, pr: u64) -> Result<Vec<String>, GateLedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM labels WHERE pr = ?1 ORDER BY name")?;
        let labels = stmt
            .query_map(params![pr as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn apply_labels(&self, pr: u64, add: &[String], remove: &[String]) -> Result<(), GateLedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for name in remove {
            tx.execute(
                "DELETE FROM labels WHERE pr = ?1 AND name = ?2",
                params![pr as i64, name],
            )?;
        }
        for name in add {
            tx.execute(
                "INSERT OR IGNORE INTO labels (pr, name) VALUES (?1, ?2)",
                params![pr as i64, name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::GateStatus;

    fn host() -> (tempfile::TempDir, LocalHost) {
        let tmp = tempfile::tempdir().unwrap();
        let host = LocalHost::open(&tmp.path().join("host.db")).unwrap();
        (tmp, host)
    }

    #[test]
    fn test_comments_are_scoped_by_pr() {
        let (_tmp, host) = host();
        let a = host.create_comment(1, "first").unwrap();
        host.create_comment(2, "other pr").unwrap();
        let listed = host.list_comments(1).unwrap();
        assert_eq!(listed, vec![a.clone()]);
        assert_eq!(host.get_comment(1, a.id).unwrap().body, "first");
        assert!(matches!(
            host.get_comment(2, a.id),
            Err(GateLedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_conditional_update_detects_stale_etag() {
        let (_tmp, host) = host();
        let c = host.create_comment(7, "v1").unwrap();
        let committed = host.update_comment_if(7, c.id, &c.etag, "v2").unwrap();
        let UpdateOutcome::Committed(v2) = committed else {
            panic!("expected commit");
        };
        assert_eq!(v2.etag, body_etag("v2"));
        assert_eq!(
            host.update_comment_if(7, c.id, &c.etag, "v3").unwrap(),
            UpdateOutcome::Conflict
        );
        assert_eq!(host.get_comment(7, c.id).unwrap().body, "v2");
        assert!(host.update_comment_if(7, 999, &c.etag, "x").is_err());
    }

    #[test]
    fn test_check_runs_append() {
        let (_tmp, host) = host();
        let run = CheckRun::completed("f", "g", "sha1", &GateStatus::Pass, "ok");
        let a = host.create_check_run(&run).unwrap();
        let b = host.create_check_run(&run).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(host.check_runs("sha1").unwrap().len(), 2);
        assert!(host.check_runs("sha2").unwrap().is_empty());
    }

    #[test]
    fn test_labels_add_and_remove() {
        let (_tmp, host) = host();
        host.apply_labels(3, &["flow:gen".into(), "keep".into()], &[])
            .unwrap();
        host.apply_labels(3, &["state:ready".into()], &["flow:gen".into()])
            .unwrap();
        assert_eq!(host.list_labels(3).unwrap(), vec!["keep", "state:ready"]);
    }
}
