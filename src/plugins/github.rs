//! GitHub backend over the `gh` CLI.
//!
//! All calls go through `gh api` with a non-interactive environment. JSON
//! payloads are handed over in temp files rather than argv. The REST comment
//! API has no conditional PATCH, so `update_comment_if` re-reads the comment,
//! compares body hashes, and only then patches.

use crate::core::check_run::CheckRun;
use crate::core::error::GateLedgerError;
use crate::core::host::{
    CheckRunApi, CheckRunReceipt, Comment, CommentApi, LabelApi, UpdateOutcome, body_etag,
};
use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Output};

/// `gh` pre-configured so it never prompts or decorates output.
fn gh_command() -> Command {
    let mut command = Command::new("gh");
    command
        .env("GH_NO_UPDATE_NOTIFIER", "1")
        .env("GH_PROMPT_DISABLED", "1")
        .env("NO_COLOR", "1");
    command
}

#[derive(Debug, Deserialize)]
struct IssueCommentResponse {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    created_at: String,
}

impl From<IssueCommentResponse> for Comment {
    fn from(r: IssueCommentResponse) -> Self {
        Comment::new(r.id, r.body.as_deref().unwrap_or_default(), &r.created_at)
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    id: u64,
    name: String,
}

#[derive(Debug, Clone)]
pub struct GitHubHost {
    owner_repo: String,
}

impl GitHubHost {
    pub fn new(owner_repo: &str) -> Result<Self, GateLedgerError> {
        match owner_repo.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self {
                    owner_repo: owner_repo.to_string(),
                })
            }
            _ => Err(GateLedgerError::Config(format!(
                "repo '{}' is not in owner/name form",
                owner_repo
            ))),
        }
    }

    fn api(&self, args: &[&str], what: &str) -> Result<Output, GateLedgerError> {
        let output = gh_command()
            .arg("api")
            .args(args)
            .output()
            .map_err(|e| GateLedgerError::Infrastructure(format!("failed to execute gh api for {}: {}", what, e)))?;
        Ok(output)
    }

    fn api_ok(&self, args: &[&str], what: &str) -> Result<Vec<u8>, GateLedgerError> {
        let output = self.api(args, what)?;
        if !output.status.success() {
            return Err(GateLedgerError::Infrastructure(format!(
                "gh api failed {}: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Sends `payload` as the request body of `method endpoint`.
    fn api_with_payload(
        &self,
        method: &str,
        endpoint: &str,
        payload: &serde_json::Value,
        what: &str,
    ) -> Result<Vec<u8>, GateLedgerError> {
        let mut payload_file = tempfile::NamedTempFile::new()?;
        payload_file.write_all(serde_json::to_string(payload)?.as_bytes())?;
        payload_file.flush()?;
        let input = payload_file.path().display().to_string();
        self.api_ok(&[endpoint, "--method", method, "--input", &input], what)
    }
}

impl CommentApi for GitHubHost {
    fn list_comments(&self, pr: u64) -> Result<Vec<Comment>, GateLedgerError> {
        let endpoint = format!("/repos/{}/issues/{}/comments?per_page=100", self.owner_repo, pr);
        let stdout = self.api_ok(
            &["--paginate", &endpoint, "--jq", ".[] | {id, body, created_at}"],
            "listing issue comments",
        )?;
        parse_json_lines::<IssueCommentResponse>(&stdout)
            .map(|items| items.into_iter().map(Comment::from).collect())
    }

    fn get_comment(&self, pr: u64, id: u64) -> Result<Comment, GateLedgerError> {
        let endpoint = format!("/repos/{}/issues/comments/{}", self.owner_repo, id);
        let output = self.api(&[&endpoint, "--method", "GET"], "fetching issue comment")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let normalized = stderr.to_ascii_lowercase();
            if normalized.contains("404") || normalized.contains("not found") {
                return Err(GateLedgerError::NotFound(format!("comment {} on #{}", id, pr)));
            }
            return Err(GateLedgerError::Infrastructure(format!(
                "gh api failed fetching issue comment {}: {}",
                id, stderr
            )));
        }
        let response: IssueCommentResponse = serde_json::from_slice(&output.stdout)?;
        Ok(response.into())
    }

    fn create_comment(&self, pr: u64, body: &str) -> Result<Comment, GateLedgerError> {
        let endpoint = format!("/repos/{}/issues/{}/comments", self.owner_repo, pr);
        let stdout = self.api_with_payload(
            "POST",
            &endpoint,
            &serde_json::json!({ "body": body }),
            "creating issue comment",
        )?;
        let response: IssueCommentResponse = serde_json::from_slice(&stdout)?;
        Ok(response.into())
    }

    fn update_comment_if(
        &self,
        pr: u64,
        id: u64,
        expected_etag: &str,
        body: &str,
    ) -> Result<UpdateOutcome, GateLedgerError> {
        let current = self.get_comment(pr, id)?;
        if body_etag(&current.body) != expected_etag {
            return Ok(UpdateOutcome::Conflict);
        }
        let endpoint = format!("/repos/{}/issues/comments/{}", self.owner_repo, id);
        let stdout = self.api_with_payload(
            "PATCH",
            &endpoint,
            &serde_json::json!({ "body": body }),
            "patching issue comment",
        )?;
        let response: IssueCommentResponse = serde_json::from_slice(&stdout)?;
        Ok(UpdateOutcome::Committed(response.into()))
    }
}

impl CheckRunApi for GitHubHost {
    fn create_check_run(&self, run: &CheckRun) -> Result<CheckRunReceipt, GateLedgerError> {
        let endpoint = format!("/repos/{}/check-runs", self.owner_repo);
        let stdout = self
            .api_with_payload("POST", &endpoint, &run.to_payload(), "creating check run")
            .map_err(|e| GateLedgerError::CheckRunRejected(e.to_string()))?;
        let response: CheckRunResponse = serde_json::from_slice(&stdout)?;
        Ok(CheckRunReceipt {
            id: response.id,
            name: response.name,
        })
    }
}

impl LabelApi for GitHubHost {
    fn list_labels(&self, pr: u64) -> Result<Vec<String>, GateLedgerError> {
        let endpoint = format!("/repos/{}/issues/{}/labels?per_page=100", self.owner_repo, pr);
        let stdout = self.api_ok(&["--paginate", &endpoint, "--jq", ".[].name"], "listing labels")?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn apply_labels(&self, pr: u64, add: &[String], remove: &[String]) -> Result<(), GateLedgerError> {
        for name in remove {
            let endpoint = format!(
                "/repos/{}/issues/{}/labels/{}",
                self.owner_repo,
                pr,
                encode_path_segment(name)
            );
            let output = self.api(&[&endpoint, "--method", "DELETE"], "removing label")?;
            let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
            // Already gone is fine.
            if !output.status.success() && !stderr.contains("404") {
                return Err(GateLedgerError::Infrastructure(format!(
                    "gh api failed removing label '{}': {}",
                    name,
                    stderr.trim()
                )));
            }
        }
        if !add.is_empty() {
            let endpoint = format!("/repos/{}/issues/{}/labels", self.owner_repo, pr);
            self.api_with_payload(
                "POST",
                &endpoint,
                &serde_json::json!({ "labels": add }),
                "adding labels",
            )?;
        }
        Ok(())
    }
}

fn parse_json_lines<T: for<'de> Deserialize<'de>>(stdout: &[u8]) -> Result<Vec<T>, GateLedgerError> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(GateLedgerError::from))
        .collect()
}

fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_must_be_owner_slash_name() {
        assert!(GitHubHost::new("acme/widgets").is_ok());
        assert!(GitHubHost::new("acme").is_err());
        assert!(GitHubHost::new("acme/").is_err());
        assert!(GitHubHost::new("a/b/c").is_err());
    }

    #[test]
    fn test_parse_comment_lines() {
        let out = br#"{"id":11,"body":"hello","created_at":"2024-01-01T00:00:00Z"}
{"id":12,"body":null,"created_at":"2024-01-02T00:00:00Z"}
"#;
        let parsed: Vec<Comment> = parse_json_lines::<IssueCommentResponse>(out)
            .unwrap()
            .into_iter()
            .map(Comment::from)
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].etag, body_etag("hello"));
        assert_eq!(parsed[1].body, "");
    }

    #[test]
    fn test_label_names_are_path_encoded() {
        assert_eq!(encode_path_segment("state:needs-rework"), "state%3Aneeds-rework");
        assert_eq!(encode_path_segment("a b"), "a%20b");
    }
}
