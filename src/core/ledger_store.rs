//! Locating and conditionally rewriting the Ledger comment.
//!
//! Writers never patch text in place. They describe a `LedgerDelta`, apply it
//! to the version they read, and commit against that version's ETag. On a
//! conflict the store re-reads, re-applies the same delta on the fresh body and
//! tries once more; a second conflict is surfaced as `ConcurrentEditConflict`.

use crate::core::assets::LEDGER_TEMPLATE;
use crate::core::config::DuplicateLedgerPolicy;
use crate::core::error::GateLedgerError;
use crate::core::host::{Comment, CommentApi, UpdateOutcome};
use crate::core::ledger::{AnchorCensus, Decision, Gate, Hop, LedgerDocument, anchor_census};

#[derive(Debug, Clone)]
pub struct LocatedLedger {
    pub comment_id: u64,
    pub etag: String,
    pub document: LedgerDocument,
    /// True when this call created the comment.
    pub created: bool,
}

/// The three partial updates one invocation makes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    pub gate: Option<Gate>,
    pub hop: Option<Hop>,
    pub decision: Option<Decision>,
}

impl LedgerDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn hop(mut self, hop: Hop) -> Self {
        self.hop = Some(hop);
        self
    }

    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn apply(&self, document: &LedgerDocument) -> LedgerDocument {
        let mut next = document.clone();
        if let Some(gate) = &self.gate {
            next = next.with_gate(gate.clone());
        }
        if let Some(hop) = &self.hop {
            next = next.with_hop(hop.clone());
        }
        if let Some(decision) = &self.decision {
            next = next.with_decision(decision.clone());
        }
        next
    }
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub comment_id: u64,
    pub etag: String,
    pub document: LedgerDocument,
    /// Conflicts absorbed before the write landed (0 or 1).
    pub conflicts: u32,
    /// False when the delta changed nothing and no write was issued.
    pub written: bool,
}

pub struct LedgerStore<'a, A: CommentApi + ?Sized> {
    api: &'a A,
    pr: u64,
    duplicates: DuplicateLedgerPolicy,
}

impl<'a, A: CommentApi + ?Sized> LedgerStore<'a, A> {
    pub fn new(api: &'a A, pr: u64, duplicates: DuplicateLedgerPolicy) -> Self {
        Self {
            api,
            pr,
            duplicates,
        }
    }

    /// Finds the Ledger comment without creating one.
    pub fn find(&self) -> Result<Option<LocatedLedger>, GateLedgerError> {
        let mut ledgers = Vec::new();
        for comment in self.api.list_comments(self.pr)? {
            match anchor_census(&comment.body) {
                AnchorCensus::Complete => ledgers.push(comment),
                AnchorCensus::Absent => {}
                AnchorCensus::Damaged(problem) => {
                    return Err(GateLedgerError::MalformedLedger(format!(
                        "comment {} on #{}: {}",
                        comment.id, self.pr, problem
                    )));
                }
            }
        }

        let chosen = match (ledgers.len(), self.duplicates) {
            (0, _) => return Ok(None),
            (1, _) | (_, DuplicateLedgerPolicy::Newest) => ledgers
                .into_iter()
                .max_by(|a, b| (&a.created_at, a.id).cmp(&(&b.created_at, b.id))),
            (count, DuplicateLedgerPolicy::Error) => {
                return Err(GateLedgerError::AmbiguousLedger { count });
            }
        };
        chosen.map(|c| located(c, false)).transpose()
    }

    /// Finds the Ledger comment, creating it from the template if absent.
    pub fn locate(&self) -> Result<LocatedLedger, GateLedgerError> {
        if let Some(found) = self.find()? {
            return Ok(found);
        }
        let comment = self.api.create_comment(self.pr, LEDGER_TEMPLATE)?;
        located(comment, true)
    }

    pub fn commit(
        &self,
        base: &LocatedLedger,
        delta: &LedgerDelta,
    ) -> Result<CommitReceipt, GateLedgerError> {
        let next = delta.apply(&base.document);
        let body = next.render();
        if body == base.document.render() {
            return Ok(CommitReceipt {
                comment_id: base.comment_id,
                etag: base.etag.clone(),
                document: next,
                conflicts: 0,
                written: false,
            });
        }

        match self
            .api
            .update_comment_if(self.pr, base.comment_id, &base.etag, &body)?
        {
            UpdateOutcome::Committed(comment) => Ok(receipt(comment, next, 0)),
            UpdateOutcome::Conflict => {
                let fresh = self.api.get_comment(self.pr, base.comment_id)?;
                let fresh_doc = LedgerDocument::parse(&fresh.body)?;
                let next = delta.apply(&fresh_doc);
                let body = next.render();
                match self
                    .api
                    .update_comment_if(self.pr, fresh.id, &fresh.etag, &body)?
                {
                    UpdateOutcome::Committed(comment) => Ok(receipt(comment, next, 1)),
                    UpdateOutcome::Conflict => Err(GateLedgerError::ConcurrentEditConflict {
                        comment_id: base.comment_id,
                    }),
                }
            }
        }
    }
}

fn located(comment: Comment, created: bool) -> Result<LocatedLedger, GateLedgerError> {
    let document = LedgerDocument::parse(&comment.body)?;
    Ok(LocatedLedger {
        comment_id: comment.id,
        etag: comment.etag,
        document,
        created,
    })
}

fn receipt(comment: Comment, document: LedgerDocument, conflicts: u32) -> CommitReceipt {
    CommitReceipt {
        comment_id: comment.id,
        etag: comment.etag,
        document,
        conflicts,
        written: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::DecisionState;
    use crate::core::routing::RoutingDecision;
    use crate::core::status::GateStatus;
    use crate::plugins::local::LocalHost;
    use std::cell::Cell;

    fn host() -> (tempfile::TempDir, LocalHost) {
        let tmp = tempfile::tempdir().unwrap();
        let host = LocalHost::open(&tmp.path().join("host.db")).unwrap();
        (tmp, host)
    }

    fn gate(name: &str, status: GateStatus) -> Gate {
        Gate::new(name, status, &format!("{}: exit: 0", name)).unwrap()
    }

    /// Lets another writer slip in before every conditional update.
    struct Interloper<'a> {
        inner: &'a LocalHost,
        remaining: Cell<u32>,
    }

    impl CommentApi for Interloper<'_> {
        fn list_comments(&self, pr: u64) -> Result<Vec<Comment>, GateLedgerError> {
            self.inner.list_comments(pr)
        }

        fn get_comment(&self, pr: u64, id: u64) -> Result<Comment, GateLedgerError> {
            self.inner.get_comment(pr, id)
        }

        fn create_comment(&self, pr: u64, body: &str) -> Result<Comment, GateLedgerError> {
            self.inner.create_comment(pr, body)
        }

        fn update_comment_if(
            &self,
            pr: u64,
            id: u64,
            expected_etag: &str,
            body: &str,
        ) -> Result<UpdateOutcome, GateLedgerError> {
            if self.remaining.get() > 0 {
                self.remaining.set(self.remaining.get() - 1);
                let current = self.inner.get_comment(pr, id)?;
                let doc = LedgerDocument::parse(&current.body)?;
                let n = self.remaining.get();
                let other = doc.with_hop(Hop::new("1700000000Z", "interloper", &format!("edit {}", n)));
                self.inner
                    .update_comment_if(pr, id, &current.etag, &other.render())?;
            }
            self.inner.update_comment_if(pr, id, expected_etag, body)
        }
    }

    #[test]
    fn test_locate_creates_once() {
        let (_tmp, host) = host();
        host.create_comment(5, "unrelated chatter").unwrap();
        let store = LedgerStore::new(&host, 5, DuplicateLedgerPolicy::Error);
        let first = store.locate().unwrap();
        assert!(first.created);
        assert_eq!(first.document.gates().count(), 0);
        assert_eq!(first.document.hop_count(), 0);
        assert_eq!(first.document.decision().state, DecisionState::InProgress);
        let second = store.locate().unwrap();
        assert!(!second.created);
        assert_eq!(second.comment_id, first.comment_id);
        assert_eq!(host.list_comments(5).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_ledgers_follow_policy() {
        let (_tmp, host) = host();
        host.create_comment(9, LEDGER_TEMPLATE).unwrap();
        let newer = host.create_comment(9, LEDGER_TEMPLATE).unwrap();
        let strict = LedgerStore::new(&host, 9, DuplicateLedgerPolicy::Error);
        assert!(matches!(
            strict.locate(),
            Err(GateLedgerError::AmbiguousLedger { count: 2 })
        ));
        let lenient = LedgerStore::new(&host, 9, DuplicateLedgerPolicy::Newest);
        assert_eq!(lenient.locate().unwrap().comment_id, newer.id);
        assert_eq!(host.list_comments(9).unwrap().len(), 2);
    }

    #[test]
    fn test_damaged_anchors_are_not_repaired() {
        let (_tmp, host) = host();
        host.create_comment(4, "<!-- gates:start --> half a ledger").unwrap();
        let store = LedgerStore::new(&host, 4, DuplicateLedgerPolicy::Error);
        assert!(matches!(
            store.locate(),
            Err(GateLedgerError::MalformedLedger(_))
        ));
        assert_eq!(host.list_comments(4).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_writes_delta() {
        let (_tmp, host) = host();
        let store = LedgerStore::new(&host, 1, DuplicateLedgerPolicy::Error);
        let base = store.locate().unwrap();
        let delta = LedgerDelta::new()
            .gate(gate("build", GateStatus::Pass))
            .hop(Hop::new("1700000000Z", "builder", "build green"))
            .decision(Decision::new(
                DecisionState::Ready,
                "build passed",
                Some(RoutingDecision::Finalize("tests-runner".into())),
            ));
        let receipt = store.commit(&base, &delta).unwrap();
        assert!(receipt.written);
        assert_eq!(receipt.conflicts, 0);
        let stored = host.get_comment(1, base.comment_id).unwrap();
        assert_eq!(stored.body, receipt.document.render());
        assert_eq!(stored.etag, receipt.etag);
    }

    #[test]
    fn test_noop_commit_skips_write() {
        let (_tmp, host) = host();
        let store = LedgerStore::new(&host, 1, DuplicateLedgerPolicy::Error);
        let base = store.locate().unwrap();
        let receipt = store.commit(&base, &LedgerDelta::new()).unwrap();
        assert!(!receipt.written);
        assert_eq!(receipt.etag, base.etag);
    }

    #[test]
    fn test_single_conflict_is_reapplied() {
        let (_tmp, host) = host();
        let base = LedgerStore::new(&host, 2, DuplicateLedgerPolicy::Error)
            .locate()
            .unwrap();
        let api = Interloper {
            inner: &host,
            remaining: Cell::new(1),
        };
        let store = LedgerStore::new(&api, 2, DuplicateLedgerPolicy::Error);
        let delta = LedgerDelta::new().gate(gate("tests", GateStatus::Fail));
        let receipt = store.commit(&base, &delta).unwrap();
        assert_eq!(receipt.conflicts, 1);

        let stored = LedgerDocument::parse(&host.get_comment(2, base.comment_id).unwrap().body).unwrap();
        assert_eq!(stored.gate("tests").unwrap().status, GateStatus::Fail);
        assert_eq!(stored.hops().next().unwrap().agent, "interloper");
    }

    #[test]
    fn test_second_conflict_is_fatal() {
        let (_tmp, host) = host();
        let base = LedgerStore::new(&host, 3, DuplicateLedgerPolicy::Error)
            .locate()
            .unwrap();
        let api = Interloper {
            inner: &host,
            remaining: Cell::new(2),
        };
        let store = LedgerStore::new(&api, 3, DuplicateLedgerPolicy::Error);
        let delta = LedgerDelta::new().gate(gate("tests", GateStatus::Pass));
        let err = store.commit(&base, &delta).unwrap_err();
        assert!(matches!(
            err,
            GateLedgerError::ConcurrentEditConflict { comment_id } if comment_id == base.comment_id
        ));
        let stored = LedgerDocument::parse(&host.get_comment(3, base.comment_id).unwrap().body).unwrap();
        assert!(stored.gate("tests").is_none());
    }
}
