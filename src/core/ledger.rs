//! The Ledger document: one shared markdown comment per change request.
//!
//! The comment carries three anchored regions (Gates table, Hoplog, Decision
//! block). Parsing records the byte span between each anchor pair; rendering
//! splices new inner text back into those spans and copies every other byte of
//! the host comment through untouched. Within a region, rows that were not
//! changed are emitted from their original text, so `render(parse(body))`
//! reproduces `body` exactly.
//!
//! Documents are values: `with_gate`, `with_hop` and `with_decision` return a
//! new document and never mutate the receiver.

use crate::core::error::GateLedgerError;
use crate::core::routing::RoutingDecision;
use crate::core::status::GateStatus;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

pub const GATES_START: &str = "<!-- gates:start -->";
pub const GATES_END: &str = "<!-- gates:end -->";
pub const HOPLOG_START: &str = "<!-- hoplog:start -->";
pub const HOPLOG_END: &str = "<!-- hoplog:end -->";
pub const DECISION_START: &str = "<!-- decision:start -->";
pub const DECISION_END: &str = "<!-- decision:end -->";

pub const MAX_WHY_LINES: usize = 3;

const GATES_HEADER: &str = "| Gate | Status | Evidence |\n";
const GATES_SEPARATOR: &str = "|------|--------|----------|\n";

/// Agent, flow and gate names: the charset the Hoplog route tag can carry.
pub fn is_name_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

static HOP_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*- (\S+) ([^\s:]+): (.*?)\s*$").ok());

static HOP_ROUTE_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[route=((?:finalize|next):[^\s\]]+) gate=([^\s\]]+)\]").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Gates,
    Hoplog,
    Decision,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Gates, Section::Hoplog, Section::Decision];

    pub fn anchors(self) -> (&'static str, &'static str) {
        match self {
            Section::Gates => (GATES_START, GATES_END),
            Section::Hoplog => (HOPLOG_START, HOPLOG_END),
            Section::Decision => (DECISION_START, DECISION_END),
        }
    }
}

// ===== Entries =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub name: String,
    pub status: GateStatus,
    pub evidence: String,
}

impl Gate {
    pub fn new(name: &str, status: GateStatus, evidence: &str) -> Result<Self, GateLedgerError> {
        let name = name.trim();
        if !is_name_token(name) {
            return Err(GateLedgerError::ValidationError(format!(
                "gate name '{}' must be a non-empty token of [A-Za-z0-9._-]",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            status,
            evidence: evidence.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }

    fn render_row(&self) -> String {
        format!(
            "| {} | {} | {} |\n",
            self.name,
            self.status,
            escape_cell(&self.evidence)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub timestamp: String,
    pub agent: String,
    pub summary: String,
}

/// Routing tag embedded in a hop summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopRoute {
    pub decision: RoutingDecision,
    pub gate: String,
}

impl Hop {
    pub fn new(timestamp: &str, agent: &str, summary: &str) -> Self {
        Self {
            timestamp: timestamp.split_whitespace().collect::<Vec<_>>().join("_"),
            agent: Self::agent_key(agent),
            summary: summary.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// The form an agent name takes in a hop line.
    pub fn agent_key(agent: &str) -> String {
        agent
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .replace(':', "-")
    }

    /// A hop whose summary ends with a `[route=<tag> gate=<gate>]` trailer.
    pub fn tagged(
        timestamp: &str,
        agent: &str,
        summary: &str,
        gate: &str,
        decision: &RoutingDecision,
    ) -> Self {
        let summary = format!("{} [route={} gate={}]", summary.trim(), decision.tag(), gate);
        Self::new(timestamp, agent, &summary)
    }

    pub fn route_tag(&self) -> Option<HopRoute> {
        let caps = HOP_ROUTE_TAG.as_ref()?.captures(&self.summary)?;
        Some(HopRoute {
            decision: RoutingDecision::parse_tag(&caps[1])?,
            gate: caps[2].to_string(),
        })
    }

    fn render_line(&self) -> String {
        format!("- {} {}: {}\n", self.timestamp, self.agent, self.summary)
    }

    fn parse_line(line: &str) -> Self {
        let parsed = HOP_LINE.as_ref().and_then(|re| re.captures(line));
        match parsed {
            Some(caps) => Self {
                timestamp: caps[1].to_string(),
                agent: caps[2].to_string(),
                summary: caps[3].to_string(),
            },
            None => Self {
                timestamp: String::new(),
                agent: String::new(),
                summary: line.trim().trim_start_matches('-').trim().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionState {
    Ready,
    NeedsRework,
    InProgress,
}

impl DecisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::NeedsRework => "needs-rework",
            Self::InProgress => "in-progress",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "ready" => Some(Self::Ready),
            "needs-rework" => Some(Self::NeedsRework),
            "in-progress" => Some(Self::InProgress),
            _ => None,
        }
    }

    /// Ledger state implied by a routing decision.
    pub fn for_route(decision: &RoutingDecision) -> Self {
        match decision {
            RoutingDecision::Finalize(_) => Self::Ready,
            RoutingDecision::Next(_) if decision.is_self_retry() => Self::InProgress,
            RoutingDecision::Next(_) => Self::NeedsRework,
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub state: DecisionState,
    /// At most three lines joined by `\n`.
    pub why: String,
    /// `None` only for a freshly created ledger that has not routed yet.
    pub next: Option<RoutingDecision>,
}

impl Decision {
    pub fn new(state: DecisionState, why: &str, next: Option<RoutingDecision>) -> Self {
        let why = why
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .take(MAX_WHY_LINES)
            .collect::<Vec<_>>()
            .join("\n");
        Self { state, why, next }
    }

    pub fn initial() -> Self {
        Self::new(
            DecisionState::InProgress,
            "Ledger created; no gates recorded yet.",
            None,
        )
    }

    fn render_block(&self) -> String {
        let next = self
            .next
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "pending".to_string());
        format!(
            "\n**State:** {}\n**Why:** {}\n**Next:** {}\n",
            self.state, self.why, next
        )
    }

    fn parse_block(inner: &str) -> Result<Self, GateLedgerError> {
        let mut state = None;
        let mut why_lines: Vec<String> = Vec::new();
        let mut next = None;
        let mut in_why = false;
        for line in inner.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("**State:**") {
                in_why = false;
                state = Some(DecisionState::parse(rest).ok_or_else(|| {
                    GateLedgerError::MalformedLedger(format!(
                        "decision state '{}' is not ready|needs-rework|in-progress",
                        rest.trim()
                    ))
                })?);
            } else if let Some(rest) = line.strip_prefix("**Why:**") {
                in_why = true;
                why_lines.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("**Next:**") {
                in_why = false;
                let rest = rest.trim();
                next = match rest {
                    "" | "pending" => None,
                    other => Some(RoutingDecision::parse_display(other).ok_or_else(|| {
                        GateLedgerError::MalformedLedger(format!(
                            "decision next '{}' is not FINALIZE → <agent> or NEXT → <agent>",
                            other
                        ))
                    })?),
                };
            } else if in_why && !line.is_empty() {
                why_lines.push(line.to_string());
            }
        }
        let state = state.ok_or_else(|| {
            GateLedgerError::MalformedLedger("decision block lacks a **State:** line".to_string())
        })?;
        Ok(Self::new(state, &why_lines.join("\n"), next))
    }
}

// ===== Section rows =====

/// One line of a section: either carried through verbatim, or a parsed
/// entry. `raw` holds the original text of an unchanged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Row<T> {
    Verbatim(String),
    Entry { value: T, raw: Option<String> },
}

impl<T> Row<T> {
    fn entry(&self) -> Option<&T> {
        match self {
            Row::Entry { value, .. } => Some(value),
            Row::Verbatim(_) => None,
        }
    }

    fn text_ends_with_newline(&self) -> bool {
        match self {
            Row::Verbatim(text) | Row::Entry { raw: Some(text), .. } => text.ends_with('\n'),
            Row::Entry { raw: None, .. } => true,
        }
    }

    fn terminate_line(&mut self) {
        match self {
            Row::Verbatim(text) | Row::Entry { raw: Some(text), .. } => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Row::Entry { raw: None, .. } => {}
        }
    }
}

fn render_rows<T>(rows: &[Row<T>], render: impl Fn(&T) -> String) -> String {
    let mut out = String::new();
    for row in rows {
        match row {
            Row::Verbatim(text) | Row::Entry { raw: Some(text), .. } => out.push_str(text),
            Row::Entry { value, raw: None } => out.push_str(&render(value)),
        }
    }
    out
}

/// Inserts `row` at `at`, making sure the previous line is terminated.
fn insert_row<T>(rows: &mut Vec<Row<T>>, at: usize, row: Row<T>) {
    if at == 0 {
        rows.insert(0, row);
        return;
    }
    if !rows[at - 1].text_ends_with_newline() {
        rows[at - 1].terminate_line();
    }
    rows.insert(at, row);
}

fn escape_cell(text: &str) -> String {
    text.replace('\\', "\\\\").replace('|', "\\|")
}

/// Inverse of `escape_cell`; a backslash before any other character is literal.
fn unescape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == '|' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

/// Splits a markdown table row on unescaped pipes.
fn split_table_row(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|')?;
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '|' => cells.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    cells.push(current);
    Some(cells.into_iter().map(|c| c.trim().to_string()).collect())
}

fn is_separator_row(cells: &[String]) -> bool {
    cells.iter().all(|cell| {
        let core = cell.trim_matches(':');
        !core.is_empty() && core.chars().all(|c| c == '-')
    })
}

fn is_header_row(cells: &[String]) -> bool {
    cells.len() == 3
        && cells[0].eq_ignore_ascii_case("gate")
        && cells[1].eq_ignore_ascii_case("status")
}

fn parse_gate_rows(inner: &str) -> Result<Vec<Row<Gate>>, GateLedgerError> {
    let mut rows = Vec::new();
    for line in inner.split_inclusive('\n') {
        let Some(cells) = split_table_row(line) else {
            rows.push(Row::Verbatim(line.to_string()));
            continue;
        };
        if is_separator_row(&cells) || is_header_row(&cells) {
            rows.push(Row::Verbatim(line.to_string()));
            continue;
        }
        if cells.len() != 3 {
            return Err(GateLedgerError::MalformedLedger(format!(
                "gates row has {} cells, expected 3: {}",
                cells.len(),
                line.trim()
            )));
        }
        let status = GateStatus::parse_cell(&cells[1])?;
        let gate = Gate::new(&cells[0], status, &unescape_cell(&cells[2]))
            .map_err(|e| GateLedgerError::MalformedLedger(e.to_string()))?;
        rows.push(Row::Entry {
            value: gate,
            raw: Some(line.to_string()),
        });
    }
    Ok(rows)
}

fn parse_hop_rows(inner: &str) -> Vec<Row<Hop>> {
    inner
        .split_inclusive('\n')
        .map(|line| {
            if line.trim_start().starts_with("- ") {
                Row::Entry {
                    value: Hop::parse_line(line),
                    raw: Some(line.to_string()),
                }
            } else {
                Row::Verbatim(line.to_string())
            }
        })
        .collect()
}

// ===== Anchors =====

/// How many complete anchor sets a comment body carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorCensus {
    /// All three pairs, each exactly once and correctly ordered.
    Complete,
    /// No anchors at all; not a ledger.
    Absent,
    /// Some anchors missing, duplicated or out of order.
    Damaged(String),
}

pub fn anchor_census(body: &str) -> AnchorCensus {
    let mut seen = 0usize;
    let mut problems = Vec::new();
    for section in Section::ALL {
        let (start, end) = section.anchors();
        let starts = body.matches(start).count();
        let ends = body.matches(end).count();
        seen += starts + ends;
        if starts != 1 || ends != 1 {
            problems.push(format!(
                "{:?}: {} start / {} end anchors",
                section, starts, ends
            ));
        } else if body.find(start) > body.find(end) {
            problems.push(format!("{:?}: end anchor precedes start anchor", section));
        }
    }
    if seen == 0 {
        AnchorCensus::Absent
    } else if problems.is_empty() {
        AnchorCensus::Complete
    } else {
        AnchorCensus::Damaged(problems.join("; "))
    }
}

fn inner_span(body: &str, section: Section) -> Result<Range<usize>, GateLedgerError> {
    let (start, end) = section.anchors();
    let open = body.find(start).ok_or_else(|| {
        GateLedgerError::MalformedLedger(format!("missing anchor {}", start))
    })?;
    let close = body
        .find(end)
        .ok_or_else(|| GateLedgerError::MalformedLedger(format!("missing anchor {}", end)))?;
    let inner_start = open + start.len();
    if close < inner_start {
        return Err(GateLedgerError::MalformedLedger(format!(
            "{} appears before {}",
            end, start
        )));
    }
    Ok(inner_start..close)
}

// ===== Document =====

#[derive(Debug, Clone)]
pub struct LedgerDocument {
    body: String,
    spans: [(Section, Range<usize>); 3],
    gates: Vec<Row<Gate>>,
    gate_index: FxHashMap<String, usize>,
    hops: Vec<Row<Hop>>,
    decision: Decision,
    /// Original decision inner text while the block is unchanged.
    decision_raw: Option<String>,
}

impl LedgerDocument {
    pub fn parse(body: &str) -> Result<Self, GateLedgerError> {
        if let AnchorCensus::Damaged(problem) = anchor_census(body) {
            return Err(GateLedgerError::MalformedLedger(problem));
        }
        let mut spans = [
            (Section::Gates, inner_span(body, Section::Gates)?),
            (Section::Hoplog, inner_span(body, Section::Hoplog)?),
            (Section::Decision, inner_span(body, Section::Decision)?),
        ];
        spans.sort_by_key(|(_, span)| span.start);
        for pair in spans.windows(2) {
            if pair[0].1.end > pair[1].1.start {
                return Err(GateLedgerError::MalformedLedger(format!(
                    "{:?} and {:?} regions overlap",
                    pair[0].0, pair[1].0
                )));
            }
        }

        let span_of = |section: Section| {
            spans
                .iter()
                .find(|(s, _)| *s == section)
                .map(|(_, span)| span.clone())
                .unwrap_or(0..0)
        };
        let gates = parse_gate_rows(&body[span_of(Section::Gates)])?;
        let hops = parse_hop_rows(&body[span_of(Section::Hoplog)]);
        let decision_inner = &body[span_of(Section::Decision)];
        let decision = Decision::parse_block(decision_inner)?;

        let gate_index = build_gate_index(&gates)?;
        Ok(Self {
            body: body.to_string(),
            spans,
            gates,
            gate_index,
            hops,
            decision,
            decision_raw: Some(decision_inner.to_string()),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 256);
        let mut cursor = 0;
        for (section, span) in &self.spans {
            out.push_str(&self.body[cursor..span.start]);
            out.push_str(&self.render_section(*section));
            cursor = span.end;
        }
        out.push_str(&self.body[cursor..]);
        out
    }

    fn render_section(&self, section: Section) -> String {
        match section {
            Section::Gates => render_rows(&self.gates, Gate::render_row),
            Section::Hoplog => render_rows(&self.hops, Hop::render_line),
            Section::Decision => match &self.decision_raw {
                Some(raw) => raw.clone(),
                None => self.decision.render_block(),
            },
        }
    }

    /// Byte offsets of each region's inner text in the host body.
    pub fn spans(&self) -> &[(Section, Range<usize>)] {
        &self.spans
    }

    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.gates.iter().filter_map(Row::entry)
    }

    pub fn gate(&self, name: &str) -> Option<&Gate> {
        self.gate_index
            .get(name)
            .and_then(|&idx| self.gates.get(idx))
            .and_then(Row::entry)
    }

    pub fn hops(&self) -> impl DoubleEndedIterator<Item = &Hop> {
        self.hops.iter().filter_map(Row::entry)
    }

    pub fn hop_count(&self) -> usize {
        self.hops().count()
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Upserts a gate row; unchanged rows keep their position and bytes.
    pub fn with_gate(&self, gate: Gate) -> Self {
        let mut next = self.clone();
        match self.gate_index.get(&gate.name) {
            Some(&idx) => {
                if next.gates[idx].entry() == Some(&gate) {
                    return next;
                }
                next.gates[idx] = Row::Entry {
                    value: gate,
                    raw: None,
                };
            }
            None => {
                let at = next.gate_insert_position();
                insert_row(
                    &mut next.gates,
                    at,
                    Row::Entry {
                        value: gate,
                        raw: None,
                    },
                );
                next.reindex_gates();
            }
        }
        next
    }

    /// Appends to the Hoplog; earlier entries stay byte-identical.
    pub fn with_hop(&self, hop: Hop) -> Self {
        let mut next = self.clone();
        let at = match next.hops.iter().rposition(|row| row.entry().is_some()) {
            Some(idx) => idx + 1,
            None => {
                if next.hops.is_empty() {
                    next.hops.push(Row::Verbatim("\n".to_string()));
                }
                trailing_content_end(&next.hops)
            }
        };
        insert_row(&mut next.hops, at, Row::Entry { value: hop, raw: None });
        next
    }

    /// Replaces the Decision block wholesale.
    pub fn with_decision(&self, decision: Decision) -> Self {
        let mut next = self.clone();
        if next.decision == decision {
            return next;
        }
        next.decision = decision;
        next.decision_raw = None;
        next
    }

    fn gate_insert_position(&mut self) -> usize {
        if let Some(idx) = self.gates.iter().rposition(|row| row.entry().is_some()) {
            return idx + 1;
        }
        if let Some(idx) = self.gates.iter().rposition(|row| match row {
            Row::Verbatim(text) => text.trim_start().starts_with('|'),
            Row::Entry { .. } => false,
        }) {
            return idx + 1;
        }
        // No table yet: lay down the header first.
        let mut at = trailing_content_end(&self.gates);
        if at == 0 {
            self.gates.insert(0, Row::Verbatim("\n".to_string()));
            at = 1;
        }
        insert_row(&mut self.gates, at, Row::Verbatim(GATES_HEADER.to_string()));
        insert_row(
            &mut self.gates,
            at + 1,
            Row::Verbatim(GATES_SEPARATOR.to_string()),
        );
        at + 2
    }

    fn reindex_gates(&mut self) {
        self.gate_index = self
            .gates
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row.entry().map(|g| (g.name.clone(), idx)))
            .collect();
    }
}

/// Index just past the last row with visible content.
fn trailing_content_end<T>(rows: &[Row<T>]) -> usize {
    rows.iter()
        .rposition(|row| match row {
            Row::Verbatim(text) => !text.trim().is_empty(),
            Row::Entry { .. } => true,
        })
        .map(|idx| idx + 1)
        .unwrap_or(rows.len().min(1))
}

fn build_gate_index(rows: &[Row<Gate>]) -> Result<FxHashMap<String, usize>, GateLedgerError> {
    let mut index = FxHashMap::default();
    for (idx, row) in rows.iter().enumerate() {
        if let Some(gate) = row.entry() {
            if index.insert(gate.name.clone(), idx).is_some() {
                return Err(GateLedgerError::MalformedLedger(format!(
                    "gate '{}' appears more than once in the Gates table",
                    gate.name
                )));
            }
        }
    }
    Ok(index)
}

impl PartialEq for LedgerDocument {
    fn eq(&self, other: &Self) -> bool {
        self.render() == other.render()
    }
}

impl Eq for LedgerDocument {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assets;

    fn template() -> LedgerDocument {
        LedgerDocument::parse(assets::LEDGER_TEMPLATE).unwrap()
    }

    fn gate(name: &str, status: GateStatus, evidence: &str) -> Gate {
        Gate::new(name, status, evidence).unwrap()
    }

    const SAMPLE: &str = "Intro text kept verbatim.\n\n\
<!-- gates:start -->\n\
| Gate | Status | Evidence |\n\
|------|--------|----------|\n\
| build | pass | build: exit: 0 |\n\
|  tests  |  skipped (missing-tool)  | tests: tool: nextest missing |\n\
<!-- gates:end -->\n\
between\n\
<!-- hoplog:start -->\n\
- 1700000000Z runner: gate tests fail [route=next:self gate=tests]\n\
-   odd hop line without structure\n\
<!-- hoplog:end -->\n\
<!-- decision:start -->\n\
**State:** in-progress\n\
**Why:** tests failed once\n\
retrying\n\
**Next:** NEXT → self\n\
<!-- decision:end -->\n\
trailer";

    #[test]
    fn test_roundtrip_is_byte_exact() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.render(), SAMPLE);
        assert_eq!(template().render(), assets::LEDGER_TEMPLATE);
    }

    #[test]
    fn test_parse_reads_all_sections() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.gates().count(), 2);
        assert_eq!(
            doc.gate("tests").unwrap().status,
            GateStatus::Skipped("missing-tool".into())
        );
        assert_eq!(doc.hop_count(), 2);
        let first = doc.hops().next().unwrap();
        assert_eq!(first.agent, "runner");
        assert!(first.route_tag().unwrap().decision.is_self_retry());
        assert_eq!(doc.decision().state, DecisionState::InProgress);
        assert_eq!(doc.decision().why, "tests failed once\nretrying");
        assert_eq!(
            doc.decision().next,
            Some(RoutingDecision::Next("self".into()))
        );
    }

    #[test]
    fn test_with_gate_upserts_in_place() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        let updated = doc.with_gate(gate("build", GateStatus::Fail, "build: exit: 101"));
        let names: Vec<_> = updated.gates().map(|g| g.name.clone()).collect();
        assert_eq!(names, vec!["build", "tests"]);
        let rendered = updated.render();
        assert!(rendered.contains("| build | fail | build: exit: 101 |\n"));
        assert!(rendered.contains("|  tests  |  skipped (missing-tool)  |"));
        assert!(rendered.starts_with("Intro text kept verbatim."));
        assert!(rendered.ends_with("trailer"));
    }

    #[test]
    fn test_with_gate_appends_new_rows_last() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        let updated = doc.with_gate(gate("docs", GateStatus::Pass, "docs: warnings: 0"));
        let names: Vec<_> = updated.gates().map(|g| g.name.clone()).collect();
        assert_eq!(names, vec!["build", "tests", "docs"]);
        let reparsed = LedgerDocument::parse(&updated.render()).unwrap();
        assert_eq!(reparsed.gate("docs").unwrap().evidence, "docs: warnings: 0");
    }

    #[test]
    fn test_with_gate_is_idempotent() {
        let g = gate("fmt", GateStatus::Pass, "fmt: files: 12 | clean");
        let once = template().with_gate(g.clone());
        let twice = once.with_gate(g.clone());
        assert_eq!(once.render(), twice.render());
        let reparsed = LedgerDocument::parse(&twice.render()).unwrap();
        assert_eq!(reparsed.with_gate(g).render(), twice.render());
        assert_eq!(reparsed.gate("fmt").unwrap().evidence, "fmt: files: 12 | clean");
    }

    #[test]
    fn test_with_hop_preserves_prior_entries() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        let before: Vec<Hop> = doc.hops().cloned().collect();
        let after = doc.with_hop(Hop::new("1700000100Z", "fixer", "patched test"));
        let reparsed = LedgerDocument::parse(&after.render()).unwrap();
        let hops: Vec<Hop> = reparsed.hops().cloned().collect();
        assert_eq!(hops.len(), before.len() + 1);
        assert_eq!(&hops[..before.len()], &before[..]);
        assert_eq!(hops.last().unwrap().agent, "fixer");
        let old_line = "- 1700000000Z runner: gate tests fail [route=next:self gate=tests]\n";
        assert!(after.render().contains(old_line));
    }

    #[test]
    fn test_with_hop_on_empty_log() {
        let doc = template().with_hop(Hop::new("1700000000Z", "runner", "first"));
        let rendered = doc.render();
        assert!(rendered.contains("<!-- hoplog:start -->\n- 1700000000Z runner: first\n<!-- hoplog:end -->"));
        let doc = doc.with_hop(Hop::new("1700000001Z", "runner", "second"));
        let reparsed = LedgerDocument::parse(&doc.render()).unwrap();
        let summaries: Vec<_> = reparsed.hops().map(|h| h.summary.clone()).collect();
        assert_eq!(summaries, vec!["first", "second"]);
    }

    #[test]
    fn test_with_decision_replaces_block() {
        let doc = LedgerDocument::parse(SAMPLE).unwrap();
        let decision = Decision::new(
            DecisionState::Ready,
            "all gates green\nsecond\nthird\nfourth dropped",
            Some(RoutingDecision::Finalize("merger".into())),
        );
        let updated = doc.with_decision(decision.clone());
        let reparsed = LedgerDocument::parse(&updated.render()).unwrap();
        assert_eq!(reparsed.decision(), &decision);
        assert_eq!(reparsed.decision().why.lines().count(), 3);
        assert!(!updated.render().contains("retrying"));
    }

    #[test]
    fn test_inline_anchors_get_table_header() {
        let body = "<!-- gates:start --><!-- gates:end -->\n<!-- hoplog:start --><!-- hoplog:end -->\n<!-- decision:start -->\n**State:** in-progress\n**Why:** new\n**Next:** pending\n<!-- decision:end -->";
        let doc = LedgerDocument::parse(body).unwrap();
        assert_eq!(doc.render(), body);
        let doc = doc
            .with_gate(gate("build", GateStatus::Pass, "ok"))
            .with_hop(Hop::new("1Z", "a", "b"));
        let reparsed = LedgerDocument::parse(&doc.render()).unwrap();
        assert_eq!(reparsed.gate("build").unwrap().status, GateStatus::Pass);
        assert_eq!(reparsed.hop_count(), 1);
    }

    #[test]
    fn test_damaged_anchors_are_malformed() {
        let dup = format!("{}\n{}", SAMPLE, GATES_START);
        assert!(matches!(
            LedgerDocument::parse(&dup),
            Err(GateLedgerError::MalformedLedger(_))
        ));
        assert_eq!(anchor_census("plain comment"), AnchorCensus::Absent);
        assert!(matches!(
            anchor_census("<!-- gates:start --> only"),
            AnchorCensus::Damaged(_)
        ));
        assert_eq!(anchor_census(SAMPLE), AnchorCensus::Complete);
    }

    #[test]
    fn test_duplicate_gate_rows_are_malformed() {
        let body = SAMPLE.replace("|  tests  |", "|  build  |");
        assert!(matches!(
            LedgerDocument::parse(&body),
            Err(GateLedgerError::MalformedLedger(_))
        ));
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let body = SAMPLE.replace("| build | pass |", "| build | green |");
        assert!(LedgerDocument::parse(&body).is_err());
    }

    #[test]
    fn test_decision_state_for_route() {
        assert_eq!(
            DecisionState::for_route(&RoutingDecision::Finalize("x".into())),
            DecisionState::Ready
        );
        assert_eq!(
            DecisionState::for_route(&RoutingDecision::Next("self".into())),
            DecisionState::InProgress
        );
        assert_eq!(
            DecisionState::for_route(&RoutingDecision::Next("fixer".into())),
            DecisionState::NeedsRework
        );
    }

    #[test]
    fn test_backslashes_in_evidence_survive_a_round_trip() {
        let evidence = r"lint: path: C:\work\src\lib.rs; pattern: \d+\|x; trailing \";
        let doc = template().with_gate(gate("lint", GateStatus::Fail, evidence));
        let rendered = doc.render();
        assert!(rendered.contains(r"| lint | fail | lint: path: C:\\work\\src\\lib.rs"));
        let reparsed = LedgerDocument::parse(&rendered).unwrap();
        assert_eq!(reparsed.gate("lint").unwrap().evidence, evidence);
        assert_eq!(reparsed.render(), rendered);
        assert_eq!(
            reparsed.with_gate(gate("lint", GateStatus::Fail, evidence)).render(),
            rendered
        );
    }

    #[test]
    fn test_gate_names_are_route_tag_tokens() {
        assert!(Gate::new("unit-tests.v2_x", GateStatus::Pass, "").is_ok());
        for bad in ["tests[unit]", "gen:tests", "two words", "a|b", ""] {
            assert!(
                matches!(
                    Gate::new(bad, GateStatus::Pass, ""),
                    Err(GateLedgerError::ValidationError(_))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_route_tag_reads_back_token_names() {
        let hop = Hop::tagged(
            "1Z",
            "unit.runner",
            "gate x fail",
            "unit-tests.v2",
            &RoutingDecision::Next("self".into()),
        );
        let route = hop.route_tag().unwrap();
        assert_eq!(route.gate, "unit-tests.v2");
        assert!(route.decision.is_self_retry());
        assert_eq!(Hop::agent_key("gen:tests"), "gen-tests");
    }
}
