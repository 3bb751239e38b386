//! Bounded change-request labels.
//!
//! The protocol owns four prefixes. Labels under those prefixes are brought in
//! line with the desired set; anything else on the change request is left
//! alone.

use crate::core::config::MAX_TOPICS;
use crate::core::ledger::DecisionState;
use serde::Serialize;

pub const MANAGED_PREFIXES: [&str; 4] = ["flow:", "state:", "topic:", "needs:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    flow: String,
    state: DecisionState,
    topics: Vec<String>,
    needs: Option<String>,
}

impl LabelSet {
    pub fn new(flow: &str, state: DecisionState) -> Self {
        Self {
            flow: flow.to_string(),
            state,
            topics: Vec::new(),
            needs: None,
        }
    }

    /// Keeps the first two distinct topics.
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            let topic = topic.as_ref().to_string();
            if self.topics.len() < MAX_TOPICS && !self.topics.contains(&topic) {
                self.topics.push(topic);
            }
        }
        self
    }

    pub fn needs(mut self, needs: Option<&str>) -> Self {
        self.needs = needs.map(str::to_string);
        self
    }

    pub fn labels(&self) -> Vec<String> {
        let mut out = vec![
            format!("flow:{}", self.flow),
            format!("state:{}", self.state),
        ];
        out.extend(self.topics.iter().map(|t| format!("topic:{}", t)));
        if let Some(needs) = &self.needs {
            out.push(format!("needs:{}", needs));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelPlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub fn is_managed(label: &str) -> bool {
    MANAGED_PREFIXES.iter().any(|p| label.starts_with(p))
}

pub fn reconcile(current: &[String], desired: &LabelSet) -> LabelPlan {
    let wanted = desired.labels();
    LabelPlan {
        add: wanted
            .iter()
            .filter(|l| !current.contains(l))
            .cloned()
            .collect(),
        remove: current
            .iter()
            .filter(|l| is_managed(l) && !wanted.contains(l))
            .cloned()
            .collect(),
    }
}
