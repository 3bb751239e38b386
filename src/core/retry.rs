//! Bounded self-retry accounting.
//!
//! There is no stored counter. The attempt count for an (agent, gate) pair is
//! replayed from the Hoplog: consecutive `next:self` hops the agent wrote for
//! that gate, counted back to the most recent hop that routed somewhere else
//! (by the agent itself for that gate, or any hop handing work back to it).

use crate::core::ledger::Hop;
use crate::core::routing::RoutingDecision;

pub const DEFAULT_MAX_SELF_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    agent: String,
    gate: String,
    attempts: u32,
    limit: u32,
}

impl RetryState {
    pub fn new(agent: &str, gate: &str, limit: u32) -> Self {
        Self::with_attempts(agent, gate, 0, limit)
    }

    /// Clamps `attempts` into `0..=limit`.
    pub fn with_attempts(agent: &str, gate: &str, attempts: u32, limit: u32) -> Self {
        Self {
            agent: agent.to_string(),
            gate: gate.to_string(),
            attempts: attempts.min(limit),
            limit,
        }
    }

    pub fn load<'a, I>(agent: &str, gate: &str, hoplog: I, limit: u32) -> Self
    where
        I: IntoIterator<Item = &'a Hop>,
        I::IntoIter: DoubleEndedIterator,
    {
        let agent_key = Hop::agent_key(agent);
        let mut attempts = 0u32;
        for hop in hoplog.into_iter().rev() {
            let Some(route) = hop.route_tag() else {
                continue;
            };
            let own_gate = hop.agent == agent_key && route.gate == gate;
            if own_gate {
                if route.decision.is_self_retry() {
                    attempts += 1;
                    continue;
                }
                break;
            }
            if hop.agent != agent_key && routes_to(&route.decision, agent) {
                break;
            }
        }
        Self::with_attempts(agent, gate, attempts, limit)
    }

    pub fn increment(&self) -> Self {
        Self::with_attempts(
            &self.agent,
            &self.gate,
            self.attempts.saturating_add(1),
            self.limit,
        )
    }

    pub fn exceeded(&self) -> bool {
        self.attempts >= self.limit
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

fn routes_to(decision: &RoutingDecision, agent: &str) -> bool {
    decision.target() == agent
}
