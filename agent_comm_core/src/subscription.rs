use crate::agent::AgentHandle;
use crate::pattern::ChannelPattern;
use crate::registry::TypeRegistry;
use std::collections::{HashMap, HashSet};

/// The bidirectional mapping between channel patterns and subscribed agents.
///
/// The forward map (`pattern → agents`) drives delivery; the inverse map
/// (`agent → patterns`) makes all-patterns unsubscription cheap. The two are
/// always mutated together, and the router guards every mutation with its
/// single router-wide mutex.
///
/// Invariants:
///
/// - an agent is in the forward set of a pattern iff that pattern is in the
///   agent's inverse set;
/// - the forward map never holds a pattern with an empty agent set — the
///   pattern is removed together with its last agent.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    forward: HashMap<ChannelPattern, HashSet<AgentHandle>>,
    inverse: HashMap<AgentHandle, HashSet<ChannelPattern>>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the given agent under the given pattern.
    ///
    /// Returns `true` when this insertion created the pattern, in which case
    /// the caller is obligated to issue a backend subscription before
    /// completing the operation.
    pub fn insert(&mut self, agent: &AgentHandle, pattern: &ChannelPattern) -> bool {
        let created = !self.forward.contains_key(pattern);

        self.forward
            .entry(pattern.clone())
            .or_default()
            .insert(agent.clone());
        self.inverse
            .entry(agent.clone())
            .or_default()
            .insert(pattern.clone());

        created
    }

    /// Removes the given agent from the given pattern, or from all of its
    /// patterns when `pattern` is `None`.
    ///
    /// Returns the patterns that lost their last agent, in which case the
    /// caller is obligated to issue a backend unsubscription for each.
    pub fn remove(
        &mut self,
        agent: &AgentHandle,
        pattern: Option<&ChannelPattern>,
    ) -> Vec<ChannelPattern> {
        let patterns: Vec<ChannelPattern> = match pattern {
            Some(pattern) => vec![pattern.clone()],
            None => self
                .inverse
                .get(agent)
                .map(|patterns| patterns.iter().cloned().collect())
                .unwrap_or_default(),
        };

        let mut released = Vec::new();

        for pattern in &patterns {
            if let Some(agents) = self.forward.get_mut(pattern) {
                agents.remove(agent);

                if agents.is_empty() {
                    self.forward.remove(pattern);
                    released.push(pattern.clone());
                }
            }

            if let Some(subscribed) = self.inverse.get_mut(agent) {
                subscribed.remove(pattern);
            }
        }

        if self
            .inverse
            .get(agent)
            .is_some_and(|subscribed| subscribed.is_empty())
        {
            self.inverse.remove(agent);
        }

        released
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.inverse.clear();
    }

    /// Copies the forward map for iteration outside the router mutex.
    pub fn snapshot(&self) -> Vec<(ChannelPattern, Vec<AgentHandle>)> {
        self.forward
            .iter()
            .map(|(pattern, agents)| (pattern.clone(), agents.iter().cloned().collect()))
            .collect()
    }

    /// Computes the registry of message kinds reachable through the incoming
    /// sets of all currently subscribed agents.
    pub fn registry(&self) -> TypeRegistry {
        let mut registry = TypeRegistry::new();

        for agent in self.inverse.keys() {
            for kind in agent.agent().incoming() {
                registry.register_kind(*kind);
            }
        }

        registry
    }

    /// Reports whether the given agent is subscribed under the given
    /// pattern.
    pub fn contains(&self, agent: &AgentHandle, pattern: &ChannelPattern) -> bool {
        self.forward
            .get(pattern)
            .is_some_and(|agents| agents.contains(agent))
    }

    /// Reports the patterns the given agent is subscribed under.
    pub fn patterns_of(&self, agent: &AgentHandle) -> Vec<ChannelPattern> {
        self.inverse
            .get(agent)
            .map(|patterns| patterns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Reports the number of active patterns.
    pub fn pattern_count(&self) -> usize {
        self.forward.len()
    }

    /// Reports whether the table has no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
