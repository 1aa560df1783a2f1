//! Preferred-node election policy

use std::sync::Arc;

use super::{ElectionPolicy, SimpleElectionPolicy};
use crate::cluster::Node;

/// A node a deployment would rather see as primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    /// Match by member name
    Name(String),
    /// Match by cluster address (host:port)
    Address(String),
}

impl Preference {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Preference::Name(name) => node.name() == name,
            Preference::Address(address) => node.address() == address,
        }
    }
}

impl From<&str> for Preference {
    /// Strings containing a port separator are treated as addresses
    fn from(value: &str) -> Self {
        if value.contains(':') {
            Preference::Address(value.to_string())
        } else {
            Preference::Name(value.to_string())
        }
    }
}

/// Elects the first preference present among the candidates, otherwise
/// defers to a fallback policy.
#[derive(Debug, Clone)]
pub struct PreferredElectionPolicy {
    preferences: Vec<Preference>,
    fallback: Arc<dyn ElectionPolicy>,
}

impl PreferredElectionPolicy {
    pub fn new(preferences: Vec<Preference>, fallback: Arc<dyn ElectionPolicy>) -> Self {
        Self { preferences, fallback }
    }

    /// Preferences with the default first-candidate fallback
    pub fn with_preferences(preferences: Vec<Preference>) -> Self {
        Self::new(preferences, Arc::new(SimpleElectionPolicy::default()))
    }

    pub fn preferences(&self) -> &[Preference] {
        &self.preferences
    }
}

impl ElectionPolicy for PreferredElectionPolicy {
    fn elect<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        self.preferences
            .iter()
            .find_map(|preference| candidates.iter().find(|node| preference.matches(node)))
            .or_else(|| self.fallback.elect(candidates))
    }
}
