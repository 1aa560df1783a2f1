//! Cluster Nodes and Views

use std::collections::BTreeSet;
use std::fmt;
use serde::{Deserialize, Serialize};

/// Identity of a cluster member
///
/// Nodes are compared by name first, then address. Within a [`View`] the
/// only ordering that matters is the view's own member order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    name: String,
    address: String,
}

impl Node {
    /// Create a node identity
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Unique member name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cluster communication address (host:port)
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ordered snapshot of the reachable cluster members
///
/// A view is replaced wholesale on every membership change; it is never
/// mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    id: u64,
    members: Vec<Node>,
}

impl View {
    /// Create a view
    pub fn new(id: u64, members: Vec<Node>) -> Self {
        Self { id, members }
    }

    /// View identifier (membership epoch it was published at)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Members in view order
    pub fn members(&self) -> &[Node] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.members.contains(node)
    }

    /// Intersect with a provider set, keeping view order
    pub fn candidates(&self, providers: &BTreeSet<Node>) -> Vec<Node> {
        self.members
            .iter()
            .filter(|member| providers.contains(member))
            .cloned()
            .collect()
    }
}
