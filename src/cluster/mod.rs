//! Cluster Module
//!
//! Member identities, views, and the membership feed that drives elections.

mod node;
mod membership;

pub use node::{Node, View};
pub use membership::{ClusterMembership, MemberState, MemberStatus, MembershipSummary, Topology};
