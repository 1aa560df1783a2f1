//! Election Policies
//!
//! An election policy picks exactly one node out of a non-empty, ordered
//! candidate list. Every coordinator computing the same candidate list must
//! reach the same answer without talking to the others, so a policy may only
//! look at the content and order of its input.

mod preferred;

use std::fmt::Debug;

use crate::cluster::Node;

pub use preferred::{Preference, PreferredElectionPolicy};

/// Deterministic choice of a primary provider
pub trait ElectionPolicy: Debug + Send + Sync {
    /// Elect one of `candidates`. Returns `None` only for an empty list.
    fn elect<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node>;
}

/// Picks the candidate at a fixed position in view order
///
/// Negative positions count back from the end, and positions wrap around
/// the candidate count, so `0` is the first candidate and `-1` the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimpleElectionPolicy {
    position: i32,
}

impl SimpleElectionPolicy {
    pub fn new(position: i32) -> Self {
        Self { position }
    }

    pub fn position(&self) -> i32 {
        self.position
    }
}

impl ElectionPolicy for SimpleElectionPolicy {
    fn elect<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        if candidates.is_empty() {
            return None;
        }
        let size = candidates.len() as i64;
        let index = i64::from(self.position).rem_euclid(size) as usize;
        candidates.get(index)
    }
}
