//! Quorum Gate

use std::fmt;
use std::num::NonZeroUsize;

use crate::error::{Error, Result};

/// Minimum candidate count before an election may promote a primary.
///
/// Quorum only gates promotion; stopping is always allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum(NonZeroUsize);

impl Quorum {
    /// Create a quorum. Zero is a configuration error.
    pub fn new(size: usize) -> Result<Self> {
        NonZeroUsize::new(size)
            .map(Quorum)
            .ok_or_else(|| Error::Config("singleton quorum must be at least 1".into()))
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }

    /// Check whether `candidates` providers are enough to elect
    pub fn is_reached(&self, candidates: usize) -> bool {
        candidates >= self.get()
    }

    /// Quorum is reached with no spare member: losing one provider loses it
    pub fn is_exact(&self, candidates: usize) -> bool {
        self.get() > 1 && candidates == self.get()
    }
}

impl Default for Quorum {
    fn default() -> Self {
        Quorum(NonZeroUsize::MIN)
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
