//! Value query rounds and retry pacing

use std::collections::BTreeMap;
use std::time::Duration;
use rand::Rng;

use super::{CommandResponse, ValueReply};
use crate::cluster::Node;
use crate::error::Result;

/// Retry settings for value lookups while no primary answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// First pause between query rounds
    pub initial_backoff: Duration,
    /// Longest pause between query rounds
    pub max_backoff: Duration,
    /// Give up and report the service unavailable after this long
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Doubling backoff with jitter in the upper half of each step
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(config: &QueryConfig) -> Self {
        Self {
            next: config.initial_backoff,
            max: config.max_backoff.max(config.initial_backoff),
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.next.as_millis().max(1) as u64;
        self.next = (self.next * 2).min(self.max);
        Duration::from_millis(rand::thread_rng().gen_range(base / 2..=base))
    }
}

/// Replies of one value query round, sorted by what they mean
#[derive(Debug, Default)]
pub(crate) struct QueryRound {
    /// Members claiming to be primary, with their encoded value
    pub primaries: Vec<(Node, Vec<u8>)>,
    /// Members whose elected start failed
    pub start_failed: Vec<Node>,
    /// Members that did not answer usefully
    pub unanswered: usize,
}

impl QueryRound {
    pub(crate) fn from_replies(replies: BTreeMap<Node, Result<CommandResponse>>) -> Self {
        let mut round = QueryRound::default();

        for (node, reply) in replies {
            match reply {
                Ok(CommandResponse::Value(ValueReply::Primary(bytes))) => {
                    round.primaries.push((node, bytes));
                }
                Ok(CommandResponse::Value(ValueReply::StartFailed)) => {
                    round.start_failed.push(node);
                }
                Ok(CommandResponse::Value(ValueReply::NotPrimary)) => {}
                Ok(other) => {
                    tracing::debug!("Unexpected value query reply from {}: {:?}", node, other);
                    round.unanswered += 1;
                }
                Err(e) => {
                    tracing::trace!("{} did not answer value query: {}", node, e);
                    round.unanswered += 1;
                }
            }
        }

        round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::singleton::Transition;

    fn node(name: &str) -> Node {
        Node::new(name, format!("{}:7654", name))
    }

    #[test]
    fn test_backoff_grows_to_max() {
        let config = QueryConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            timeout: Duration::from_secs(1),
        };
        let mut backoff = Backoff::new(&config);

        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();
        assert!(delays[0] >= Duration::from_millis(5) && delays[0] <= Duration::from_millis(10));
        assert!(delays[1] <= Duration::from_millis(20));
        for delay in &delays[2..] {
            assert!(*delay >= Duration::from_millis(20) && *delay <= Duration::from_millis(40));
        }
    }

    #[test]
    fn test_round_classification() {
        let mut replies = BTreeMap::new();
        replies.insert(node("a"), Ok(CommandResponse::Value(ValueReply::Primary(vec![1]))));
        replies.insert(node("b"), Ok(CommandResponse::Value(ValueReply::NotPrimary)));
        replies.insert(node("c"), Ok(CommandResponse::Value(ValueReply::StartFailed)));
        replies.insert(node("d"), Err(Error::Cancelled));
        replies.insert(node("e"), Ok(CommandResponse::Stopped(Transition::Unchanged)));

        let round = QueryRound::from_replies(replies);
        assert_eq!(round.primaries, vec![(node("a"), vec![1])]);
        assert_eq!(round.start_failed, vec![node("c")]);
        assert_eq!(round.unanswered, 2);
    }
}
