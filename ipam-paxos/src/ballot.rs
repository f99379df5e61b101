use ipam_types::PeerName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Paxos ballot number, broken by proposer identity so that ballots are
/// totally ordered even when two peers pick the same round number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub number: u64,
    pub proposer: PeerName,
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.proposer)
    }
}
