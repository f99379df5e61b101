//! Single-decree Paxos over the value "the set of peers that will seed the
//! ring". Every participant (node or observer) keeps a table of the
//! highest promise and accepted value it has seen *per peer*, merged via
//! pointwise ballot comparison the same way [`ipam_types`] callers merge
//! vector clocks: newest wins, ties must agree.

use std::collections::HashMap;

use ipam_types::{PeerName, StartupUid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ballot::Ballot;
use crate::error::{PaxosError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Claim {
    promised: Ballot,
    accepted: Option<(Ballot, Vec<PeerName>)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Role {
    Node { identity: PeerName, uid: StartupUid },
    Observer,
}

/// The outcome of evaluating [`Paxos::consensus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consensus {
    Reached(Vec<PeerName>),
    NotReached,
}

/// A Paxos participant: either a full node (proposes and accepts) or an
/// observer (only merges and rebroadcasts what it's told).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paxos {
    role: Role,
    quorum: usize,
    claims: HashMap<PeerName, Claim>,
    version: u64,
    #[serde(skip)]
    last_broadcast_version: u64,
}

impl Paxos {
    /// Creates a node that can propose values and has its own acceptor row.
    #[must_use]
    pub fn new_node(identity: PeerName, uid: StartupUid, quorum: usize) -> Self {
        Self {
            role: Role::Node { identity, uid },
            quorum,
            claims: HashMap::new(),
            version: 0,
            last_broadcast_version: 0,
        }
    }

    /// Creates an observer: it merges and forwards claims but never
    /// proposes, and its own (nonexistent) vote never counts toward
    /// quorum.
    #[must_use]
    pub fn new_observer(quorum: usize) -> Self {
        Self {
            role: Role::Observer,
            quorum,
            claims: HashMap::new(),
            version: 0,
            last_broadcast_version: 0,
        }
    }

    #[must_use]
    pub fn is_observer(&self) -> bool {
        matches!(self.role, Role::Observer)
    }

    fn highest_seen_ballot_number(&self) -> u64 {
        self.claims
            .values()
            .flat_map(|c| {
                std::iter::once(c.promised.number)
                    .chain(c.accepted.as_ref().map(|(b, _)| b.number))
            })
            .max()
            .unwrap_or(0)
    }

    /// Advances our own ballot above anything seen so far and records a
    /// fresh accepted claim carrying `{me}` unioned with whatever values
    /// have already been accepted anywhere in the table.
    pub fn propose(&mut self) -> Result<()> {
        let Role::Node { identity, .. } = &self.role else {
            return Err(PaxosError::ObserverCannotPropose);
        };
        let identity = *identity;

        let ballot = Ballot {
            number: self.highest_seen_ballot_number() + 1,
            proposer: identity,
        };

        let mut value: Vec<PeerName> = self
            .claims
            .values()
            .filter_map(|c| c.accepted.as_ref().map(|(_, v)| v.clone()))
            .flatten()
            .collect();
        value.push(identity);
        value.sort_unstable();
        value.dedup();

        let claim = Claim {
            promised: ballot,
            accepted: Some((ballot, value)),
        };
        let changed = self.claims.get(&identity) != Some(&claim);
        self.claims.insert(identity, claim);
        if changed {
            self.version += 1;
        }
        debug!(%ballot, "proposed ballot");
        Ok(())
    }

    /// Merges another participant's claim table into ours. Returns whether
    /// our state advanced as a result.
    pub fn update(&mut self, other: &Paxos) -> bool {
        let mut changed = false;
        for (peer, theirs) in &other.claims {
            match self.claims.get(peer) {
                None => {
                    self.claims.insert(*peer, theirs.clone());
                    changed = true;
                }
                Some(mine) => {
                    let mut merged = mine.clone();
                    if theirs.promised > merged.promised {
                        merged.promised = theirs.promised;
                    }
                    let adopt_theirs = match (&merged.accepted, &theirs.accepted) {
                        (None, Some(_)) => true,
                        (Some((mine_ballot, _)), Some((their_ballot, _))) => {
                            their_ballot > mine_ballot
                        }
                        _ => false,
                    };
                    if adopt_theirs {
                        merged.accepted = theirs.accepted.clone();
                    }
                    if merged != *mine {
                        self.claims.insert(*peer, merged);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.version += 1;
        }
        changed
    }

    /// Recomputes whether there's new information worth broadcasting since
    /// the last call. Idempotent: calling it twice in a row with no
    /// intervening `propose`/`update` returns `false` the second time.
    pub fn think(&mut self) -> bool {
        let should_broadcast = self.version != self.last_broadcast_version;
        self.last_broadcast_version = self.version;
        should_broadcast
    }

    /// Whether a quorum of participants have accepted the same value as
    /// whoever holds the highest ballot seen anywhere in the table.
    #[must_use]
    pub fn consensus(&self) -> Consensus {
        let Some((_, top_value)) = self
            .claims
            .values()
            .filter_map(|c| c.accepted.as_ref())
            .max_by_key(|(ballot, _)| *ballot)
        else {
            return Consensus::NotReached;
        };

        let support = self
            .claims
            .values()
            .filter(|c| c.accepted.as_ref().map(|(_, v)| v) == Some(top_value))
            .count();

        if support >= self.quorum.max(1) {
            Consensus::Reached(top_value.clone())
        } else {
            Consensus::NotReached
        }
    }
}
