//! Single-decree Paxos used exactly once per peer to agree on the initial
//! set of peers that seed the ring.

mod ballot;
mod error;
mod paxos;

pub use ballot::Ballot;
pub use error::{PaxosError, Result};
pub use paxos::{Consensus, Paxos};

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_types::{PeerName, StartupUid};

    fn node(id: u64, quorum: usize) -> Paxos {
        Paxos::new_node(PeerName::new(id), StartupUid::generate(), quorum)
    }

    #[test]
    fn observer_cannot_propose() {
        let mut observer = Paxos::new_observer(2);
        assert_eq!(observer.propose(), Err(PaxosError::ObserverCannotPropose));
    }

    #[test]
    fn lone_node_reaches_consensus_with_itself_when_quorum_is_one() {
        let mut n = node(1, 1);
        n.propose().unwrap();
        assert_eq!(n.consensus(), Consensus::Reached(vec![PeerName::new(1)]));
    }

    #[test]
    fn two_nodes_converge_after_gossiping() {
        let mut a = node(1, 2);
        let mut b = node(2, 2);
        a.propose().unwrap();
        b.propose().unwrap();

        // Exchange and re-propose until both see the same accepted value.
        for _ in 0..4 {
            let snapshot_a = a.clone();
            let snapshot_b = b.clone();
            a.update(&snapshot_b);
            b.update(&snapshot_a);
            a.propose().unwrap();
            b.propose().unwrap();
        }

        let snapshot_a = a.clone();
        b.update(&snapshot_a);
        let snapshot_b = b.clone();
        a.update(&snapshot_b);

        assert_eq!(
            a.consensus(),
            Consensus::Reached(vec![PeerName::new(1), PeerName::new(2)])
        );
        assert_eq!(a.consensus(), b.consensus());
    }

    #[test]
    fn think_is_idempotent_until_something_changes() {
        let mut n = node(1, 1);
        n.propose().unwrap();
        assert!(n.think());
        assert!(!n.think());
        // Every propose() advances the ballot, so there's new information
        // to report each time.
        n.propose().unwrap();
        assert!(n.think());
        assert!(!n.think());
    }

    #[test]
    fn observer_merges_without_contributing_a_vote() {
        let mut n = node(1, 2);
        n.propose().unwrap();
        let mut observer = Paxos::new_observer(2);
        assert!(observer.update(&n));
        assert_eq!(observer.consensus(), Consensus::NotReached);
    }

    #[test]
    fn update_is_a_no_op_when_nothing_new() {
        let mut a = node(1, 1);
        a.propose().unwrap();
        let snapshot = a.clone();
        assert!(!a.update(&snapshot));
    }
}
