//! Gossip transport abstraction.
//!
//! The transport itself is an external collaborator; the allocator only
//! needs to send unicasts/broadcasts and learn which peers are currently
//! reachable. [`mock`] provides an in-memory implementation for tests.

use async_trait::async_trait;
use ipam_types::PeerName;

use crate::protocol::{GossipBlob, UnicastMessage};

/// Non-blocking gossip transport: sends are fire-and-forget enqueues onto
/// the transport's own outbound queue — the allocator never blocks on
/// network I/O.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    async fn send_unicast(&self, to: PeerName, msg: UnicastMessage);
    async fn send_broadcast(&self, msg: GossipBlob);

    /// Whether `peer` is currently believed reachable. Backs the
    /// allocator's `is_known_peer` configuration callback when no other
    /// source of liveness is configured.
    fn is_reachable(&self, peer: PeerName) -> bool;
}

pub mod mock {
    //! An in-memory transport for tests: unicasts and broadcasts are
    //! simply recorded, and liveness is whatever the test configured.

    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::{GossipTransport, GossipBlob, PeerName, UnicastMessage};
    use async_trait::async_trait;

    #[derive(Debug)]
    pub struct Sent {
        pub to: PeerName,
        pub msg: UnicastMessage,
    }

    #[derive(Default)]
    pub struct MockTransport {
        unicasts: Mutex<Vec<Sent>>,
        broadcasts: Mutex<Vec<GossipBlob>>,
        reachable: Mutex<HashSet<PeerName>>,
    }

    impl MockTransport {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_reachable(&self, peer: PeerName) {
            self.reachable.lock().unwrap().insert(peer);
        }

        pub fn mark_unreachable(&self, peer: PeerName) {
            self.reachable.lock().unwrap().remove(&peer);
        }

        pub fn sent_unicasts(&self) -> Vec<(PeerName, UnicastMessage)> {
            self.unicasts
                .lock()
                .unwrap()
                .iter()
                .map(|s| (s.to, s.msg.clone()))
                .collect()
        }

        pub fn sent_broadcasts(&self) -> Vec<GossipBlob> {
            self.broadcasts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GossipTransport for MockTransport {
        async fn send_unicast(&self, to: PeerName, msg: UnicastMessage) {
            self.unicasts.lock().unwrap().push(Sent { to, msg });
        }

        async fn send_broadcast(&self, msg: GossipBlob) {
            self.broadcasts.lock().unwrap().push(msg);
        }

        fn is_reachable(&self, peer: PeerName) -> bool {
            self.reachable.lock().unwrap().contains(&peer)
        }
    }
}
