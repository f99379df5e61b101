use std::fmt;
use std::sync::Arc;

use ipam_types::{PeerName, Range, StartupUid};

/// Allocator configuration.
#[derive(Clone)]
pub struct Config {
    pub our_name: PeerName,
    pub our_uid: StartupUid,
    pub our_nickname: String,
    /// Ordered peer list for manual bootstrap, if the operator supplied one.
    pub seed: Option<Vec<PeerName>>,
    pub universe: Range,
    /// If true, participates in Paxos only as an observer.
    pub is_observer: bool,
    /// Polled at `establish_ring` time for the current quorum size.
    pub get_quorum: Arc<dyn Fn() -> usize + Send + Sync>,
    /// Whether a peer is currently believed reachable.
    pub is_known_peer: Arc<dyn Fn(PeerName) -> bool + Send + Sync>,
    /// How often the actor retries pending operations and checks for dead
    /// containers. Defaults to 5 s.
    pub tick_interval: std::time::Duration,
    /// How long a container may go unseen before its addresses are
    /// reclaimed. Defaults to 30 s.
    pub dead_grace_period: std::time::Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("our_name", &self.our_name)
            .field("our_uid", &self.our_uid)
            .field("our_nickname", &self.our_nickname)
            .field("seed", &self.seed)
            .field("universe", &self.universe)
            .field("is_observer", &self.is_observer)
            .field("tick_interval", &self.tick_interval)
            .field("dead_grace_period", &self.dead_grace_period)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub const DEFAULT_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
    pub const DEFAULT_DEAD_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(30);
}
