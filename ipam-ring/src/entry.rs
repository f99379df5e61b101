//! A single ownership record within the [`crate::Ring`].

use ipam_types::{Addr, PeerName};
use serde::{Deserialize, Serialize};

/// One partition of the universe, owned by a single peer.
///
/// `entries[i]` owns `[entries[i].start, entries[i+1].start)`, with the
/// last entry's range ending at the ring's `universe.end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// First address owned by this entry.
    pub start: Addr,
    /// The owning peer.
    pub owner: PeerName,
    /// Monotonically increasing per-position version. Bumped whenever the
    /// owner changes or the free-count hint is updated locally.
    pub version: u64,
    /// Advisory free-address count, propagated via gossip so donors can be
    /// picked without asking every peer directly.
    pub free_count_hint: u32,
    /// Legacy marker, decoded but not interpreted by this implementation;
    /// optional on the wire format.
    #[serde(default)]
    pub tombstone: bool,
}

impl Entry {
    pub(crate) fn new(start: Addr, owner: PeerName, version: u64) -> Self {
        Self {
            start,
            owner,
            version,
            free_count_hint: 0,
            tombstone: false,
        }
    }
}
