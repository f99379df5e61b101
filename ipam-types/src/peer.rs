//! Peer identity primitives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identity for a peer in the overlay.
///
/// `PeerName` is a 64-bit ID: stable across restarts of the same peer,
/// and totally ordered so that ring/Paxos tie-breaks are deterministic.
/// The human-readable nickname is *not* part of `PeerName` — it is tracked
/// separately in the allocator's nicknames map, since the same name can be
/// relabeled without changing identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerName(u64);

impl PeerName {
    /// Wraps a raw 64-bit ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw 64-bit ID.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{:016x}", self.0)
    }
}

/// Parses the raw-ID form (`peer-<16 hex digits>`, or a bare decimal ID).
/// Used by administrative commands that accept either a nickname or a raw
/// `PeerName` for the target peer.
impl FromStr for PeerName {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex) = s.strip_prefix("peer-") {
            return u64::from_str_radix(hex, 16).map(Self);
        }
        s.parse().map(Self)
    }
}

/// Distinguishes successive process lifetimes of the same [`PeerName`].
///
/// A peer that restarts keeps its `PeerName` but gets a fresh `StartupUid`,
/// so Paxos and ring-transfer logic can tell "the same peer, still running"
/// apart from "the same peer, come back from the dead".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StartupUid(Uuid);

impl StartupUid {
    /// Generates a fresh startup UID (call once per process lifetime).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID (for deserialization/testing).
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for StartupUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_name_ordering_is_by_id() {
        let a = PeerName::new(1);
        let b = PeerName::new(2);
        assert!(a < b);
        assert_eq!(a, PeerName::new(1));
    }

    #[test]
    fn startup_uids_differ_across_generations() {
        let a = StartupUid::generate();
        let b = StartupUid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn peer_name_parses_display_form_and_bare_decimal() {
        let name = PeerName::new(0x2a);
        let parsed: PeerName = name.to_string().parse().unwrap();
        assert_eq!(parsed, name);
        assert_eq!("42".parse::<PeerName>().unwrap(), PeerName::new(42));
        assert!("peer-zz".parse::<PeerName>().is_err());
    }
}
