//! The gossip wire protocol: unicast request/deny messages and the
//! broadcast/ring-update gossip blob.
//!
//! Encoding is tag-prefixed JSON: self-describing, and tolerant of
//! newly-added fields via `#[serde(default)]` so old and new peers can
//! still gossip with each other.

use std::collections::HashMap;
use std::io;

use ipam_paxos::Paxos;
use ipam_ring::Ring;
use ipam_types::{PeerName, Range};
use serde::{Deserialize, Serialize};

/// Broadcast payload and the `RING_UPDATE` unicast payload: a peer's full
/// gossip state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GossipBlob {
    /// Seconds since the epoch when this blob was produced. Decoded for
    /// wire compatibility but not interpreted by this implementation.
    #[serde(default)]
    pub now: i64,
    pub nicknames: HashMap<PeerName, String>,
    /// Present only when the ring is empty and we're eligible to propose;
    /// observers send `None` so electing peers respond with a ring.
    pub paxos: Option<Paxos>,
    /// Present only when we have a ring to share.
    pub ring: Option<Ring>,
}

/// One of the three unicast message kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UnicastMessage {
    /// "please give me space in this range"
    SpaceRequest(Range),
    /// "here is my full state"
    RingUpdate(GossipBlob),
    /// "I cannot give you space in that range"
    SpaceRequestDenied(Range),
}

impl UnicastMessage {
    const fn tag(&self) -> u8 {
        match self {
            Self::SpaceRequest(_) => 0,
            Self::RingUpdate(_) => 1,
            Self::SpaceRequestDenied(_) => 2,
        }
    }
}

/// Encodes a unicast message as `[tag byte][json payload]`.
pub fn encode_unicast(msg: &UnicastMessage) -> io::Result<Vec<u8>> {
    let tag = msg.tag();
    let payload = match msg {
        UnicastMessage::SpaceRequest(r) | UnicastMessage::SpaceRequestDenied(r) => {
            serde_json::to_vec(r)
        }
        UnicastMessage::RingUpdate(blob) => serde_json::to_vec(blob),
    }
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes a `[tag byte][json payload]` unicast message.
pub fn decode_unicast(bytes: &[u8]) -> io::Result<UnicastMessage> {
    let (&tag, payload) = bytes
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "empty unicast message"))?;

    match tag {
        0 => serde_json::from_slice(payload).map(UnicastMessage::SpaceRequest),
        1 => serde_json::from_slice(payload).map(UnicastMessage::RingUpdate),
        2 => serde_json::from_slice(payload).map(UnicastMessage::SpaceRequestDenied),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown unicast tag: {other}"),
            ))
        }
    }
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encodes a broadcast gossip blob.
pub fn encode_broadcast(blob: &GossipBlob) -> io::Result<Vec<u8>> {
    serde_json::to_vec(blob).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decodes a broadcast gossip blob.
pub fn decode_broadcast(bytes: &[u8]) -> io::Result<GossipBlob> {
    serde_json::from_slice(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_types::Addr;

    #[test]
    fn unicast_round_trips_by_tag() {
        let msg = UnicastMessage::SpaceRequest(Range::new(Addr(0), Addr(10)));
        let bytes = encode_unicast(&msg).unwrap();
        assert_eq!(bytes[0], 0);
        let decoded = decode_unicast(&bytes).unwrap();
        assert!(matches!(decoded, UnicastMessage::SpaceRequest(_)));
    }

    #[test]
    fn broadcast_round_trips_empty_blob() {
        let blob = GossipBlob::default();
        let bytes = encode_broadcast(&blob).unwrap();
        let decoded = decode_broadcast(&bytes).unwrap();
        assert!(decoded.ring.is_none());
        assert!(decoded.paxos.is_none());
    }

    #[test]
    fn decode_unicast_rejects_unknown_tag() {
        assert!(decode_unicast(&[9, 1, 2, 3]).is_err());
    }

    #[test]
    fn decode_unicast_rejects_empty_input() {
        assert!(decode_unicast(&[]).is_err());
    }
}
