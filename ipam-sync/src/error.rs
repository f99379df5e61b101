use ipam_types::{Addr, ContainerId, PeerName};
use thiserror::Error;

/// Kind of pending operation a [`SyncError::Cancelled`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Allocate,
    Claim,
    Consense,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Allocate => "allocate",
            Self::Claim => "claim",
            Self::Consense => "consense",
        };
        write!(f, "{s}")
    }
}

/// Client- and gossip-observable errors raised by the allocator actor.
///
/// Invariant violations and persistence failures are not represented here:
/// they are fatal and terminate the process rather than flow back through
/// a reply channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("{kind} operation was cancelled{}", container_id.as_ref().map(|id| format!(" for {id}")).unwrap_or_default())]
    Cancelled {
        kind: OperationKind,
        container_id: Option<ContainerId>,
    },

    #[error("no such address owned by {container_id}")]
    NoSuchAddress { container_id: ContainerId },

    #[error("{0} is outside the configured universe")]
    NotInRange(Addr),

    #[error("{0} has an unknown owner")]
    UnknownOwner(Addr),

    #[error("rings have incompatible {0}")]
    RingIncompatible(&'static str),

    #[error("the donor denied our space request")]
    SpaceRequestDenied { by: PeerName },
}

pub type Result<T> = std::result::Result<T, SyncError>;
