use ipam_types::PeerName;
use thiserror::Error;

/// Failure modes for ring operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("rings were seeded from different peer sets and cannot be merged")]
    DifferentSeeds,

    #[error("rings cover different address universes and cannot be merged")]
    DifferentRange,

    #[error("conflicting entries at the same version for the same position")]
    Invalid,

    #[error("{0} does not own the requested range")]
    NotOwner(PeerName),

    #[error("ring has already been seeded")]
    AlreadySeeded,

    #[error("requested range is empty")]
    EmptyRange,
}

pub type Result<T> = std::result::Result<T, RingError>;
