//! Core type definitions for the IPAM core.
//!
//! This crate defines the fundamental, transport-agnostic types shared by
//! every other crate in the workspace:
//! - Peer identity ([`PeerName`], [`StartupUid`])
//! - Address arithmetic ([`Addr`], [`Range`])
//! - CIDR parsing, delegated to the `ipnetwork` crate ([`Cidr`])
//!
//! Domain logic (ring ownership, space accounting, consensus) belongs in the
//! crates downstream of this one, not here.

mod addr;
mod cidr;
mod peer;

pub use addr::{Addr, Range};
pub use cidr::Cidr;
pub use peer::{PeerName, StartupUid};

/// Identifies the container a range of addresses has been handed out to.
pub type ContainerId = String;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur constructing or parsing core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("address {0} is outside the universe {1:?}")]
    OutsideUniverse(Addr, Range),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
