//! The ring CRDT: a replicated, conflict-free map from address ranges to
//! owning peers.
//!
//! A [`Ring`] partitions a fixed address universe into contiguous entries,
//! each owned by exactly one peer. Ownership changes (grants, transfers)
//! bump a per-entry version so that [`Ring::merge`] can reconcile two
//! divergent views deterministically: higher version wins, equal versions
//! must agree on owner.

mod entry;
mod error;
mod ring;

pub use entry::Entry;
pub use error::{RingError, Result};
pub use ring::Ring;
