//! Pending client operations: a small polymorphic set with `try` and
//! `cancel` behaviours, modelled as a tagged variant rather than an
//! inheritance hierarchy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use ipam_types::{Addr, Cidr, ContainerId, PeerName, Range};
use tokio::sync::oneshot;

use crate::error::{OperationKind, Result, SyncError};

/// Identity of a queued operation, assigned at enqueue time and handed
/// back to the caller so cancellation can target it unambiguously instead
/// of matching on the (mutable, re-ordered) queue contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

impl OpId {
    pub fn next() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct AllocateOp {
    pub id: OpId,
    pub container_id: ContainerId,
    pub subrange: Range,
    pub preferred: Option<Range>,
    pub cancel_probe: Box<dyn Fn() -> bool + Send + Sync>,
    pub reply: Option<oneshot::Sender<Result<Addr>>>,
}

pub struct ClaimOp {
    pub id: OpId,
    pub container_id: ContainerId,
    pub cidr: Cidr,
    pub no_error_on_unknown: bool,
    pub reply: Option<oneshot::Sender<Result<()>>>,
    /// Peers that have told us `SPACE_REQUEST_DENIED` for this claim's
    /// address; consulted so the claim fails once its only plausible
    /// owners have all refused, rather than retrying forever.
    pub denied_by: HashSet<PeerName>,
}

pub struct ConsenseOp {
    pub id: OpId,
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

pub enum PendingOp {
    Allocate(AllocateOp),
    Claim(ClaimOp),
    Consense(ConsenseOp),
}

impl PendingOp {
    pub fn id(&self) -> OpId {
        match self {
            Self::Allocate(op) => op.id,
            Self::Claim(op) => op.id,
            Self::Consense(op) => op.id,
        }
    }

    pub fn container_id(&self) -> Option<&ContainerId> {
        match self {
            Self::Allocate(op) => Some(&op.container_id),
            Self::Claim(op) => Some(&op.container_id),
            Self::Consense(_) => None,
        }
    }

    fn kind(&self) -> OperationKind {
        match self {
            Self::Allocate(_) => OperationKind::Allocate,
            Self::Claim(_) => OperationKind::Claim,
            Self::Consense(_) => OperationKind::Consense,
        }
    }

    /// Unblocks the caller with a cancellation error. Consumes no state
    /// beyond the reply channel — the caller removes this op from its
    /// queue separately.
    pub fn cancel(&mut self) {
        let kind = self.kind();
        let container_id = self.container_id().cloned();
        let err = SyncError::Cancelled { kind, container_id };
        match self {
            Self::Allocate(op) => {
                if let Some(reply) = op.reply.take() {
                    let _ = reply.send(Err(err));
                }
            }
            Self::Claim(op) => {
                if let Some(reply) = op.reply.take() {
                    let _ = reply.send(Err(err));
                }
            }
            Self::Consense(op) => {
                if let Some(reply) = op.reply.take() {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }
}
