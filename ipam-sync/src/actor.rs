//! The single-threaded allocator actor: a command channel feeding a
//! dedicated task that owns the only live [`Allocator`], plus the tick
//! timer. Callers never touch allocator state directly, only send
//! commands and (for synchronous calls) await a reply channel.

use std::sync::Arc;

use ipam_persistence::PersistenceBackend;
use ipam_types::{Addr, Cidr, ContainerId, PeerName, Range};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::engine::Allocator;
use crate::error::Result;
use crate::pending::{AllocateOp, ClaimOp, ConsenseOp, OpId, PendingOp};
use crate::protocol::GossipBlob;
use crate::protocol::UnicastMessage;
use crate::transport::GossipTransport;

const COMMAND_BUFFER: usize = 256;

enum Command {
    Allocate {
        container_id: ContainerId,
        subrange: Range,
        preferred: Option<Range>,
        cancel_probe: Box<dyn Fn() -> bool + Send + Sync>,
        reply: oneshot::Sender<Result<Addr>>,
    },
    Claim {
        container_id: ContainerId,
        cidr: Cidr,
        no_error_on_unknown: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Lookup {
        container_id: ContainerId,
        range: Range,
        reply: oneshot::Sender<Vec<Cidr>>,
    },
    Free {
        container_id: ContainerId,
        addr: Addr,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        container_id: ContainerId,
        reply: oneshot::Sender<Result<()>>,
    },
    Consense {
        reply: oneshot::Sender<Result<()>>,
    },
    ContainerStarted(ContainerId),
    ContainerDied(ContainerId),
    ContainerDestroyed(ContainerId),
    AllContainerIds(Vec<ContainerId>),
    OnUnicast {
        from: PeerName,
        msg: UnicastMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    OnBroadcast {
        from: PeerName,
        blob: GossipBlob,
        reply: oneshot::Sender<Result<()>>,
    },
    OnAnonymousGossip {
        blob: GossipBlob,
        reply: oneshot::Sender<Result<()>>,
    },
    AdminTakeoverRanges {
        peer_or_nickname: String,
        reply: oneshot::Sender<Result<u32>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A cheaply-cloned reference to a running allocator actor.
#[derive(Clone)]
pub struct AllocatorHandle {
    command_tx: mpsc::Sender<Command>,
}

/// Disconnection here means the actor task panicked; there's no sensible
/// client-facing error to recover into, so callers see a panic too.
const ACTOR_GONE: &str = "allocator actor task is not running";

impl AllocatorHandle {
    pub async fn allocate(
        &self,
        container_id: ContainerId,
        subrange: Range,
        preferred: Option<Range>,
        cancel_probe: Box<dyn Fn() -> bool + Send + Sync>,
    ) -> Result<Addr> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Allocate {
            container_id,
            subrange,
            preferred,
            cancel_probe,
            reply,
        })
        .await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn claim(
        &self,
        container_id: ContainerId,
        cidr: Cidr,
        no_error_on_unknown: bool,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Claim {
            container_id,
            cidr,
            no_error_on_unknown,
            reply,
        })
        .await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn lookup(&self, container_id: ContainerId, range: Range) -> Vec<Cidr> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Lookup {
            container_id,
            range,
            reply,
        })
        .await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn free(&self, container_id: ContainerId, addr: Addr) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Free {
            container_id,
            addr,
            reply,
        })
        .await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn delete(&self, container_id: ContainerId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Delete { container_id, reply }).await;
        rx.await.expect(ACTOR_GONE)
    }

    /// Blocks until the ring is non-empty.
    pub async fn consense(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Consense { reply }).await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn container_started(&self, container_id: ContainerId) {
        self.send(Command::ContainerStarted(container_id)).await;
    }

    pub async fn container_died(&self, container_id: ContainerId) {
        self.send(Command::ContainerDied(container_id)).await;
    }

    pub async fn container_destroyed(&self, container_id: ContainerId) {
        self.send(Command::ContainerDestroyed(container_id)).await;
    }

    pub async fn all_container_ids(&self, ids: Vec<ContainerId>) {
        self.send(Command::AllContainerIds(ids)).await;
    }

    pub async fn on_unicast(&self, from: PeerName, msg: UnicastMessage) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnUnicast { from, msg, reply }).await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn on_broadcast(&self, from: PeerName, blob: GossipBlob) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnBroadcast { from, blob, reply }).await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn on_anonymous_gossip(&self, blob: GossipBlob) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnAnonymousGossip { blob, reply }).await;
        rx.await.expect(ACTOR_GONE)
    }

    pub async fn admin_takeover_ranges(&self, peer_or_nickname: impl Into<String>) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AdminTakeoverRanges {
            peer_or_nickname: peer_or_nickname.into(),
            reply,
        })
        .await;
        rx.await.expect(ACTOR_GONE)
    }

    /// Requests an orderly shutdown and waits for the heir handover and
    /// flush sleep to complete.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await;
        let _ = rx.await;
    }

    async fn send(&self, command: Command) {
        let _ = self.command_tx.send(command).await;
    }
}

/// Spawns the actor task and returns a handle to it.
pub fn spawn(
    config: Config,
    persistence: Arc<dyn PersistenceBackend>,
    transport: Arc<dyn GossipTransport>,
) -> (AllocatorHandle, JoinHandle<Result<()>>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let handle = AllocatorHandle { command_tx };
    let tick_interval = config.tick_interval;
    let join = tokio::spawn(async move {
        let core = Allocator::restore(config, persistence, transport).await?;
        run(core, command_rx, tick_interval).await;
        Ok(())
    });
    (handle, join)
}

async fn run(mut core: Allocator, mut command_rx: mpsc::Receiver<Command>, tick_interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(command) => {
                        let shutting_down = matches!(command, Command::Shutdown { .. });
                        handle_command(&mut core, command).await;
                        if shutting_down {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                core.tick().await;
            }
        }
    }
}

async fn handle_command(core: &mut Allocator, command: Command) {
    match command {
        Command::Allocate {
            container_id,
            subrange,
            preferred,
            cancel_probe,
            reply,
        } => {
            let mut op = AllocateOp {
                id: OpId::next(),
                container_id,
                subrange,
                preferred,
                cancel_probe,
                reply: Some(reply),
            };
            match core.try_allocate(&mut op).await {
                Some(addr) => reply_to(op.reply, Ok(addr)),
                None => core.enqueue(PendingOp::Allocate(op)),
            }
        }
        Command::Claim {
            container_id,
            cidr,
            no_error_on_unknown,
            reply,
        } => {
            let mut op = ClaimOp {
                id: OpId::next(),
                container_id,
                cidr,
                no_error_on_unknown,
                reply: Some(reply),
                denied_by: Default::default(),
            };
            match core.try_claim(&mut op).await {
                Some(result) => reply_to(op.reply, result),
                None => core.enqueue(PendingOp::Claim(op)),
            }
        }
        Command::Lookup {
            container_id,
            range,
            reply,
        } => {
            let _ = reply.send(core.lookup(&container_id, range));
        }
        Command::Free {
            container_id,
            addr,
            reply,
        } => {
            let result = core.free(&container_id, addr).await;
            let _ = reply.send(result);
        }
        Command::Delete { container_id, reply } => {
            let result = core.delete(&container_id).await;
            let _ = reply.send(result);
        }
        Command::Consense { reply } => {
            if core.is_ring_ready() {
                let _ = reply.send(Ok(()));
            } else {
                core.enqueue(PendingOp::Consense(ConsenseOp {
                    id: OpId::next(),
                    reply: Some(reply),
                }));
            }
        }
        Command::ContainerStarted(id) => core.container_started(&id),
        Command::ContainerDied(id) => core.container_died(&id),
        Command::ContainerDestroyed(id) => core.container_destroyed(&id).await,
        Command::AllContainerIds(ids) => core.all_container_ids(&ids).await,
        Command::OnUnicast { from, msg, reply } => {
            let result = core.on_unicast(from, msg).await;
            let _ = reply.send(result);
        }
        Command::OnBroadcast { from, blob, reply } => {
            let result = core.on_broadcast(from, blob).await;
            let _ = reply.send(result);
        }
        Command::OnAnonymousGossip { blob, reply } => {
            let result = core.on_anonymous_gossip(blob).await;
            let _ = reply.send(result);
        }
        Command::AdminTakeoverRanges {
            peer_or_nickname,
            reply,
        } => {
            let result = core.admin_takeover_ranges(&peer_or_nickname).await;
            let _ = reply.send(result);
        }
        Command::Shutdown { reply } => {
            core.shutdown().await;
            let _ = reply.send(());
        }
    }
}

fn reply_to<T>(reply: Option<oneshot::Sender<Result<T>>>, result: Result<T>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
