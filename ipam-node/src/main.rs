//! IPAM allocator node
//!
//! Wires CLI configuration, logging, and the allocator actor together into
//! a runnable process. The gossip transport and the real key/value backend
//! are external collaborators (see `spec.md` §1) with no implementation in
//! this workspace, so this binary runs the actor against the in-memory
//! mock transport and the in-memory persistence backend — enough to prove
//! the actor boots, bootstraps a ring, and serves an allocation, but not a
//! standalone multi-process deployment. A real deployment swaps in a
//! concrete `GossipTransport` and `PersistenceBackend` at this same seam.
//!
//! Usage:
//!   ipam-node --name 1 --universe 10.0.0.0/24 --seed 1,2,3

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ipam_persistence::memory::MemoryBackend;
use ipam_sync::actor;
use ipam_sync::config::Config;
use ipam_sync::transport::mock::MockTransport;
use ipam_types::{Cidr, PeerName, StartupUid};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ipam-node")]
#[command(about = "Distributed IPAM allocator node")]
struct Args {
    /// This peer's identity (a stable 64-bit ID).
    #[arg(short, long)]
    name: u64,

    /// Human-readable label for administrative lookups.
    #[arg(long, default_value = "unnamed")]
    nickname: String,

    /// The address universe this cluster administers, as a CIDR block.
    #[arg(short, long)]
    universe: Cidr,

    /// Comma-separated peer IDs to seed the ring with on first startup.
    /// Omit to wait for Paxos consensus or an incoming ring via gossip.
    #[arg(long, value_delimiter = ',')]
    seed: Vec<u64>,

    /// Participate in Paxos only as an observer.
    #[arg(long)]
    observer: bool,

    /// Quorum size for the initial Paxos round.
    #[arg(long, default_value_t = 1)]
    quorum: usize,

    /// Tick interval, in seconds, for retrying pending operations.
    #[arg(long, default_value_t = 5)]
    tick_interval_secs: u64,

    /// Grace period, in seconds, before a dead container's addresses are
    /// reclaimed.
    #[arg(long, default_value_t = 30)]
    dead_grace_secs: u64,

    /// Enable verbose debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("ipam-node starting");

    let our_name = PeerName::new(args.name);
    let universe = args.universe.to_range();
    let seed = if args.seed.is_empty() {
        None
    } else {
        Some(args.seed.into_iter().map(PeerName::new).collect())
    };

    let config = Config {
        our_name,
        our_uid: StartupUid::generate(),
        our_nickname: args.nickname,
        seed,
        universe,
        is_observer: args.observer,
        get_quorum: Arc::new(move || args.quorum),
        is_known_peer: Arc::new(|_| false),
        tick_interval: Duration::from_secs(args.tick_interval_secs),
        dead_grace_period: Duration::from_secs(args.dead_grace_secs),
    };

    let persistence = Arc::new(MemoryBackend::new());
    let transport = Arc::new(MockTransport::new());
    let (handle, join) = actor::spawn(config, persistence, transport);

    println!("========================================");
    println!("  IPAM Node Running");
    println!("========================================");
    println!("  PeerName: {our_name}");
    println!("  Universe: {universe}");
    println!("========================================\n");

    handle
        .consense()
        .await
        .context("ring never reached consensus before shutdown")?;
    info!("ring is ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down, handing off owned ranges to an heir if one exists");
    handle.shutdown().await;

    join.await.context("actor task panicked")??;
    Ok(())
}
