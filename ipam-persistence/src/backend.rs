use std::collections::HashMap;

use async_trait::async_trait;
use ipam_ring::Ring;
use ipam_types::{Cidr, ContainerId, PeerName};

use crate::error::Result;

/// The three keys this crate persists: peer identity, ring state, and the
/// container-to-addresses map. The actual storage engine is an external
/// collaborator — this trait is the only contract the allocator depends
/// on.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn load_peername(&self) -> Result<Option<PeerName>>;
    async fn load_ring(&self) -> Result<Option<Ring>>;
    async fn load_owned_addresses(&self) -> Result<HashMap<ContainerId, Vec<Cidr>>>;

    async fn save_peername(&self, name: PeerName) -> Result<()>;
    async fn save_ring(&self, ring: &Ring) -> Result<()>;
    async fn save_owned_addresses(&self, owned: &HashMap<ContainerId, Vec<Cidr>>) -> Result<()>;

    /// Saves peer identity and ring together. The backend isn't assumed to
    /// be transactional across the two keys; implementations that can
    /// offer a single atomic write (WAL, rename-over) should override this
    /// default to do so.
    async fn save_ring_and_peername(&self, name: PeerName, ring: &Ring) -> Result<()> {
        self.save_peername(name).await?;
        self.save_ring(ring).await
    }
}
