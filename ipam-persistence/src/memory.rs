//! An in-memory backend for tests and single-process demos. Never loses
//! data to a crash because there's no durability to begin with — useful
//! for exercising the allocator's persistence calls without a real store.

use std::collections::HashMap;

use async_trait::async_trait;
use ipam_ring::Ring;
use ipam_types::{Cidr, ContainerId, PeerName};
use tokio::sync::Mutex;

use crate::backend::PersistenceBackend;
use crate::error::Result;

#[derive(Debug, Default)]
struct State {
    peername: Option<PeerName>,
    ring: Option<Ring>,
    owned: HashMap<ContainerId, Vec<Cidr>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load_peername(&self) -> Result<Option<PeerName>> {
        Ok(self.state.lock().await.peername)
    }

    async fn load_ring(&self) -> Result<Option<Ring>> {
        Ok(self.state.lock().await.ring.clone())
    }

    async fn load_owned_addresses(&self) -> Result<HashMap<ContainerId, Vec<Cidr>>> {
        Ok(self.state.lock().await.owned.clone())
    }

    async fn save_peername(&self, name: PeerName) -> Result<()> {
        self.state.lock().await.peername = Some(name);
        Ok(())
    }

    async fn save_ring(&self, ring: &Ring) -> Result<()> {
        self.state.lock().await.ring = Some(ring.clone());
        Ok(())
    }

    async fn save_owned_addresses(&self, owned: &HashMap<ContainerId, Vec<Cidr>>) -> Result<()> {
        self.state.lock().await.owned = owned.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_types::{Addr, Range};

    #[tokio::test]
    async fn round_trips_peername_and_ring() {
        let backend = MemoryBackend::new();
        let name = PeerName::new(7);
        let ring = Ring::new(Range::new(Addr(0), Addr(10)), name);

        backend.save_ring_and_peername(name, &ring).await.unwrap();

        assert_eq!(backend.load_peername().await.unwrap(), Some(name));
        assert_eq!(backend.load_ring().await.unwrap(), Some(ring));
    }

    #[tokio::test]
    async fn owned_addresses_default_to_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.load_owned_addresses().await.unwrap().is_empty());
    }
}
