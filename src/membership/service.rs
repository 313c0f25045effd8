use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use super::types::{GrowOnlySet, ReplicaAddress, ReplicaId};

/// Thread-safe registry of every replica address this node has ever learned.
///
/// Addresses enter through configuration, join requests and lease renewals;
/// nothing removes them. Address -> id bindings are learned separately when a
/// peer answers a leader-info probe, since configuration only lists addresses.
pub struct MembershipStore {
    local_id: ReplicaId,
    local_address: ReplicaAddress,
    addresses: RwLock<GrowOnlySet<ReplicaAddress>>,
    ids: DashMap<ReplicaAddress, ReplicaId>,
}

impl MembershipStore {
    pub fn new<I>(local_id: ReplicaId, local_address: ReplicaAddress, seeds: I) -> Arc<Self>
    where
        I: IntoIterator<Item = ReplicaAddress>,
    {
        let mut addresses: GrowOnlySet<ReplicaAddress> = seeds
            .into_iter()
            .filter(|addr| !addr.is_placeholder())
            .collect();
        addresses.insert(local_address.clone());

        let ids = DashMap::new();
        ids.insert(local_address.clone(), local_id);

        Arc::new(Self {
            local_id,
            local_address,
            addresses: RwLock::new(addresses),
            ids,
        })
    }

    pub fn local_id(&self) -> ReplicaId {
        self.local_id
    }

    pub fn local_address(&self) -> &ReplicaAddress {
        &self.local_address
    }

    /// Full membership list, self included.
    pub fn addresses(&self) -> Vec<ReplicaAddress> {
        self.addresses.read().to_vec()
    }

    /// Every known address except this node's own.
    pub fn peers(&self) -> Vec<ReplicaAddress> {
        self.addresses
            .read()
            .iter()
            .filter(|addr| **addr != self.local_address)
            .cloned()
            .collect()
    }

    pub fn contains(&self, address: &ReplicaAddress) -> bool {
        self.addresses.read().contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    /// Records a join. Returns `true` if the address was new.
    pub fn join(&self, address: ReplicaAddress) -> bool {
        if address.is_placeholder() {
            return false;
        }
        let added = self.addresses.write().insert(address.clone());
        if added {
            tracing::info!("Replica {} joined, membership size {}", address, self.len());
        }
        added
    }

    /// Unions a remote membership view into ours. Returns how many addresses were new.
    pub fn merge<I>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = ReplicaAddress>,
    {
        let added = self
            .addresses
            .write()
            .merge(addresses.into_iter().filter(|addr| !addr.is_placeholder()));
        if added > 0 {
            tracing::info!("Learned {} new replica(s), membership size {}", added, self.len());
        }
        added
    }

    /// Binds an address to the id its owner reported.
    ///
    /// A restarted process may come back on the same address with another id;
    /// the latest report wins.
    pub fn record_id(&self, address: &ReplicaAddress, id: ReplicaId) {
        if address == &self.local_address {
            return;
        }
        match self.ids.insert(address.clone(), id) {
            Some(previous) if previous != id => {
                tracing::warn!("Replica at {} changed id {} -> {}", address, previous, id);
            }
            Some(_) => {}
            None => tracing::debug!("Learned replica {} at {}", id, address),
        }
    }

    pub fn id_of(&self, address: &ReplicaAddress) -> Option<ReplicaId> {
        self.ids.get(address).map(|entry| *entry.value())
    }
}
