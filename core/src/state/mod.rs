//! Location index built from immutable state fragments.
//!
//! Every write session produces one [`StateFragment`] holding new blob
//! locations, new packfiles and deletion tombstones. The aggregate
//! ([`LocalState`]) is the union of all fragments a repository holds, replayed
//! in `(serial, id)` order, so it can always be recomputed from scratch.

mod cache;

pub use cache::{DiskCache, MemoryCache, StateCache};

use crate::resources::{ResourceType, FORMAT_VERSION};
use crate::{Error, Mac, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a blob's encoded bytes live inside a packfile payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub packfile: Mac,
    pub offset: u64,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    pub serial: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub resource: ResourceType,
    pub mac: Mac,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub resource: ResourceType,
    pub mac: Mac,
    pub when: DateTime<Utc>,
}

/// One immutable, independently persisted set of index deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFragment {
    pub metadata: Metadata,
    pub locations: Vec<LocationEntry>,
    pub packfiles: Vec<Mac>,
    pub deleted: Vec<Tombstone>,
}

impl StateFragment {
    pub fn new(serial: u64) -> Self {
        Self {
            metadata: Metadata {
                version: FORMAT_VERSION,
                serial,
                timestamp: Utc::now(),
            },
            locations: Vec::new(),
            packfiles: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.packfiles.is_empty() && self.deleted.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a fragment whose envelope declared `version`.
    pub fn from_bytes(version: u32, data: &[u8]) -> Result<Self> {
        if !ResourceType::State.is_supported_version(version) {
            return Err(Error::InvalidFormatVersion {
                resource: ResourceType::State.to_string(),
                version,
            });
        }
        let fragment: StateFragment = bincode::deserialize(data)
            .map_err(|e| Error::Format(format!("malformed state fragment: {}", e)))?;
        Ok(fragment)
    }
}

/// Fragment under construction by a writer, with a lookup index over the
/// locations it already holds.
#[derive(Debug, Clone)]
pub struct DeltaState {
    fragment: StateFragment,
    index: HashMap<(ResourceType, Mac), Location>,
}

impl DeltaState {
    pub fn new(serial: u64) -> Self {
        Self {
            fragment: StateFragment::new(serial),
            index: HashMap::new(),
        }
    }

    pub fn serial(&self) -> u64 {
        self.fragment.metadata.serial
    }

    pub fn put_location(&mut self, resource: ResourceType, mac: Mac, location: Location) {
        if self.index.insert((resource, mac), location).is_none() {
            self.fragment.locations.push(LocationEntry {
                resource,
                mac,
                location,
            });
        }
    }

    pub fn put_packfile(&mut self, mac: Mac) {
        if !self.fragment.packfiles.contains(&mac) {
            self.fragment.packfiles.push(mac);
        }
    }

    /// Records a tombstone for `(resource, mac)`.
    pub fn delete_resource(&mut self, resource: ResourceType, mac: Mac) {
        self.fragment.deleted.push(Tombstone {
            resource,
            mac,
            when: Utc::now(),
        });
    }

    pub fn blob_exists(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.index.contains_key(&(resource, *mac))
    }

    pub fn get_location(&self, resource: ResourceType, mac: &Mac) -> Option<Location> {
        self.index.get(&(resource, *mac)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fragment.is_empty()
    }

    pub fn fragment(&self) -> &StateFragment {
        &self.fragment
    }

    pub fn into_fragment(self) -> StateFragment {
        self.fragment
    }
}

type FragmentKey = (u64, Mac);

/// Aggregate view over every fragment a repository session knows about.
pub struct LocalState {
    cache: Arc<dyn StateCache>,
    fragments: BTreeMap<Mac, StateFragment>,
    serial: u64,
    locations: HashMap<(ResourceType, Mac), (FragmentKey, Location)>,
    packfiles: HashSet<Mac>,
    deleted: HashSet<(ResourceType, Mac)>,
}

impl LocalState {
    pub fn new(cache: Arc<dyn StateCache>) -> Self {
        Self {
            cache,
            fragments: BTreeMap::new(),
            serial: 0,
            locations: HashMap::new(),
            packfiles: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    /// Loads every fragment held by `cache`. Cached entries that no longer
    /// decode are evicted so the next rebuild fetches them again.
    pub async fn from_cache(cache: Arc<dyn StateCache>) -> Result<Self> {
        let mut state = Self::new(cache.clone());
        for id in cache.get_states().await? {
            let data = cache.get_state(&id).await?;
            match bincode::deserialize::<StateFragment>(&data) {
                Ok(fragment) => state.apply(id, fragment),
                Err(e) => {
                    warn!(state = %id, error = %e, "Dropping undecodable cached state");
                    cache.del_state(&id).await?;
                }
            }
        }
        debug!(fragments = state.fragments.len(), "Loaded cached state");
        Ok(state)
    }

    /// Merges a fragment fetched from the repository and records it in the cache.
    pub async fn merge(&mut self, id: Mac, fragment: StateFragment) -> Result<()> {
        self.cache.put_state(&id, &fragment.to_bytes()?).await?;
        self.apply(id, fragment);
        Ok(())
    }

    /// Evicts a fragment from the aggregate and from the cache.
    pub async fn del_state(&mut self, id: &Mac) -> Result<()> {
        self.cache.del_state(id).await?;
        if self.fragments.remove(id).is_some() {
            self.reindex();
        }
        Ok(())
    }

    fn apply(&mut self, id: Mac, fragment: StateFragment) {
        let key = (fragment.metadata.serial, id);
        self.index_fragment(key, &fragment);
        self.serial = self.serial.max(fragment.metadata.serial);
        self.fragments.insert(id, fragment);
    }

    fn index_fragment(&mut self, key: FragmentKey, fragment: &StateFragment) {
        for entry in &fragment.locations {
            let slot = (entry.resource, entry.mac);
            match self.locations.get(&slot) {
                Some((existing, _)) if *existing <= key => {}
                _ => {
                    self.locations.insert(slot, (key, entry.location));
                }
            }
        }
        self.packfiles.extend(fragment.packfiles.iter().copied());
        self.deleted
            .extend(fragment.deleted.iter().map(|t| (t.resource, t.mac)));
    }

    fn reindex(&mut self) {
        self.locations.clear();
        self.packfiles.clear();
        self.deleted.clear();
        self.serial = 0;

        let fragments = std::mem::take(&mut self.fragments);
        for (id, fragment) in &fragments {
            self.index_fragment((fragment.metadata.serial, *id), fragment);
            self.serial = self.serial.max(fragment.metadata.serial);
        }
        self.fragments = fragments;
    }

    pub fn list_states(&self) -> Vec<Mac> {
        self.fragments.keys().copied().collect()
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Raises the serial to at least `seed`.
    pub fn update_serial_or(&mut self, seed: u64) {
        self.serial = self.serial.max(seed);
    }

    /// Opens a new delta for accumulating writes, numbered after every
    /// fragment merged so far.
    pub fn derive(&self) -> DeltaState {
        DeltaState::new(self.serial.wrapping_add(1))
    }

    pub fn get_subpart_for_blob(&self, resource: ResourceType, mac: &Mac) -> Option<Location> {
        self.locations.get(&(resource, *mac)).map(|(_, loc)| *loc)
    }

    pub fn blob_exists(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.locations.contains_key(&(resource, *mac))
    }

    pub fn has_deleted_resource(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.deleted.contains(&(resource, *mac))
    }

    /// Live snapshots: snapshot headers with a location and no tombstone.
    pub fn list_snapshots(&self) -> Vec<Mac> {
        let mut snapshots: Vec<Mac> = self
            .locations
            .keys()
            .filter(|(resource, mac)| {
                *resource == ResourceType::Snapshot
                    && !self.deleted.contains(&(ResourceType::Snapshot, *mac))
            })
            .map(|(_, mac)| *mac)
            .collect();
        snapshots.sort();
        snapshots
    }

    pub fn list_packfiles(&self) -> Vec<Mac> {
        let mut packfiles: Vec<Mac> = self
            .packfiles
            .iter()
            .filter(|mac| !self.deleted.contains(&(ResourceType::Packfile, **mac)))
            .copied()
            .collect();
        packfiles.sort();
        packfiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> Mac {
        Mac::new([n; 32])
    }

    fn location(pack: u8, offset: u64) -> Location {
        Location {
            packfile: mac(pack),
            offset,
            length: 10,
        }
    }

    fn fragment(serial: u64, blobs: &[(ResourceType, u8, u8)]) -> StateFragment {
        let mut delta = DeltaState::new(serial);
        for (resource, id, pack) in blobs {
            delta.put_location(*resource, mac(*id), location(*pack, *id as u64));
            delta.put_packfile(mac(*pack));
        }
        delta.into_fragment()
    }

    #[test]
    fn test_fragment_encoding() {
        let mut delta = DeltaState::new(7);
        delta.put_location(ResourceType::Chunk, mac(1), location(9, 0));
        delta.put_location(ResourceType::Chunk, mac(1), location(9, 0));
        delta.put_packfile(mac(9));
        delta.delete_resource(ResourceType::Snapshot, mac(3));
        assert!(delta.blob_exists(ResourceType::Chunk, &mac(1)));
        assert!(!delta.blob_exists(ResourceType::Object, &mac(1)));

        let fragment = delta.into_fragment();
        assert_eq!(fragment.locations.len(), 1);
        let bytes = fragment.to_bytes().unwrap();
        assert_eq!(StateFragment::from_bytes(FORMAT_VERSION, &bytes).unwrap(), fragment);
        assert!(StateFragment::from_bytes(FORMAT_VERSION, b"garbage").is_err());
        assert!(StateFragment::from_bytes(500, &bytes).is_err());
    }

    #[tokio::test]
    async fn test_queries() {
        let mut state = LocalState::new(Arc::new(MemoryCache::new()));
        state
            .merge(
                mac(100),
                fragment(
                    1,
                    &[(ResourceType::Snapshot, 1, 50), (ResourceType::Snapshot, 2, 50)],
                ),
            )
            .await
            .unwrap();

        assert_eq!(state.list_snapshots(), vec![mac(1), mac(2)]);
        assert_eq!(state.list_packfiles(), vec![mac(50)]);
        assert_eq!(
            state.get_subpart_for_blob(ResourceType::Snapshot, &mac(1)),
            Some(location(50, 1))
        );
        assert!(state
            .get_subpart_for_blob(ResourceType::Chunk, &mac(1))
            .is_none());

        let mut delta = state.derive();
        assert_eq!(delta.serial(), 2);
        delta.delete_resource(ResourceType::Snapshot, mac(1));
        state.merge(mac(101), delta.into_fragment()).await.unwrap();

        assert!(state.has_deleted_resource(ResourceType::Snapshot, &mac(1)));
        assert_eq!(state.list_snapshots(), vec![mac(2)]);
        assert_eq!(state.serial(), 2);
    }

    #[tokio::test]
    async fn test_serial_seed() {
        let mut state = LocalState::new(Arc::new(MemoryCache::new()));
        state.update_serial_or(1000);
        assert_eq!(state.derive().serial(), 1001);
        state.update_serial_or(10);
        assert_eq!(state.serial(), 1000);
    }

    #[tokio::test]
    async fn test_location_conflicts_resolve_by_fragment_order() {
        let early = fragment(1, &[(ResourceType::Chunk, 1, 10)]);
        let late = fragment(2, &[(ResourceType::Chunk, 1, 20)]);

        let mut forward = LocalState::new(Arc::new(MemoryCache::new()));
        forward.merge(mac(200), early.clone()).await.unwrap();
        forward.merge(mac(201), late.clone()).await.unwrap();

        let mut backward = LocalState::new(Arc::new(MemoryCache::new()));
        backward.merge(mac(201), late).await.unwrap();
        backward.merge(mac(200), early).await.unwrap();

        let expected = Some(location(10, 1));
        assert_eq!(forward.get_subpart_for_blob(ResourceType::Chunk, &mac(1)), expected);
        assert_eq!(backward.get_subpart_for_blob(ResourceType::Chunk, &mac(1)), expected);

        backward.del_state(&mac(200)).await.unwrap();
        assert_eq!(
            backward.get_subpart_for_blob(ResourceType::Chunk, &mac(1)),
            Some(location(20, 1))
        );
    }

    #[tokio::test]
    async fn test_from_cache_restores_and_evicts_corrupt() {
        let cache = Arc::new(MemoryCache::new());
        let good = fragment(3, &[(ResourceType::Object, 4, 40)]);
        cache.put_state(&mac(1), &good.to_bytes().unwrap()).await.unwrap();
        cache.put_state(&mac(2), b"not a fragment").await.unwrap();

        let state = LocalState::from_cache(cache.clone()).await.unwrap();
        assert_eq!(state.list_states(), vec![mac(1)]);
        assert!(state.blob_exists(ResourceType::Object, &mac(4)));
        assert_eq!(state.serial(), 3);
        assert_eq!(cache.get_states().await.unwrap(), vec![mac(1)]);
    }
}
