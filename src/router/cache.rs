// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::kv::Key;
use crate::region::{Region, RegionId, StoreId};
use crate::store::Store;

/// Process-wide cache of region routes and store handles.
///
/// Lookups take the read path; mutations (insert on miss, invalidation,
/// leader rewrites) briefly take the write path. A lookup racing an
/// invalidation may observe either state — invalidation only ever sends
/// the caller back to the metadata service.
#[derive(Default)]
pub struct RegionCache {
    regions: RwLock<RegionMap>,
    stores: RwLock<HashMap<StoreId, Arc<Store>>>,
}

#[derive(Default)]
struct RegionMap {
    by_id: HashMap<RegionId, Region>,
    /// Interval index: start key → region id.
    by_start: BTreeMap<Key, RegionId>,
}

impl RegionCache {
    pub fn get_by_key(&self, key: &Key) -> Option<Region> {
        let map = self.regions.read().unwrap();
        let (_, id) = map.by_start.range(..=key).next_back()?;
        let region = map.by_id.get(id)?;
        if region.contains(key) {
            Some(region.clone())
        } else {
            None
        }
    }

    pub fn get_by_id(&self, id: RegionId) -> Option<Region> {
        self.regions.read().unwrap().by_id.get(&id).cloned()
    }

    /// Inserts fresh routing, evicting every cached entry the new range
    /// overlaps. When an overlapped entry carries a strictly newer epoch
    /// the insert is dropped instead and the cache keeps what it has.
    pub fn insert(&self, region: Region) {
        let mut map = self.regions.write().unwrap();
        let overlapped: Vec<Region> = map
            .by_id
            .values()
            .filter(|r| r.id() == region.id() || r.overlaps(&region))
            .cloned()
            .collect();
        if overlapped.iter().any(|r| r.epoch() > region.epoch()) {
            debug!(
                "ignoring route for region {}: cache holds a newer epoch",
                region.id()
            );
            return;
        }
        for old in overlapped {
            map.by_start.remove(old.start_key());
            map.by_id.remove(&old.id());
        }
        map.by_start.insert(region.start_key().clone(), region.id());
        map.by_id.insert(region.id(), region);
    }

    pub fn invalidate(&self, id: RegionId) {
        let mut map = self.regions.write().unwrap();
        if let Some(old) = map.by_id.remove(&id) {
            map.by_start.remove(old.start_key());
            debug!("invalidated cached route for region {}", id);
        }
    }

    /// Rewrites the cached leader peer in place; range and epoch are
    /// untouched. A store hosting no peer of the region is ignored.
    pub fn update_leader(&self, id: RegionId, store_id: StoreId) {
        let mut map = self.regions.write().unwrap();
        if let Some(region) = map.by_id.get_mut(&id) {
            match region.with_leader(store_id) {
                Some(updated) => {
                    debug!("leader of region {} moved to store {}", id, store_id);
                    *region = updated;
                }
                None => warn!("no peer of region {} lives on store {}", id, store_id),
            }
        }
    }

    pub fn store(&self, id: StoreId) -> Option<Arc<Store>> {
        self.stores.read().unwrap().get(&id).cloned()
    }

    /// Caches `store`, returning the winning handle: an existing valid
    /// entry is kept, an invalidated one is replaced.
    pub fn insert_store(&self, store: Arc<Store>) -> Arc<Store> {
        let mut stores = self.stores.write().unwrap();
        let entry = stores.entry(store.id()).or_insert_with(|| store.clone());
        if !entry.is_valid() {
            *entry = store;
        }
        entry.clone()
    }

    /// Marks the handle invalid (so in-flight holders skip it) and drops
    /// it from the cache.
    pub fn invalidate_store(&self, id: StoreId) {
        if let Some(store) = self.stores.write().unwrap().remove(&id) {
            store.invalidate();
            debug!("invalidated store {}", id);
        }
    }
}
