// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Key → region routing over a shared cache, with the metadata service as
//! the authority of last resort.

mod cache;

pub use cache::RegionCache;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::kv::Key;
use crate::region::{Region, RegionId, StoreId};
use crate::store::Store;
use crate::util::Deadline;
use crate::{Error, Result};

/// The authoritative region metadata service.
#[async_trait]
pub trait MetaClient: Send + Sync + 'static {
    /// Resolves the region owning `key`.
    async fn locate(&self, key: &Key, deadline: Deadline) -> Result<Region>;

    /// Resolves a store's advertised address.
    async fn find_store(&self, store_id: StoreId, deadline: Deadline) -> Result<String>;
}

/// One grouped slice of a routed key set: all keys lie in `region`'s range
/// and appear in ascending byte order.
#[derive(Clone, Debug)]
pub struct RegionGroup {
    pub region: Region,
    pub keys: Vec<Key>,
}

/// Maps keys to their owning regions through the shared [`RegionCache`],
/// falling back to the metadata service on a miss.
pub struct Router<C> {
    cache: RegionCache,
    meta: Arc<C>,
}

impl<C: MetaClient> Router<C> {
    pub fn new(meta: Arc<C>) -> Router<C> {
        Router {
            cache: RegionCache::default(),
            meta,
        }
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    #[cfg(test)]
    pub(crate) fn meta(&self) -> &Arc<C> {
        &self.meta
    }

    /// The owning region for `key`: cache first, then the metadata
    /// service. Fails with `RoutingUnavailable` once `deadline` elapses.
    pub async fn lookup(&self, key: &Key, deadline: Deadline) -> Result<Region> {
        if deadline.elapsed() {
            return Err(Error::RoutingUnavailable {
                reason: "deadline elapsed before region lookup".to_owned(),
            });
        }
        if let Some(region) = self.cache.get_by_key(key) {
            return Ok(region);
        }
        let region = self.meta.locate(key, deadline).await?;
        debug!(
            "resolved region {} for {:?} from the metadata service",
            region.id(),
            key
        );
        self.cache.insert(region.clone());
        Ok(region)
    }

    /// Partitions `keys` by owning region.
    ///
    /// Duplicates collapse; keys within each group are ascending; the
    /// groups come out in ascending range order. Keys are walked in sorted
    /// order so one lookup amortizes over every key of a region run.
    pub async fn group_by_region(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        deadline: Deadline,
    ) -> Result<Vec<RegionGroup>> {
        let keys: BTreeSet<Key> = keys.into_iter().map(Into::into).collect();
        let mut groups: Vec<RegionGroup> = Vec::new();
        for key in keys {
            match groups.last_mut() {
                Some(group) if group.region.contains(&key) => group.keys.push(key),
                _ => {
                    let region = self.lookup(&key, deadline).await?;
                    groups.push(RegionGroup {
                        region,
                        keys: vec![key],
                    });
                }
            }
        }
        Ok(groups)
    }

    pub fn invalidate(&self, region_id: RegionId) {
        self.cache.invalidate(region_id);
    }

    /// Rewrites the cached leader of `region_id` to the peer on
    /// `new_store_id`, leaving range and epoch untouched.
    pub fn update_leader(&self, region_id: RegionId, new_store_id: StoreId) {
        self.cache.update_leader(region_id, new_store_id);
    }

    /// Drops the cached mapping after a request against it failed, so the
    /// next lookup re-resolves.
    pub fn report_request_fail(&self, region: &Region) {
        debug!(
            "request against region {} failed, dropping its cached route",
            region.id()
        );
        self.cache.invalidate(region.id());
    }

    /// The shared handle for `store_id`, resolved on first use. An
    /// invalidated handle is re-resolved and replaced.
    pub async fn store(&self, store_id: StoreId, deadline: Deadline) -> Result<Arc<Store>> {
        if let Some(store) = self.cache.store(store_id) {
            if store.is_valid() {
                return Ok(store);
            }
        }
        let address = self.meta.find_store(store_id, deadline).await?;
        Ok(self.cache.insert_store(Arc::new(Store::new(store_id, address))))
    }
}
