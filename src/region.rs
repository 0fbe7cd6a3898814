// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Region identities: the shard unit the router maps keys onto.

use std::fmt;

use derive_new::new;

use crate::kv::Key;

pub type RegionId = u64;
pub type StoreId = u64;

/// `(conf_ver, version)` identifying a region's membership and split
/// history. A change in either component invalidates cached routing.
///
/// The derived ordering compares `conf_ver` first; the cache uses it to
/// decide which of two overlapping route entries is the freshest.
#[derive(new, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

/// A replica of a region hosted on a specific store.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: u64,
    pub store_id: StoreId,
}

/// A contiguous key-range shard: identity, the half-open range
/// `[start, end)`, the replica list, and the peer currently believed to
/// lead it.
#[derive(Clone, PartialEq, Eq)]
pub struct Region {
    id: RegionId,
    epoch: RegionEpoch,
    start_key: Key,
    end_key: Key,
    peers: Vec<Peer>,
    leader: Peer,
}

impl Region {
    /// `peers` must be non-empty and contain `leader`.
    pub fn new(
        id: RegionId,
        epoch: RegionEpoch,
        start_key: impl Into<Key>,
        end_key: impl Into<Key>,
        peers: Vec<Peer>,
        leader: Peer,
    ) -> Region {
        assert!(!peers.is_empty(), "region {} has no peers", id);
        assert!(
            peers.contains(&leader),
            "leader of region {} is not one of its peers",
            id
        );
        Region {
            id,
            epoch,
            start_key: start_key.into(),
            end_key: end_key.into(),
            peers,
            leader,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn epoch(&self) -> RegionEpoch {
        self.epoch
    }

    pub fn start_key(&self) -> &Key {
        &self.start_key
    }

    /// The exclusive end of the range; empty means "+∞".
    pub fn end_key(&self) -> &Key {
        &self.end_key
    }

    pub fn leader(&self) -> Peer {
        self.leader
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// The non-leader peers, in peer order.
    pub fn followers(&self) -> impl Iterator<Item = Peer> + '_ {
        let leader = self.leader;
        self.peers.iter().copied().filter(move |p| *p != leader)
    }

    /// Half-open containment: `start ≤ key < end`, with an empty start
    /// meaning "−∞" and an empty end meaning "+∞".
    pub fn contains(&self, key: &Key) -> bool {
        *key >= self.start_key && (self.end_key.is_empty() || *key < self.end_key)
    }

    pub(crate) fn overlaps(&self, other: &Region) -> bool {
        (other.end_key.is_empty() || self.start_key < other.end_key)
            && (self.end_key.is_empty() || other.start_key < self.end_key)
    }

    /// The same region with the leader rewritten to the peer living on
    /// `store_id`; range and epoch are untouched. `None` when no peer
    /// lives on that store.
    pub fn with_leader(&self, store_id: StoreId) -> Option<Region> {
        let leader = self.peers.iter().copied().find(|p| p.store_id == store_id)?;
        let mut region = self.clone();
        region.leader = leader;
        Some(region)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("range", &(&self.start_key, &self.end_key))
            .field("leader", &self.leader)
            .finish()
    }
}
