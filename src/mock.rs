// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Programmable doubles for the collaborator seams, used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::kv::Key;
use crate::region::{Peer, Region, RegionEpoch, RegionId, StoreId};
use crate::router::MetaClient;
use crate::transport::{BatchRequest, BatchResponse, RegionContext, Transport};
use crate::util::Deadline;
use crate::{Error, Result};

pub fn mock_store_address(store_id: StoreId) -> String {
    format!("store-{}:20160", store_id)
}

/// A region whose peers live on `store_ids`, led by the first of them.
pub fn mock_region(id: RegionId, start: &str, end: &str, store_ids: &[StoreId]) -> Region {
    mock_region_with_epoch(id, RegionEpoch::new(1, 1), start, end, store_ids)
}

pub fn mock_region_with_epoch(
    id: RegionId,
    epoch: RegionEpoch,
    start: &str,
    end: &str,
    store_ids: &[StoreId],
) -> Region {
    let peers: Vec<Peer> = store_ids
        .iter()
        .map(|store_id| Peer::new(id * 100 + store_id, *store_id))
        .collect();
    let leader = peers[0];
    Region::new(id, epoch, start, end, peers, leader)
}

/// Scripted metadata service: a replaceable region set, with store
/// addresses derived from the regions' peers.
pub struct MockMeta {
    regions: RwLock<Vec<Region>>,
    locate_calls: AtomicUsize,
    find_store_calls: AtomicUsize,
}

impl MockMeta {
    pub fn new(regions: Vec<Region>) -> MockMeta {
        MockMeta {
            regions: RwLock::new(regions),
            locate_calls: AtomicUsize::new(0),
            find_store_calls: AtomicUsize::new(0),
        }
    }

    pub fn locate_calls(&self) -> usize {
        self.locate_calls.load(Ordering::SeqCst)
    }

    pub fn find_store_calls(&self) -> usize {
        self.find_store_calls.load(Ordering::SeqCst)
    }

    /// Replaces the served routing, e.g. after a simulated split.
    pub fn set_regions(&self, regions: Vec<Region>) {
        *self.regions.write().unwrap() = regions;
    }
}

#[async_trait]
impl MetaClient for MockMeta {
    async fn locate(&self, key: &Key, _deadline: Deadline) -> Result<Region> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        self.regions
            .read()
            .unwrap()
            .iter()
            .find(|r| r.contains(key))
            .cloned()
            .ok_or_else(|| Error::RoutingUnavailable {
                reason: format!("no region serves {:?}", key),
            })
    }

    async fn find_store(&self, store_id: StoreId, _deadline: Deadline) -> Result<String> {
        self.find_store_calls.fetch_add(1, Ordering::SeqCst);
        let known = self
            .regions
            .read()
            .unwrap()
            .iter()
            .any(|r| r.peers().iter().any(|p| p.store_id == store_id));
        if known {
            Ok(mock_store_address(store_id))
        } else {
            Err(Error::RoutingUnavailable {
                reason: format!("no store {}", store_id),
            })
        }
    }
}

/// One recorded transport call.
#[derive(Clone, Debug)]
pub struct MockCall {
    pub address: String,
    pub forward_host: Option<String>,
    pub context: RegionContext,
}

type UnaryHook =
    dyn Fn(&str, Option<&str>, &BatchRequest) -> Result<BatchResponse> + Send + Sync;

/// Scripted transport: behavior comes from a closure over the physical
/// address, the forward header, and the request; every call is recorded.
pub struct MockTransport {
    hook: Box<UnaryHook>,
    delay: Option<Duration>,
    address_delays: HashMap<String, Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTransport {
    pub fn new(
        hook: impl Fn(&str, Option<&str>, &BatchRequest) -> Result<BatchResponse>
            + Send
            + Sync
            + 'static,
    ) -> MockTransport {
        MockTransport {
            hook: Box::new(hook),
            delay: None,
            address_delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps before answering, to exercise deadlines and interruption.
    pub fn with_delay(mut self, delay: Duration) -> MockTransport {
        self.delay = Some(delay);
        self
    }

    /// Sleeps before answering calls to one address, to force completion
    /// reordering across batches.
    pub fn with_address_delay(mut self, address: &str, delay: Duration) -> MockTransport {
        self.address_delays.insert(address.to_owned(), delay);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn unary(
        &self,
        address: &str,
        forward_host: Option<&str>,
        request: BatchRequest,
        _deadline: Deadline,
    ) -> Result<BatchResponse> {
        self.calls.lock().unwrap().push(MockCall {
            address: address.to_owned(),
            forward_host: forward_host.map(str::to_owned),
            context: request.context(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(delay) = self.address_delays.get(address) {
            tokio::time::sleep(*delay).await;
        }
        (self.hook)(address, forward_host, &request)
    }
}
