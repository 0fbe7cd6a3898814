// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! The RPC seam: request and response shapes, the unary transport trait,
//! and the lazily populated channel pool real transports build on.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use derive_new::new;

use crate::kv::{Key, KvPair};
use crate::region::{Peer, RegionEpoch, RegionId};
use crate::util::Deadline;
use crate::Result;

/// Request metadata header naming the ultimate target store when a request
/// is relayed through a proxy store. The receiving store uses it to relay
/// the call.
pub const FORWARD_METADATA_KEY: &str = "rangekv-forwarded-host";

/// Routing identity attached to every request, so the serving store can
/// reject requests built against stale metadata.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionContext {
    pub region_id: RegionId,
    pub epoch: RegionEpoch,
    pub peer: Peer,
}

/// A unit of work bound for a single region replica.
#[derive(Clone, Debug)]
pub enum BatchRequest {
    Get {
        context: RegionContext,
        keys: Vec<Key>,
    },
    Put {
        context: RegionContext,
        pairs: Vec<KvPair>,
    },
}

impl BatchRequest {
    pub fn context(&self) -> RegionContext {
        match self {
            BatchRequest::Get { context, .. } => *context,
            BatchRequest::Put { context, .. } => *context,
        }
    }
}

#[derive(Clone, Debug)]
pub enum BatchResponse {
    Pairs(Vec<KvPair>),
    Done,
}

/// A unary RPC transport to store endpoints.
///
/// `address` is where the call physically goes. When `forward_host` is
/// set, `address` is a proxy store and the call carries
/// [`FORWARD_METADATA_KEY`] with the ultimate store's address so the proxy
/// relays it. Routing failures come back through the crate's error kinds;
/// anything unrecoverable maps to `TransportFatal`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn unary(
        &self,
        address: &str,
        forward_host: Option<&str>,
        request: BatchRequest,
        deadline: Deadline,
    ) -> Result<BatchResponse>;
}

/// Rewrites advertised store addresses before dialing, for NAT'd
/// topologies where the cluster-internal address is not routable from the
/// client.
pub trait HostMapping: Send + Sync + 'static {
    fn remap(&self, address: &str) -> String;
}

/// The identity mapping.
#[derive(Clone, Copy, Debug, Default)]
pub struct SameHost;

impl HostMapping for SameHost {
    fn remap(&self, address: &str) -> String {
        address.to_owned()
    }
}

/// Creates a channel to a store address. Connection establishment itself
/// lives outside this crate; implementations typically wrap an RPC
/// environment and its credentials.
pub trait Connect: Send + Sync + 'static {
    type Channel: Clone + Send + Sync + 'static;

    fn connect(&self, address: &str) -> Result<Self::Channel>;
}

/// Channel cache keyed by remapped address, populated lazily.
///
/// The dial happens outside the lock; when two callers race on the same
/// address the first inserted channel wins and the loser's dial is
/// dropped.
pub struct ChannelPool<C: Connect, M = SameHost> {
    connect: C,
    mapping: M,
    channels: Mutex<HashMap<String, C::Channel>>,
}

impl<C: Connect> ChannelPool<C, SameHost> {
    pub fn new(connect: C) -> ChannelPool<C, SameHost> {
        ChannelPool::with_mapping(connect, SameHost)
    }
}

impl<C: Connect, M: HostMapping> ChannelPool<C, M> {
    pub fn with_mapping(connect: C, mapping: M) -> ChannelPool<C, M> {
        ChannelPool {
            connect,
            mapping,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, address: &str) -> Result<C::Channel> {
        let mapped = self.mapping.remap(address);
        if let Some(channel) = self.channels.lock().unwrap().get(&mapped) {
            return Ok(channel.clone());
        }
        let channel = self.connect.connect(&mapped)?;
        let mut channels = self.channels.lock().unwrap();
        Ok(channels.entry(mapped).or_insert(channel).clone())
    }
}
