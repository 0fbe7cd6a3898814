// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Client-side region routing and store failover for the RangeKV
//! distributed key-value store.
//!
//! Given a set of keys (or key-value pairs) addressed to a sharded
//! cluster, this crate discovers which region owns each key, splits the
//! per-region key runs into batches bounded by an entry count and a byte
//! budget, dispatches those batches concurrently, and reacts to routing
//! errors — leader changes, unreachable stores, stale region metadata — by
//! rotating through follower replicas or forwarding through a healthy
//! peer, while returning a stable, key-ordered result to the caller.
//!
//! The RPC transport, the metadata service, and channel establishment are
//! consumed as traits ([`Transport`], [`MetaClient`], [`Connect`]); what
//! lives here is the shared routing cache, the batcher, the per-request
//! replica selector, and the concurrent dispatcher.
//!
//! The usual request flow:
//!
//! 1. [`Router::group_by_region`] partitions the caller's keys into
//!    per-region, ascending groups.
//! 2. [`append_batches`] splits each group under
//!    [`Config::batch_max_count`] and [`Config::batch_max_bytes`].
//! 3. [`Dispatcher::dispatch`] (or [`Dispatcher::dispatch_void`] on write
//!    paths) fans the batches out, one task per batch, each owning a
//!    [`ReplicaSelector`] bound to the batch's region.
//! 4. On `EpochNotMatch` or `RegionNotFound` the caller re-groups and
//!    re-dispatches; everything recoverable is absorbed below.

pub mod backoff;
mod config;
mod errors;
pub mod kv;
#[cfg(test)]
mod mock;
mod region;
pub mod request;
mod router;
mod store;
pub mod transport;
mod util;

#[doc(inline)]
pub use crate::backoff::Backoff;
pub use crate::config::Config;
pub use crate::errors::{Error, Result};
pub use crate::kv::{Key, KvPair, Value};
pub use crate::region::{Peer, Region, RegionEpoch, RegionId, StoreId};
pub use crate::request::{
    append_batches, Batch, Dispatcher, ReplicaSelector, RetryOptions, SelectedTarget,
};
pub use crate::router::{MetaClient, RegionCache, RegionGroup, Router};
pub use crate::store::Store;
#[doc(inline)]
pub use crate::transport::{
    BatchRequest, BatchResponse, ChannelPool, Connect, HostMapping, RegionContext, Transport,
    FORWARD_METADATA_KEY,
};
pub use crate::util::{Deadline, Interrupt};
