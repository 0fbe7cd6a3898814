// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! The closed error channel shared by the router, the replica selector,
//! and the dispatcher.
//!
//! Retry logic pattern-matches on these variants: the selector absorbs the
//! recoverable kinds until its budget runs out, everything else surfaces to
//! the caller untouched.

use std::result;

use thiserror::Error;

use crate::region::{Region, RegionId, StoreId};

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The addressed peer does not lead the region. The response carries
    /// the region as the responding store sees it, including the peer it
    /// believes is the leader.
    #[error("peer is not leader for region {}", .region.id())]
    NotLeader { region: Region },
    /// The region's epoch moved under us (split or merge); the batch has
    /// to be re-grouped against fresh routing.
    #[error("epoch of region {region_id} does not match")]
    EpochNotMatch { region_id: RegionId },
    /// The region is gone from the routing authority; re-route.
    #[error("region {region_id} not found")]
    RegionNotFound { region_id: RegionId },
    /// Transport-level failure reaching a store.
    #[error("store {store_id} at {address} is unreachable")]
    StoreUnreachable { store_id: StoreId, address: String },
    #[error("deadline elapsed")]
    Timeout,
    #[error("operation interrupted")]
    Interrupted,
    #[error("metadata service unavailable: {reason}")]
    RoutingUnavailable { reason: String },
    #[error("fatal transport error: {reason}")]
    TransportFatal { reason: String },
    /// A batch exhausted its replica and back-off budget; `cause` is the
    /// last error absorbed by the selector.
    #[error("batch for region {region_id} failed")]
    BatchFailed {
        region_id: RegionId,
        #[source]
        cause: Box<Error>,
    },
}
