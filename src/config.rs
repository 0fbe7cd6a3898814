// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Client configuration for routing, batching, and failover.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

/// Knobs for the batcher and the dispatcher.
///
/// The batch limits bound each dispatch unit in two independent
/// dimensions: wire-format overhead scales with the entry count while
/// backend memory pressure scales with bytes, and either can be the
/// tighter constraint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Byte budget per batch: summed key lengths, plus value lengths on
    /// write paths.
    pub batch_max_bytes: usize,
    /// Entry budget per batch.
    pub batch_max_count: usize,
    /// Upper bound on concurrently running batch tasks.
    pub worker_pool_size: usize,
    /// Whether an unreachable store may be reached through a follower
    /// proxy.
    pub enable_forward: bool,
    /// Budget for one batch, including its retries and back-off sleeps.
    pub per_batch_deadline: Duration,
    /// Per-attempt cap applied while a batch is proxy-forwarded.
    pub forward_deadline: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            batch_max_bytes: 1024 * 1024,
            batch_max_count: 1024,
            worker_pool_size: 16,
            enable_forward: true,
            per_batch_deadline: Duration::from_secs(2),
            forward_deadline: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn with_batch_limits(mut self, max_bytes: usize, max_count: usize) -> Config {
        self.batch_max_bytes = max_bytes;
        self.batch_max_count = max_count;
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Config {
        self.worker_pool_size = size;
        self
    }

    pub fn with_forwarding(mut self, enable: bool) -> Config {
        self.enable_forward = enable;
        self
    }

    pub fn with_deadlines(mut self, per_batch: Duration, forward: Duration) -> Config {
        self.per_batch_deadline = per_batch;
        self.forward_deadline = forward;
        self
    }
}
