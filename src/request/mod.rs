// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Batch construction and dispatch: splitting routed key groups into
//! bounded units, choosing a replica per attempt, and fanning the units
//! out concurrently.

mod batch;
mod dispatch;
mod replica;

pub use batch::{append_batches, Batch};
pub use dispatch::Dispatcher;
pub use replica::{ReplicaSelector, SelectedTarget};

use crate::backoff::Backoff;

pub const DEFAULT_STORE_BACKOFF: Backoff = Backoff::equal_jitter_backoff(2, 500, 10);
pub const DEFAULT_FORWARD_BACKOFF: Backoff = Backoff::no_jitter_backoff(20, 200, 4);

/// One back-off schedule per attempt kind. Schedules are cloned into each
/// batch task, so attempt cursors never leak between batches.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryOptions {
    /// Slept between attempts while probing the leader and its followers.
    pub store_backoff: Backoff,
    /// Slept between proxy-forward attempts.
    pub forward_backoff: Backoff,
}

impl RetryOptions {
    pub const fn new(store_backoff: Backoff, forward_backoff: Backoff) -> RetryOptions {
        RetryOptions {
            store_backoff,
            forward_backoff,
        }
    }
}

impl Default for RetryOptions {
    fn default() -> RetryOptions {
        RetryOptions::new(DEFAULT_STORE_BACKOFF, DEFAULT_FORWARD_BACKOFF)
    }
}
