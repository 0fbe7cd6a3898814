// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, warn};
use tokio::time;

use crate::config::Config;
use crate::kv::KvPair;
use crate::request::batch::Batch;
use crate::request::replica::ReplicaSelector;
use crate::request::RetryOptions;
use crate::router::{MetaClient, Router};
use crate::transport::{BatchResponse, Transport};
use crate::util::{self, Deadline, Interrupt};
use crate::{Error, Result};

/// Fans batches out to their regions' replicas, absorbing failover inside
/// each batch task and surfacing the first terminal failure.
///
/// One task runs per batch, at most `worker_pool_size` concurrently. Tasks
/// are independent: they share the router and the transport, while each
/// owns its [`ReplicaSelector`] and back-off cursors exclusively. Results
/// are collected in completion order and re-sorted by key, so the output
/// is deterministic no matter how the cluster interleaves replies.
pub struct Dispatcher<C, T> {
    router: Arc<Router<C>>,
    transport: Arc<T>,
    config: Config,
    retry: RetryOptions,
}

impl<C: MetaClient, T: Transport> Dispatcher<C, T> {
    pub fn new(
        router: Arc<Router<C>>,
        transport: Arc<T>,
        config: Config,
        retry: RetryOptions,
    ) -> Dispatcher<C, T> {
        Dispatcher {
            router,
            transport,
            config,
            retry,
        }
    }

    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    /// Reads every batch and returns the pairs found, sorted ascending by
    /// unsigned key order regardless of completion order.
    pub async fn dispatch(
        &self,
        batches: Vec<Batch>,
        interrupt: &Interrupt,
    ) -> Result<Vec<KvPair>> {
        let outputs = self.run(batches, interrupt).await?;
        let mut pairs: Vec<KvPair> = outputs.into_iter().flatten().collect();
        pairs.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(pairs)
    }

    /// Writes every batch; returns once all of them acknowledged. There is
    /// no atomicity across batches.
    pub async fn dispatch_void(&self, batches: Vec<Batch>, interrupt: &Interrupt) -> Result<()> {
        self.run(batches, interrupt).await.map(drop)
    }

    async fn run(&self, batches: Vec<Batch>, interrupt: &Interrupt) -> Result<Vec<Vec<KvPair>>> {
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        interrupt.check()?;

        let per_batch = self.config.per_batch_deadline;
        let expected = batches.len();
        // Completion-order collection: drained once per submitted batch,
        // never awaited in submission order.
        let mut completions = stream::iter(
            batches
                .into_iter()
                .map(|batch| time::timeout(per_batch, self.run_batch(batch, interrupt.clone()))),
        )
        .buffer_unordered(self.config.worker_pool_size.max(1));

        let mut outputs = Vec::with_capacity(expected);
        while outputs.len() < expected {
            let completion = tokio::select! {
                _ = interrupt.raised() => {
                    debug!("dispatch interrupted with {} batches outstanding", expected - outputs.len());
                    return Err(Error::Interrupted);
                }
                completion = completions.next() => completion,
            };
            // Dropping the stream on any terminal failure cancels every
            // in-flight task and never starts the queued ones.
            match completion {
                None => break,
                Some(Err(_elapsed)) => return Err(Error::Timeout),
                Some(Ok(Err(error))) => return Err(error),
                Some(Ok(Ok(output))) => outputs.push(output),
            }
        }
        Ok(outputs)
    }

    /// Runs one batch to success, terminal failure, or deadline, retrying
    /// through the selector with back-off in between.
    async fn run_batch(&self, batch: Batch, interrupt: Interrupt) -> Result<Vec<KvPair>> {
        let deadline = Deadline::after(self.config.per_batch_deadline);
        let region_id = batch.region().id();
        let mut selector = ReplicaSelector::new(
            self.router.clone(),
            batch.region().clone(),
            self.config.enable_forward,
            deadline,
        )
        .await?;
        let mut store_backoff = self.retry.store_backoff.clone();
        let mut forward_backoff = self.retry.forward_backoff.clone();

        loop {
            interrupt.check()?;
            deadline.check()?;

            let target = selector.target();
            let request = batch.request(selector.context());
            let (address, forward_host, attempt_deadline) = match &target.proxy {
                Some(proxy) => (
                    proxy.address().to_owned(),
                    Some(target.store.address().to_owned()),
                    deadline.cap(self.config.forward_deadline),
                ),
                None => (target.store.address().to_owned(), None, deadline),
            };

            let result = self
                .transport
                .unary(&address, forward_host.as_deref(), request, attempt_deadline)
                .await;
            match result {
                Ok(response) => {
                    selector.on_success();
                    return Ok(match response {
                        BatchResponse::Pairs(pairs) => pairs,
                        BatchResponse::Done => Vec::new(),
                    });
                }
                Err(error) => {
                    debug!(
                        "attempt for region {} against {} failed: {}",
                        region_id, address, error
                    );
                    selector.on_error(error.clone(), deadline).await?;
                    let backoff = if selector.is_forwarding() {
                        &mut forward_backoff
                    } else {
                        &mut store_backoff
                    };
                    match backoff.next_delay_duration() {
                        Some(delay) => util::sleep_with(delay, deadline, &interrupt).await?,
                        None => {
                            warn!("batch for region {} ran out of back-off budget", region_id);
                            return Err(Error::BatchFailed {
                                region_id,
                                cause: Box::new(error),
                            });
                        }
                    }
                }
            }
        }
    }
}
