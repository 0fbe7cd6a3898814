// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use log::{debug, warn};

use crate::region::{Peer, Region, StoreId};
use crate::router::{MetaClient, Router};
use crate::store::Store;
use crate::transport::RegionContext;
use crate::util::Deadline;
use crate::{Error, Result};

/// Where the next attempt goes.
#[derive(Clone, Debug)]
pub struct SelectedTarget {
    /// The intended destination store.
    pub store: Arc<Store>,
    /// When set, the RPC is physically sent to this store instead, with
    /// the forward header naming `store`.
    pub proxy: Option<Arc<Store>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    DirectLeader,
    TryFollowerAsLeader,
    ProxyForward,
    Exhausted,
}

#[derive(Clone)]
struct Replica {
    peer: Peer,
    store: Arc<Store>,
}

/// Per-request replica choice for a single region.
///
/// Constructed once per batch task and never shared: it exclusively owns
/// the cursors and counters that make failover terminate. Recoverable
/// errors are absorbed here until the follower and forward budgets run
/// out; everything else surfaces through [`ReplicaSelector::on_error`].
pub struct ReplicaSelector<C> {
    router: Arc<Router<C>>,
    region: Region,
    state: State,
    leader: Replica,
    candidate: Option<Replica>,
    proxy: Option<Replica>,
    follower_cursor: usize,
    proxy_cursor: usize,
    retry_leader_count: usize,
    retry_forward_count: usize,
    enable_forward: bool,
}

impl<C: MetaClient> ReplicaSelector<C> {
    /// Binds a selector to `region`, targeting its leader. A leader store
    /// with a remembered proxy pairing starts forwarded right away.
    pub async fn new(
        router: Arc<Router<C>>,
        region: Region,
        enable_forward: bool,
        deadline: Deadline,
    ) -> Result<ReplicaSelector<C>> {
        let leader_peer = region.leader();
        let store = router.store(leader_peer.store_id, deadline).await?;
        let mut selector = ReplicaSelector {
            router,
            region,
            state: State::DirectLeader,
            leader: Replica {
                peer: leader_peer,
                store,
            },
            candidate: None,
            proxy: None,
            follower_cursor: 0,
            proxy_cursor: 0,
            retry_leader_count: 0,
            retry_forward_count: 0,
            enable_forward,
        };
        if enable_forward {
            selector.adopt_remembered_proxy();
        }
        Ok(selector)
    }

    fn adopt_remembered_proxy(&mut self) {
        let proxy_store = match self.leader.store.proxy() {
            Some(store) if store.is_reachable() && store.is_valid() => store,
            _ => return,
        };
        let peer = self
            .region
            .peers()
            .iter()
            .copied()
            .find(|p| p.store_id == proxy_store.id());
        if let Some(peer) = peer {
            debug!(
                "region {} starts forwarded through remembered proxy store {}",
                self.region.id(),
                proxy_store.id()
            );
            self.proxy = Some(Replica {
                peer,
                store: proxy_store,
            });
            self.state = State::ProxyForward;
            self.retry_forward_count = 1;
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn is_forwarding(&self) -> bool {
        self.state == State::ProxyForward
    }

    /// Routing identity for the next attempt.
    pub fn context(&self) -> RegionContext {
        RegionContext::new(self.region.id(), self.region.epoch(), self.target_peer())
    }

    fn target_peer(&self) -> Peer {
        match (&self.state, &self.candidate) {
            (State::TryFollowerAsLeader, Some(candidate)) => candidate.peer,
            _ => self.leader.peer,
        }
    }

    /// The store (and proxy, when forwarding) for the next attempt.
    pub fn target(&self) -> SelectedTarget {
        match (&self.state, &self.candidate, &self.proxy) {
            (State::TryFollowerAsLeader, Some(candidate), _) => SelectedTarget {
                store: candidate.store.clone(),
                proxy: None,
            },
            (State::ProxyForward, _, Some(proxy)) => SelectedTarget {
                store: self.leader.store.clone(),
                proxy: Some(proxy.store.clone()),
            },
            _ => SelectedTarget {
                store: self.leader.store.clone(),
                proxy: None,
            },
        }
    }

    /// Notes a successful response.
    ///
    /// Success through a follower candidate is the canonical signal that
    /// leadership moved: the candidate is promoted through the router so
    /// future requests skip the search. Success through a proxy pins the
    /// pairing on the store; a direct success clears it.
    pub fn on_success(&mut self) {
        match self.state {
            State::DirectLeader | State::Exhausted => {
                self.leader.store.clear_proxy();
            }
            State::TryFollowerAsLeader => {
                if let Some(candidate) = self.candidate.take() {
                    debug!(
                        "promoting store {} to leader of region {}",
                        candidate.peer.store_id,
                        self.region.id()
                    );
                    self.router
                        .update_leader(self.region.id(), candidate.peer.store_id);
                    self.leader = candidate;
                }
                self.state = State::DirectLeader;
            }
            State::ProxyForward => {
                if let Some(proxy) = &self.proxy {
                    self.leader.store.set_proxy(proxy.store.clone());
                }
            }
        }
    }

    /// Digests a failed attempt. `Ok(())` means another attempt should be
    /// made against the (possibly new) target; an error is terminal for
    /// this batch.
    pub async fn on_error(&mut self, error: Error, deadline: Deadline) -> Result<()> {
        match error {
            Error::NotLeader { region } => self.on_not_leader(region, deadline).await,
            Error::EpochNotMatch { region_id } => {
                self.router.invalidate(region_id);
                self.state = State::Exhausted;
                Err(Error::EpochNotMatch { region_id })
            }
            Error::RegionNotFound { region_id } => {
                self.candidate = None;
                self.router.invalidate(region_id);
                self.state = State::Exhausted;
                Err(Error::RegionNotFound { region_id })
            }
            Error::StoreUnreachable { store_id, address } => {
                self.on_store_unreachable(store_id, address, deadline).await
            }
            error => {
                self.state = State::Exhausted;
                Err(error)
            }
        }
    }

    async fn on_not_leader(&mut self, fresh: Region, deadline: Deadline) -> Result<()> {
        if fresh.epoch() == self.region.epoch() {
            let new_leader = fresh.leader();
            debug!(
                "region {} leader moved to store {}",
                fresh.id(),
                new_leader.store_id
            );
            let store = self.router.store(new_leader.store_id, deadline).await?;
            self.leader = Replica {
                peer: new_leader,
                store,
            };
            self.region = fresh;
            self.candidate = None;
            self.proxy = None;
            self.state = State::DirectLeader;
            Ok(())
        } else {
            // A region carrying a different epoch means a split or merge
            // happened; the whole batch has to be re-grouped.
            let region_id = self.region.id();
            self.router.invalidate(region_id);
            self.state = State::Exhausted;
            Err(Error::EpochNotMatch { region_id })
        }
    }

    async fn on_store_unreachable(
        &mut self,
        store_id: StoreId,
        address: String,
        deadline: Deadline,
    ) -> Result<()> {
        for replica in [Some(&self.leader), self.candidate.as_ref(), self.proxy.as_ref()] {
            if let Some(replica) = replica {
                if replica.store.id() == store_id {
                    replica.store.set_reachable(false);
                }
            }
        }

        match self.state {
            State::DirectLeader | State::TryFollowerAsLeader => {
                if let Some(candidate) = self.next_follower(deadline).await? {
                    self.retry_leader_count += 1;
                    debug!(
                        "region {}: probing store {} as leader",
                        self.region.id(),
                        candidate.peer.store_id
                    );
                    self.candidate = Some(candidate);
                    self.state = State::TryFollowerAsLeader;
                    Ok(())
                } else {
                    self.enter_forward_or_exhaust(store_id, address, deadline)
                        .await
                }
            }
            State::ProxyForward => {
                if let Some(proxy) = self.next_proxy(deadline).await? {
                    self.retry_forward_count += 1;
                    debug!(
                        "region {}: rotating proxy to store {}",
                        self.region.id(),
                        proxy.peer.store_id
                    );
                    self.proxy = Some(proxy);
                    Ok(())
                } else {
                    self.exhaust(Error::StoreUnreachable { store_id, address })
                }
            }
            State::Exhausted => self.exhaust(Error::StoreUnreachable { store_id, address }),
        }
    }

    async fn enter_forward_or_exhaust(
        &mut self,
        store_id: StoreId,
        address: String,
        deadline: Deadline,
    ) -> Result<()> {
        if self.enable_forward {
            if let Some(proxy) = self.next_proxy(deadline).await? {
                self.retry_forward_count += 1;
                debug!(
                    "region {}: forwarding to store {} through store {}",
                    self.region.id(),
                    self.leader.peer.store_id,
                    proxy.peer.store_id
                );
                self.candidate = None;
                self.proxy = Some(proxy);
                self.state = State::ProxyForward;
                return Ok(());
            }
        }
        self.exhaust(Error::StoreUnreachable { store_id, address })
    }

    /// The next follower to probe as leader. The cursor is monotone, so no
    /// follower is tried twice within one request.
    async fn next_follower(&mut self, deadline: Deadline) -> Result<Option<Replica>> {
        let followers: Vec<Peer> = self.region.followers().collect();
        while self.follower_cursor < followers.len() {
            let peer = followers[self.follower_cursor];
            self.follower_cursor += 1;
            let store = self.router.store(peer.store_id, deadline).await?;
            if store.is_reachable() && store.is_valid() {
                return Ok(Some(Replica { peer, store }));
            }
        }
        Ok(None)
    }

    /// The next qualified proxy in peer order: a reachable, valid follower
    /// store that is not already relaying for someone else.
    async fn next_proxy(&mut self, deadline: Deadline) -> Result<Option<Replica>> {
        let followers: Vec<Peer> = self.region.followers().collect();
        while self.retry_forward_count < followers.len() + 1 && self.proxy_cursor < followers.len()
        {
            let peer = followers[self.proxy_cursor];
            self.proxy_cursor += 1;
            let store = self.router.store(peer.store_id, deadline).await?;
            if store.is_reachable() && store.is_valid() && !store.is_relaying() {
                return Ok(Some(Replica { peer, store }));
            }
        }
        Ok(None)
    }

    fn exhaust(&mut self, cause: Error) -> Result<()> {
        self.state = State::Exhausted;
        self.router.report_request_fail(&self.region);
        warn!("region {}: replica candidates exhausted", self.region.id());
        Err(Error::BatchFailed {
            region_id: self.region.id(),
            cause: Box::new(cause),
        })
    }

    #[cfg(test)]
    pub(crate) fn retry_counts(&self) -> (usize, usize) {
        (self.retry_leader_count, self.retry_forward_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_region, mock_region_with_epoch, mock_store_address, MockMeta};
    use crate::region::RegionEpoch;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    fn unreachable(store_id: StoreId) -> Error {
        Error::StoreUnreachable {
            store_id,
            address: mock_store_address(store_id),
        }
    }

    /// Region 1 over stores {1, 2, 3}, led by store 1, cached in the
    /// router.
    fn router_with_region() -> (Arc<Router<MockMeta>>, Region) {
        let region = mock_region(1, "a", "z", &[1, 2, 3]);
        let router = Arc::new(Router::new(Arc::new(MockMeta::new(vec![region.clone()]))));
        router.cache().insert(region.clone());
        (router, region)
    }

    async fn selector(
        router: &Arc<Router<MockMeta>>,
        region: &Region,
        enable_forward: bool,
    ) -> ReplicaSelector<MockMeta> {
        ReplicaSelector::new(router.clone(), region.clone(), enable_forward, deadline())
            .await
            .unwrap()
    }

    /// Drives a forward-enabled selector into `ProxyForward` the way an
    /// asymmetric partition does: only the client → leader link is down,
    /// every follower probe answers `NotLeader` still naming the leader.
    async fn drive_into_forwarding(
        s: &mut ReplicaSelector<MockMeta>,
        region: &Region,
        followers: &[StoreId],
    ) {
        for _ in followers {
            s.on_error(unreachable(1), deadline()).await.unwrap();
            s.on_error(
                Error::NotLeader {
                    region: region.clone(),
                },
                deadline(),
            )
            .await
            .unwrap();
        }
        s.on_error(unreachable(1), deadline()).await.unwrap();
    }

    #[tokio::test]
    async fn starts_at_the_leader() {
        let (router, region) = router_with_region();
        let s = selector(&router, &region, true).await;
        let target = s.target();
        assert_eq!(target.store.id(), 1);
        assert!(target.proxy.is_none());
        assert_eq!(s.context().peer.store_id, 1);
        assert_eq!(s.context().region_id, 1);
    }

    #[tokio::test]
    async fn unreachable_leader_rotates_through_followers() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        s.on_error(unreachable(1), deadline()).await.unwrap();
        assert_eq!(s.target().store.id(), 2);
        assert_eq!(s.context().peer.store_id, 2);
        s.on_error(unreachable(2), deadline()).await.unwrap();
        assert_eq!(s.target().store.id(), 3);
        assert_eq!(s.retry_counts(), (2, 0));

        // Both followers are spent; the next failure exhausts.
        let err = s.on_error(unreachable(3), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailed { region_id: 1, .. }));
        // Exhaustion reports the request failure, dropping the route.
        assert!(router.cache().get_by_id(1).is_none());
    }

    #[tokio::test]
    async fn follower_success_promotes_the_candidate() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        s.on_error(unreachable(1), deadline()).await.unwrap();
        assert_eq!(s.context().peer.store_id, 2);
        s.on_success();

        assert_eq!(router.cache().get_by_id(1).unwrap().leader().store_id, 2);
        // The promoted follower is the new direct target.
        assert_eq!(s.target().store.id(), 2);
        assert!(!s.is_forwarding());
    }

    #[tokio::test]
    async fn direct_success_does_not_touch_the_cached_leader() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;
        s.on_success();
        assert_eq!(router.cache().get_by_id(1).unwrap().leader().store_id, 1);
    }

    #[tokio::test]
    async fn rotation_skips_stores_known_unreachable() {
        let (router, region) = router_with_region();
        // Store 2 was already marked down by a sibling task.
        router
            .store(2, deadline())
            .await
            .unwrap()
            .set_reachable(false);

        let mut s = selector(&router, &region, false).await;
        s.on_error(unreachable(1), deadline()).await.unwrap();
        assert_eq!(s.target().store.id(), 3);
        assert_eq!(s.retry_counts(), (1, 0));
    }

    #[tokio::test]
    async fn all_replicas_down_exhausts_even_with_forwarding() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, true).await;

        s.on_error(unreachable(1), deadline()).await.unwrap();
        s.on_error(unreachable(2), deadline()).await.unwrap();
        // Every store is now marked unreachable, so no proxy qualifies
        // either.
        let err = s.on_error(unreachable(3), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailed { region_id: 1, .. }));
    }

    #[tokio::test]
    async fn asymmetric_partition_forwards_through_a_follower() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, true).await;

        drive_into_forwarding(&mut s, &region, &[2, 3]).await;

        assert!(s.is_forwarding());
        let target = s.target();
        assert_eq!(target.store.id(), 1);
        assert_eq!(target.proxy.unwrap().id(), 2);
        // The forwarded context still addresses the leader peer.
        assert_eq!(s.context().peer.store_id, 1);
    }

    #[tokio::test]
    async fn forwarding_disabled_exhausts_instead() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        s.on_error(unreachable(1), deadline()).await.unwrap();
        s.on_error(
            Error::NotLeader {
                region: region.clone(),
            },
            deadline(),
        )
        .await
        .unwrap();
        s.on_error(unreachable(1), deadline()).await.unwrap();
        s.on_error(
            Error::NotLeader {
                region: region.clone(),
            },
            deadline(),
        )
        .await
        .unwrap();
        let err = s.on_error(unreachable(1), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailed { .. }));
    }

    #[tokio::test]
    async fn proxy_success_pins_the_pairing_for_later_selectors() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, true).await;

        drive_into_forwarding(&mut s, &region, &[2, 3]).await;
        assert!(s.is_forwarding());
        s.on_success();

        let leader_store = router.store(1, deadline()).await.unwrap();
        assert_eq!(leader_store.proxy().unwrap().id(), 2);

        // A later selector for the same region starts forwarded.
        let s2 = selector(&router, &region, true).await;
        assert!(s2.is_forwarding());
        let target = s2.target();
        assert_eq!(target.store.id(), 1);
        assert_eq!(target.proxy.unwrap().id(), 2);
        assert_eq!(s2.retry_counts(), (0, 1));

        // With forwarding disabled the remembered pairing is ignored.
        let s3 = selector(&router, &region, false).await;
        assert!(!s3.is_forwarding());
        assert!(s3.target().proxy.is_none());
    }

    #[tokio::test]
    async fn direct_success_clears_a_remembered_pairing() {
        let (router, region) = router_with_region();
        let leader_store = router.store(1, deadline()).await.unwrap();
        let relay = router.store(2, deadline()).await.unwrap();
        leader_store.set_proxy(relay.clone());

        let mut s = selector(&router, &region, false).await;
        s.on_success();
        assert!(leader_store.proxy().is_none());
        assert!(!relay.is_relaying());
    }

    #[tokio::test]
    async fn proxy_failure_rotates_in_peer_order() {
        let (router, region) = router_with_region();
        // Remembered pairing through store 2.
        let leader_store = router.store(1, deadline()).await.unwrap();
        leader_store.set_proxy(router.store(2, deadline()).await.unwrap());

        let mut s = selector(&router, &region, true).await;
        assert!(s.is_forwarding());
        assert_eq!(s.target().proxy.unwrap().id(), 2);

        // The relay fails; advance to the next follower after it.
        s.on_error(unreachable(2), deadline()).await.unwrap();
        assert!(s.is_forwarding());
        assert_eq!(s.target().proxy.unwrap().id(), 3);
        assert_eq!(s.retry_counts(), (0, 2));

        let err = s.on_error(unreachable(3), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailed { .. }));
    }

    #[tokio::test]
    async fn a_relaying_store_is_not_picked_as_a_proxy() {
        let (router, region) = router_with_region();
        // Store 2 already relays for an unrelated store.
        let other = Arc::new(Store::new(9, mock_store_address(9)));
        other.set_proxy(router.store(2, deadline()).await.unwrap());

        let mut s = selector(&router, &region, true).await;
        drive_into_forwarding(&mut s, &region, &[2, 3]).await;

        assert!(s.is_forwarding());
        assert_eq!(s.target().proxy.unwrap().id(), 3);
    }

    #[tokio::test]
    async fn not_leader_with_matching_epoch_adopts_the_new_leader() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        let moved = region.with_leader(3).unwrap();
        s.on_error(Error::NotLeader { region: moved }, deadline())
            .await
            .unwrap();
        assert_eq!(s.target().store.id(), 3);
        assert_eq!(s.context().peer.store_id, 3);
        assert!(!s.is_forwarding());
    }

    #[tokio::test]
    async fn not_leader_with_a_different_epoch_surfaces_a_regroup() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        let split =
            mock_region_with_epoch(1, RegionEpoch::new(1, 2), "a", "m", &[1, 2, 3]);
        let err = s
            .on_error(Error::NotLeader { region: split }, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EpochNotMatch { region_id: 1 }));
        assert!(router.cache().get_by_id(1).is_none());
    }

    #[tokio::test]
    async fn region_not_found_invalidates_and_surfaces() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, false).await;

        let err = s
            .on_error(Error::RegionNotFound { region_id: 1 }, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegionNotFound { region_id: 1 }));
        assert!(router.cache().get_by_id(1).is_none());
    }

    #[tokio::test]
    async fn fatal_transport_errors_surface_untouched() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, true).await;
        let err = s
            .on_error(
                Error::TransportFatal {
                    reason: "tls handshake".to_owned(),
                },
                deadline(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportFatal { .. }));
    }

    #[tokio::test]
    async fn counters_stay_within_their_bounds() {
        let (router, region) = router_with_region();
        let mut s = selector(&router, &region, true).await;
        let followers = region.followers().count();

        let mut failures = 0;
        loop {
            let target = s.target();
            let failing = target.proxy.unwrap_or(target.store).id();
            match s.on_error(unreachable(failing), deadline()).await {
                Ok(()) => failures += 1,
                Err(_) => break,
            }
            assert!(failures <= followers * 2 + 1);
        }
        let (leader_retries, forward_retries) = s.retry_counts();
        assert!(leader_retries <= followers);
        assert!(forward_retries <= followers + 1);
    }
}
