// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Shared store handles carrying liveness state across concurrent tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::region::StoreId;

/// A store (server process) hosting region replicas.
///
/// One handle per store id is shared through the router's cache, so the
/// reachability observed by one in-flight batch is seen by every other.
/// `proxy` remembers a follower store that relays traffic while this store
/// cannot be reached directly; the pairing survives the request that
/// established it.
pub struct Store {
    id: StoreId,
    address: String,
    reachable: AtomicBool,
    valid: AtomicBool,
    relaying: AtomicBool,
    proxy: RwLock<Option<Arc<Store>>>,
}

impl Store {
    pub fn new(id: StoreId, address: impl Into<String>) -> Store {
        Store {
            id,
            address: address.into(),
            reachable: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            relaying: AtomicBool::new(false),
            proxy: RwLock::new(None),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Marks the store gone. Set once the metadata service no longer knows
    /// the store; selectors skip invalid stores permanently.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Whether this store currently relays traffic for another store.
    pub fn is_relaying(&self) -> bool {
        self.relaying.load(Ordering::SeqCst)
    }

    /// The follower store this store's traffic is forwarded through.
    pub fn proxy(&self) -> Option<Arc<Store>> {
        self.proxy.read().unwrap().clone()
    }

    /// Pins `proxy` as the relay for this store.
    pub fn set_proxy(&self, proxy: Arc<Store>) {
        proxy.relaying.store(true, Ordering::SeqCst);
        let old = self.proxy.write().unwrap().replace(proxy.clone());
        if let Some(old) = old {
            if !Arc::ptr_eq(&old, &proxy) {
                old.relaying.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Drops the relay pairing, typically after a direct attempt succeeded
    /// again.
    pub fn clear_proxy(&self) {
        if let Some(old) = self.proxy.write().unwrap().take() {
            old.relaying.store(false, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("reachable", &self.is_reachable())
            .field("valid", &self.is_valid())
            .field("proxy", &self.proxy().map(|p| p.id()))
            .finish()
    }
}
