/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Read-only access to the block store for threads other than the engine.
//!
//! A [StoreCamera] can be cloned freely and handed to any thread; each call to
//! [`snapshot`](StoreCamera::snapshot) takes a consistent view of the store at that moment.
//! Serving peers reads from snapshots, so reads proceed concurrently with the engine's writes.

use super::pluggables::{KVGet, KVStore};

/// A read-only handle to the block store.
#[derive(Clone)]
pub struct StoreCamera<K: KVStore>(K);

impl<K: KVStore> StoreCamera<K> {
    pub fn new(kv_store: K) -> StoreCamera<K> {
        StoreCamera(kv_store)
    }

    /// Take a consistent snapshot of the store. All of the typed getters of [KVGet] are
    /// available on the returned value.
    pub fn snapshot(&self) -> StoreSnapshot<K::Snapshot<'_>> {
        StoreSnapshot(self.0.snapshot())
    }
}

/// A consistent, read-only view of the block store at a point in time.
pub struct StoreSnapshot<S: KVGet>(S);

impl<S: KVGet> KVGet for StoreSnapshot<S> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key)
    }
}
