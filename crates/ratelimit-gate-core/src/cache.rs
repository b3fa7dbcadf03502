//! Key/value cache abstraction, plus a local LRU+TTL implementation.
//!
//! Mirrors the "dual cache" shape of the system this crate's semantics are
//! drawn from: a local, process-bound layer that every scope can read from
//! immediately, optionally backed by a shared layer for cross-process
//! admission. Consistency across processes is best-effort by design — see
//! the crate-level docs.

use crate::error::CacheStoreError;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Key/value store backing the gate's counters.
///
/// `local_only` requests bypass any shared backend a composed implementation
/// might have attached (see [`TieredCacheStore`]); a store with no shared
/// layer ignores the flag entirely since every read/write is already local.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads a single key. `Ok(None)` means absent (including "key was
    /// itself `None`" — callers pass `Option<String>` keys through
    /// [`CacheStore::batch_get`] and a `None` key always yields `None`).
    async fn get(&self, key: &str, local_only: bool) -> Result<Option<String>, CacheStoreError>;

    /// Positional batch read; preserves input order. A `None` entry in
    /// `keys` (a scope whose id was absent) yields `None` at that position
    /// without touching the backend. Always a non-local read — matching the
    /// shape of the upstream batch read this is modeled on, only `get` and
    /// `set` take a `local_only` override.
    async fn batch_get(
        &self,
        keys: &[Option<String>],
    ) -> Result<Vec<Option<String>>, CacheStoreError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match key {
                Some(k) => out.push(self.get(k, false).await?),
                None => out.push(None),
            }
        }
        Ok(out)
    }

    /// Writes a single key with the given TTL.
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        local_only: bool,
    ) -> Result<(), CacheStoreError>;

    /// Writes several keys with a shared TTL.
    async fn batch_set(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        for (key, value) in entries {
            self.set(&key, value, ttl, false).await?;
        }
        Ok(())
    }

    /// Atomically adds `delta` to the integer stored at `key`, creating it
    /// as `delta` if absent, and returns the new value. Used for the global
    /// in-flight counter so the read/increment race the rest of the gate
    /// tolerates is closed for that one counter.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        local_only: bool,
    ) -> Result<i64, CacheStoreError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// A bounded, in-process cache with per-entry TTL.
///
/// Backed by an LRU map so a pathological number of distinct scopes (e.g. a
/// constant stream of new `end_user_id`s) cannot grow memory unboundedly;
/// entries past their TTL are treated as absent even if not yet evicted.
pub struct LocalCacheStore {
    entries: Mutex<LruCache<String, Entry>>,
    integers: Mutex<std::collections::HashMap<String, i64>>,
}

impl LocalCacheStore {
    /// Creates a store bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            integers: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for LocalCacheStore {
    /// Defaults to 10,000 entries, generous for a single process's worth of
    /// concurrently-active scopes.
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn get(&self, key: &str, _local_only: bool) -> Result<Option<String>, CacheStoreError> {
        if key == crate::counter::GLOBAL_PARALLEL_KEY {
            let integers = self.integers.lock().await;
            return Ok(integers.get(key).map(|v| v.to_string()));
        }
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        _local_only: bool,
    ) -> Result<(), CacheStoreError> {
        if key == crate::counter::GLOBAL_PARALLEL_KEY {
            let parsed: i64 = value
                .parse()
                .map_err(|_| CacheStoreError::new("global counter value must be an integer"))?;
            let mut integers = self.integers.lock().await;
            integers.insert(key.to_string(), parsed);
            return Ok(());
        }
        let mut entries = self.entries.lock().await;
        entries.put(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        _local_only: bool,
    ) -> Result<i64, CacheStoreError> {
        let mut integers = self.integers.lock().await;
        let next = integers.get(key).copied().unwrap_or(0) + delta;
        integers.insert(key.to_string(), next);
        Ok(next)
    }
}

/// Composes a required local [`CacheStore`] with an optional shared one.
///
/// Reads and writes marked `local_only` (or issued when no shared store is
/// attached) never touch the shared layer. Otherwise the shared layer is
/// tried first on reads, falling back to local on a shared-store error —
/// favoring availability, per this crate's error-handling design, over
/// strict cross-process consistency. Writes go to both layers when a shared
/// one is attached; a shared-write failure is swallowed (the local write
/// still lands) rather than failing the whole operation.
pub struct TieredCacheStore<L: CacheStore> {
    local: L,
    shared: Option<Arc<dyn CacheStore>>,
}

impl<L: CacheStore> TieredCacheStore<L> {
    pub fn new(local: L, shared: Option<Arc<dyn CacheStore>>) -> Self {
        Self { local, shared }
    }
}

#[async_trait]
impl<L: CacheStore> CacheStore for TieredCacheStore<L> {
    async fn get(&self, key: &str, local_only: bool) -> Result<Option<String>, CacheStoreError> {
        if local_only {
            return self.local.get(key, true).await;
        }
        match &self.shared {
            Some(shared) => match shared.get(key, false).await {
                Ok(value) => Ok(value),
                Err(_) => self.local.get(key, true).await,
            },
            None => self.local.get(key, true).await,
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        local_only: bool,
    ) -> Result<(), CacheStoreError> {
        self.local.set(key, value.clone(), ttl, true).await?;
        if !local_only {
            if let Some(shared) = &self.shared {
                let _ = shared.set(key, value, ttl, false).await;
            }
        }
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        local_only: bool,
    ) -> Result<i64, CacheStoreError> {
        // The global in-flight counter is always local_only by contract
        // (see crate::counter::GLOBAL_PARALLEL_KEY); increment never
        // consults the shared layer regardless of the flag passed in.
        let _ = local_only;
        self.local.increment(key, delta, true).await
    }
}
