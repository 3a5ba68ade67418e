// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content-addressed deduplication cache for completed runs.
//
// Identical uploads map to the same `ContentHash`, so a page that has already
// been through the pipeline is answered from memory. Entries are never
// mutated and never evicted: the cache grows for the lifetime of the process.
// Long-running hosts that see many distinct pages should put a bounded store
// in front of it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use folio_core::FinalRecord;
use folio_core::error::Result;

/// Number of digest bytes kept in a [`ContentHash`].
pub const HASH_LEN: usize = 16;

/// SHA-256 of the uploaded bytes, truncated to 16 bytes.
///
/// Displays as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest[..HASH_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A completed run keyed by the hash of its input.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content_hash: ContentHash,
    pub record: Arc<FinalRecord>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(content_hash: ContentHash, record: FinalRecord) -> Self {
        Self {
            content_hash,
            record: Arc::new(record),
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits as a percentage of lookups, one decimal place.
    pub hit_rate_percent: f64,
}

/// In-memory, unbounded map from content hash to completed record.
#[derive(Default)]
pub struct DedupCache {
    entries: Mutex<HashMap<ContentHash, Arc<CacheEntry>>>,
    /// One async lock per hash so concurrent uploads of the same page run once.
    in_flight: Mutex<HashMap<ContentHash, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash page bytes for lookup.
    pub fn hash(data: &[u8]) -> ContentHash {
        ContentHash::of(data)
    }

    /// Look up a record, counting the lookup as a hit or a miss.
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<CacheEntry>> {
        let found = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(hash).cloned());

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %hash, "Cache hit");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %hash, "Cache miss");
                None
            }
        }
    }

    /// Store an entry unless one already exists for `hash`.
    ///
    /// Returns whichever entry ends up in the cache.
    pub fn put(&self, hash: ContentHash, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        match self.entries.lock() {
            Ok(mut entries) => {
                let stored = Arc::clone(entries.entry(hash).or_insert_with(|| Arc::clone(&entry)));
                if Arc::ptr_eq(&stored, &entry) {
                    info!(hash = %hash, size = entries.len(), "Cached run result");
                }
                stored
            }
            Err(_) => entry,
        }
    }

    /// Return the cached record for `hash`, or run `compute` and cache its
    /// result.
    ///
    /// Concurrent callers with the same hash are serialized: the first one
    /// computes, the rest wait and then hit. The flag is `true` when the
    /// record came from the cache. Failed computations are not cached. The
    /// per-hash lock is dropped once its last caller returns.
    pub async fn get_or_compute<F, Fut>(
        &self,
        hash: ContentHash,
        compute: F,
    ) -> Result<(Arc<CacheEntry>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FinalRecord>>,
    {
        let slot = self.slot_for(hash);
        let _guard = slot.lock.lock().await;

        if let Some(entry) = self.get(&hash) {
            return Ok((entry, true));
        }

        let record = compute().await?;
        let entry = self.put(hash, CacheEntry::new(hash, record));
        Ok((entry, false))
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate_percent = if lookups == 0 {
            0.0
        } else {
            (hits as f64 / lookups as f64 * 1000.0).round() / 10.0
        };
        CacheStats {
            size: self.len(),
            hits,
            misses,
            hit_rate_percent,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_for(&self, hash: ContentHash) -> InFlightSlot<'_> {
        let lock = match self.in_flight.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(hash).or_default()),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        };
        InFlightSlot {
            cache: self,
            hash,
            lock,
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// A caller's handle on the per-hash lock. Removes the map entry on drop
/// when no other caller holds it, including when the caller is cancelled.
struct InFlightSlot<'a> {
    cache: &'a DedupCache,
    hash: ContentHash,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.cache.in_flight.lock() {
            // Handles are only cloned under this lock: the map's and ours.
            let unshared = locks
                .get(&self.hash)
                .is_some_and(|held| Arc::ptr_eq(held, &self.lock))
                && Arc::strong_count(&self.lock) == 2;
            if unshared {
                locks.remove(&self.hash);
            }
        }
    }
}
