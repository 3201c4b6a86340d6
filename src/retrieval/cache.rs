//! Chunk-Result Cache
//!
//! Time-boxed cache for retrieval results, the only state shared across
//! jobs. Keys cover query text, the sorted candidate-id set, the limit, and
//! the tier thresholds. Read/insert races are acceptable: recomputation is
//! idempotent and cheap relative to a model call.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constants::retrieval as retrieval_constants;
use crate::types::{Chunk, SourceId};

/// TTL cache over balanced retrieval results
pub struct ChunkCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

struct CacheEntry {
    chunks: Vec<Chunk>,
    inserted_at: Instant,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(retrieval_constants::CACHE_TTL_SECS),
            retrieval_constants::CACHE_MAX_ENTRIES,
        )
    }
}

impl ChunkCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Cache key over everything that determines a retrieval result
    pub fn key(query: &str, source_ids: &[SourceId], limit: usize, tiers: &[f32]) -> String {
        let mut sorted: Vec<&str> = source_ids.iter().map(|id| id.as_str()).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        for id in sorted {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(limit.to_le_bytes());
        for tier in tiers {
            hasher.update(tier.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<Chunk>> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        debug!(key = &key[..12.min(key.len())], "Chunk cache hit");
        Some(entry.chunks.clone())
    }

    pub fn insert(&self, key: String, chunks: Vec<Chunk>) {
        if self.entries.len() >= self.max_entries {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                chunks,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries; if none expired, drop the oldest
    fn evict(&self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.inserted_at.elapsed() <= self.ttl);
        if self.entries.len() < before {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
