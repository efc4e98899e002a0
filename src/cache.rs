//! Cell-level and provider-response caching with negative entries.
//!
//! Two logical namespaces share one implementation: `cell:{row}:{field}`
//! holds accepted field values, `prov:{row}:{provider}` holds raw provider
//! responses reused across fields of the same row. Entries are versioned;
//! bumping the version invalidates everything at once. A bounded in-memory
//! LRU fronts the optional shared store and becomes authoritative whenever
//! the store is absent or failing. Negative entries record "known to be
//! unenrichable" and short-circuit the waterfall until their TTL lapses.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::CacheConfig;
use crate::store::KeyValueStore;
use crate::types::{Field, NormalizedInput};

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Positive entry within TTL.
    Hit(serde_json::Value),
    /// Negative entry within TTL: the waterfall already found nothing.
    NegativeHit,
    Miss,
}

impl CacheLookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// One stored entry, shared between L1 and the serialized store format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(default)]
    negative: bool,
    stored_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at > chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

/// Cache counters, cheap enough to keep always-on.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub negative_hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.negative_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.negative_hits) as f64 / total as f64
        }
    }
}

/// The enrichment cache.
pub struct EnrichmentCache {
    config: CacheConfig,
    version: AtomicU32,
    l1: Mutex<LruCache<String, StoredEntry>>,
    store: Option<Arc<dyn KeyValueStore>>,
    stats: CacheStats,
}

impl EnrichmentCache {
    pub fn new(config: CacheConfig, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_memory_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            version: AtomicU32::new(config.version),
            l1: Mutex::new(LruCache::new(capacity)),
            store,
            stats: CacheStats::default(),
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Cell-namespace key for one row/field pair, salted with the input
    /// fingerprint so changed row data never serves a stale value.
    pub fn cell_key(input: &NormalizedInput, field: Field) -> String {
        format!(
            "cell:{}:{}:{}",
            input.row_id,
            field,
            input_fingerprint(input)
        )
    }

    /// Provider-response namespace key for one row/provider pair.
    pub fn provider_key(row_id: &str, provider: &str) -> String {
        format!("prov:{row_id}:{provider}")
    }

    fn full_key(&self, key: &str) -> String {
        format!("v{}:{}", self.version.load(Ordering::Relaxed), key)
    }

    /// Look up a key. Expired entries are misses.
    pub fn get(&self, key: &str) -> CacheLookup {
        if !self.config.enabled {
            return CacheLookup::Miss;
        }
        let full = self.full_key(key);
        let now = Utc::now();

        let from_l1 = {
            let mut l1 = match self.l1.lock() {
                Ok(l1) => l1,
                Err(_) => return CacheLookup::Miss,
            };
            match l1.get(&full) {
                Some(entry) if entry.is_expired(now) => {
                    l1.pop(&full);
                    None
                }
                Some(entry) => Some(entry.clone()),
                None => None,
            }
        };

        let entry = from_l1.or_else(|| self.load_from_store(&full, now));

        match entry {
            Some(entry) if entry.negative => {
                self.stats.negative_hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::NegativeHit
            }
            Some(entry) => match entry.value {
                Some(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    CacheLookup::Hit(value)
                }
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    CacheLookup::Miss
                }
            },
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    fn load_from_store(&self, full_key: &str, now: DateTime<Utc>) -> Option<StoredEntry> {
        let store = self.store.as_ref()?;
        let raw = match store.get(full_key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::debug!(error = %e, "cache store read failed, L1 is authoritative");
                return None;
            }
        };
        let entry: StoredEntry = serde_json::from_str(&raw).ok()?;
        if entry.is_expired(now) {
            return None;
        }
        // Refill L1 so the next lookup stays local.
        if let Ok(mut l1) = self.l1.lock() {
            l1.put(full_key.to_string(), entry.clone());
        }
        Some(entry)
    }

    /// Store a positive entry under the default TTL.
    pub fn set(&self, key: &str, value: serde_json::Value) {
        self.write(
            key,
            StoredEntry {
                value: Some(value),
                negative: false,
                stored_at: Utc::now(),
                ttl_seconds: self.config.default_ttl_seconds,
            },
        );
    }

    /// Store a negative entry ("known unenrichable") under the short TTL.
    pub fn set_negative(&self, key: &str) {
        self.write(
            key,
            StoredEntry {
                value: None,
                negative: true,
                stored_at: Utc::now(),
                ttl_seconds: self.config.negative_ttl_seconds,
            },
        );
    }

    fn write(&self, key: &str, entry: StoredEntry) {
        if !self.config.enabled {
            return;
        }
        let full = self.full_key(key);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut l1) = self.l1.lock() {
            l1.put(full.clone(), entry.clone());
        }
        if let Some(store) = &self.store {
            match serde_json::to_string(&entry) {
                Ok(serialized) => {
                    if let Err(e) = store.set(&full, &serialized, Some(entry.ttl_seconds)) {
                        tracing::debug!(error = %e, "cache store write failed");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "cache entry serialization failed"),
            }
        }
    }

    /// Invalidate every entry by bumping the key version.
    pub fn invalidate_all(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut l1) = self.l1.lock() {
            l1.clear();
        }
    }

    /// Batch lookup, one result per key in order.
    pub fn get_multiple(&self, keys: &[String]) -> Vec<CacheLookup> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Batch store of positive entries.
    pub fn set_multiple(&self, pairs: Vec<(String, serde_json::Value)>) {
        for (key, value) in pairs {
            self.set(&key, value);
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            negative_hits: self.stats.negative_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }
}

/// Short stable fingerprint of a row's identifying inputs.
pub fn input_fingerprint(input: &NormalizedInput) -> String {
    let mut hasher = Sha256::new();
    for part in [
        input.name.as_deref(),
        input.domain.as_deref(),
        input.linkedin_url.as_deref(),
        input.email.as_deref(),
        input.company.as_deref(),
    ] {
        hasher.update(part.unwrap_or_default().as_bytes());
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}
