use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::processors::{CaptchaType, FinalValue};

/// Content-addressed cache key: SHA-256 over the raw image bytes, the
/// declared captcha type and the canonical option strings.
///
/// Folding the options in is load-bearing: identical bytes recognized under
/// different preprocessing or output options legitimately produce different
/// results, so a byte-hash-only key would serve wrong answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        image: &[u8],
        captcha_type: &str,
        preprocess_key: &str,
        output_key: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image);
        hasher.update([0u8]);
        hasher.update(captcha_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(preprocess_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(output_key.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The recognition outcome stored per fingerprint. Per-call fields (elapsed
/// time, cached flag) are filled in by the engine when it packages a result,
/// so they never live here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRecognition {
    pub raw_text: String,
    pub value: FinalValue,
    pub captcha_type: CaptchaType,
    pub confidence: Option<f32>,
}

struct Entry {
    value: CachedRecognition,
    inserted_at: Instant,
    access_count: u64,
}

/// Point-in-time cache counters, exposed through the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

/// Thread-safe LRU cache for recognition results with an independent TTL.
///
/// Uses the Arc<Mutex<>> pattern for safe concurrent access across tasks.
/// Capacity evicts least-recently-used entries; TTL is checked lazily on
/// `get` and eagerly by [`ResultCache::sweep`], whichever fires first.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<Mutex<LruCache<Fingerprint, Entry>>>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl ResultCache {
    /// Create a cache with the given capacity and time-to-live.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let store = LruCache::new(NonZeroUsize::new(capacity).expect("Capacity must be non-zero"));
        Self {
            store: Arc::new(Mutex::new(store)),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            expirations: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.max_entries.max(1),
            Duration::from_secs(config.ttl_secs),
        )
    }

    /// Look up a fingerprint, refreshing its recency. An entry past the TTL
    /// is removed and reported as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CachedRecognition> {
        let mut store = self.store.lock().unwrap();
        match store.get_mut(fingerprint) {
            Some(entry) => {
                if entry.inserted_at.elapsed() > self.ttl {
                    store.pop(fingerprint);
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                } else {
                    entry.access_count += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(entry.value.clone())
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a result, evicting the least-recently-used entry at capacity.
    pub fn put(&self, fingerprint: Fingerprint, value: CachedRecognition) {
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
            access_count: 0,
        };
        let mut store = self.store.lock().unwrap();
        if let Some((evicted_key, _)) = store.push(fingerprint.clone(), entry) {
            // push returns the displaced pair; same-key replacement is not an
            // eviction.
            if evicted_key != fingerprint {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut store = self.store.lock().unwrap();
        let expired: Vec<Fingerprint> = store
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// How often the given entry has been served, for eviction diagnostics.
    pub fn access_count(&self, fingerprint: &Fingerprint) -> Option<u64> {
        let store = self.store.lock().unwrap();
        store.peek(fingerprint).map(|entry| entry.access_count)
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock().unwrap();
        CacheStats {
            entries: store.len(),
            capacity: store.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
