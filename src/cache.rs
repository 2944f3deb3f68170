//! Answer cache over a shared key-value store.
//!
//! Keys are derived from the normalized query, the resolved entities, the
//! language, and the domain tag, so distinct inputs can never collide into
//! one slot. Keys carry a `"{domain}:{lang}:"` prefix, which makes
//! invalidating a whole namespace a prefix deletion. Every store error
//! degrades to a miss; answer availability never depends on cache health.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::RouteType;
use crate::error::CacheError;
use crate::extract::ResolvedEntities;
use crate::providers::TokenUsage;
use crate::query::{Language, normalize};

/// How often (in lookups) to emit a cache statistics log line.
const STATS_LOG_EVERY_N: u64 = 100;

const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Shared key-value store the cache runs against.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`. Returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

struct StoreEntry {
    value: String,
    created_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
}

/// In-memory store with per-entry TTL and LRU-style capacity eviction.
pub struct MemoryStore {
    /// `std::sync::Mutex` (not tokio): never held across an `.await`
    /// point, so blocking acquisition is safe.
    entries: Mutex<HashMap<String, StoreEntry>>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = guard.get_mut(key) {
            if now.duration_since(entry.created_at) < entry.ttl {
                entry.last_accessed = now;
                return Ok(Some(entry.value.clone()));
            }
            guard.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        guard.retain(|_, entry| now.duration_since(entry.created_at) < entry.ttl);

        while guard.len() >= self.max_entries {
            let oldest_key = guard
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest_key {
                guard.remove(&k);
            } else {
                break;
            }
        }

        guard.insert(
            key.to_string(),
            StoreEntry {
                value,
                created_at: now,
                last_accessed: now,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|key, _| !key.starts_with(prefix));
        Ok((before - guard.len()) as u64)
    }
}

/// A cached answer with enough context to audit the hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub text: String,
    pub entities: ResolvedEntities,
    pub language: Language,
    pub route: RouteType,
    pub created_at: DateTime<Utc>,
    pub usage: TokenUsage,
}

/// Configuration for the answer cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace tag, first segment of every key.
    pub domain: String,
    pub ttl: Duration,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            domain: "nutrition".to_string(),
            ttl: Duration::from_secs(3600),
            enabled: true,
        }
    }
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Answer cache over an optional shared store.
///
/// Constructed disabled, every operation is a no-op and `get` always
/// misses.
pub struct ResponseCache {
    store: Option<Arc<dyn KeyValueStore>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let store = config.enabled.then_some(store);
        Self {
            store,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache with no backing store. Every lookup misses.
    pub fn disabled() -> Self {
        Self {
            store: None,
            config: CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Derive the store key for a query.
    ///
    /// Hashes the normalized query, the entities as sorted `k=v` pairs,
    /// the language, and the domain tag via SHA-256. The digest sits
    /// behind a `"{domain}:{lang}:"` prefix.
    fn cache_key(&self, query: &str, entities: &ResolvedEntities, language: Language) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize(query).as_bytes());
        hasher.update(b"|");
        for (field, value) in entities.field_pairs() {
            if let Some(value) = value {
                hasher.update(field.as_bytes());
                hasher.update(b"=");
                hasher.update(value.as_bytes());
                hasher.update(b"\x00");
            }
        }
        hasher.update(b"|");
        hasher.update(language.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.config.domain.as_bytes());

        format!(
            "{}:{}:{:x}",
            self.config.domain,
            language.as_str(),
            hasher.finalize()
        )
    }

    /// Look up a cached answer. Store errors and corrupt payloads miss.
    pub async fn get(
        &self,
        query: &str,
        entities: &ResolvedEntities,
        language: Language,
    ) -> Option<CachedAnswer> {
        let store = self.store.as_ref()?;
        let key = self.cache_key(query, entities, language);

        match store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedAnswer>(&raw) {
                Ok(answer) => {
                    self.note_lookup(true);
                    tracing::debug!(key = %key, "answer cache hit");
                    Some(answer)
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "corrupt cache entry, dropping");
                    let _ = store.delete(&key).await;
                    self.note_lookup(false);
                    None
                }
            },
            Ok(None) => {
                self.note_lookup(false);
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "cache get failed, treating as miss");
                self.note_lookup(false);
                None
            }
        }
    }

    /// Store an answer under the key derived from the query and the
    /// answer's own entities and language. Store errors are logged and
    /// swallowed.
    pub async fn set(&self, query: &str, answer: &CachedAnswer) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = self.cache_key(query, &answer.entities, answer.language);

        let payload = match serde_json::to_string(answer) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "cache serialization failed, skipping store");
                return;
            }
        };

        if let Err(err) = store.set(&key, payload, self.config.ttl).await {
            tracing::warn!(error = %err, "cache set failed, continuing uncached");
        }
    }

    /// Drop cached answers by prefix, optionally narrowing to another
    /// domain or one language. Returns how many entries went.
    pub async fn clear(&self, domain: Option<&str>, language: Option<Language>) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let domain = domain.unwrap_or(&self.config.domain);
        let prefix = match language {
            Some(lang) => format!("{}:{}:", domain, lang.as_str()),
            None => format!("{domain}:"),
        };

        match store.delete_prefix(&prefix).await {
            Ok(removed) => {
                tracing::debug!(removed, prefix = %prefix, "cleared cached answers");
                removed
            }
            Err(err) => {
                tracing::warn!(error = %err, "cache clear failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn note_lookup(&self, hit: bool) {
        let (hits, misses) = if hit {
            (self.hits.fetch_add(1, Ordering::Relaxed) + 1, self.misses.load(Ordering::Relaxed))
        } else {
            (self.hits.load(Ordering::Relaxed), self.misses.fetch_add(1, Ordering::Relaxed) + 1)
        };
        let total = hits + misses;
        if total.is_multiple_of(STATS_LOG_EVERY_N) {
            tracing::info!(
                lookups = total,
                hits,
                hit_rate_pct = format!("{:.1}", hits as f64 / total as f64 * 100.0),
                "answer cache statistics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Store {
                reason: "connection reset".to_string(),
            })
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Store {
                reason: "connection reset".to_string(),
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Store {
                reason: "connection reset".to_string(),
            })
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Store {
                reason: "connection reset".to_string(),
            })
        }
    }

    fn entities(nutrient: &str) -> ResolvedEntities {
        ResolvedEntities {
            nutrient: Some(nutrient.to_string()),
            ..ResolvedEntities::default()
        }
    }

    fn answer(text: &str) -> CachedAnswer {
        CachedAnswer {
            text: text.to_string(),
            entities: entities("iron"),
            language: Language::En,
            route: RouteType::Structured,
            created_at: Utc::now(),
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 40,
            },
        }
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(Arc::new(MemoryStore::default()), CacheConfig::default())
    }

    #[test]
    fn key_is_deterministic_and_prefixed() {
        let cache = cache();
        let k1 = cache.cache_key("How much iron  in lentils?", &entities("iron"), Language::En);
        let k2 = cache.cache_key("how much iron in lentils?", &entities("iron"), Language::En);
        assert_eq!(k1, k2);
        assert!(k1.starts_with("nutrition:en:"));
        // domain, language, then a SHA-256 hex digest
        assert_eq!(k1.len(), "nutrition:en:".len() + 64);
    }

    #[test]
    fn key_varies_by_entities_language_and_domain() {
        let cache = cache();
        let base = cache.cache_key("iron content", &entities("iron"), Language::En);
        assert_ne!(
            base,
            cache.cache_key("iron content", &entities("calcium"), Language::En)
        );
        assert_ne!(
            base,
            cache.cache_key("iron content", &entities("iron"), Language::Es)
        );

        let other_domain = ResponseCache::new(
            Arc::new(MemoryStore::default()),
            CacheConfig {
                domain: "hydration".to_string(),
                ..CacheConfig::default()
            },
        );
        assert_ne!(
            base,
            other_domain.cache_key("iron content", &entities("iron"), Language::En)
        );
    }

    #[tokio::test]
    async fn round_trip_returns_stored_answer() {
        let cache = cache();
        let stored = answer("Lentils have about 3.3 mg of iron per 100 g.");

        cache.set("how much iron in lentils?", &stored).await;
        let hit = cache
            .get("how much iron in lentils?", &stored.entities, Language::En)
            .await;
        assert_eq!(hit, Some(stored));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn different_entities_never_false_hit() {
        let cache = cache();
        let stored = answer("Lentils have about 3.3 mg of iron per 100 g.");
        cache.set("nutrient content of lentils", &stored).await;

        let miss = cache
            .get("nutrient content of lentils", &entities("calcium"), Language::En)
            .await;
        assert_eq!(miss, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let cache = ResponseCache::disabled();
        assert!(!cache.is_enabled());

        let stored = answer("unused");
        cache.set("query", &stored).await;
        assert_eq!(cache.get("query", &stored.entities, Language::En).await, None);
        assert_eq!(cache.clear(None, None).await, 0);
    }

    #[tokio::test]
    async fn store_errors_degrade_to_miss() {
        let cache = ResponseCache::new(Arc::new(BrokenStore), CacheConfig::default());
        let stored = answer("unused");

        cache.set("query", &stored).await;
        assert_eq!(cache.get("query", &stored.entities, Language::En).await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn corrupt_payload_degrades_to_miss() {
        let store = Arc::new(MemoryStore::default());
        let cache = ResponseCache::new(store.clone(), CacheConfig::default());
        let key = cache.cache_key("query", &entities("iron"), Language::En);
        store
            .set(&key, "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("query", &entities("iron"), Language::En).await, None);
        // The corrupt entry was dropped on the way out.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn clear_narrows_by_language() {
        let store = Arc::new(MemoryStore::default());
        let cache = ResponseCache::new(store.clone(), CacheConfig::default());

        let mut spanish = answer("Las lentejas tienen unos 3.3 mg de hierro.");
        spanish.language = Language::Es;
        cache.set("hierro en lentejas", &spanish).await;
        cache.set("iron in lentils", &answer("3.3 mg per 100 g.")).await;
        assert_eq!(store.len(), 2);

        assert_eq!(cache.clear(None, Some(Language::Es)).await, 1);
        assert_eq!(store.len(), 1);
        assert!(
            cache
                .get("iron in lentils", &entities("iron"), Language::En)
                .await
                .is_some()
        );

        assert_eq!(cache.clear(None, None).await, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::default();
        store
            .set("k", "v".to_string(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_evicts_least_recently_used() {
        let store = MemoryStore::new(2);
        let ttl = Duration::from_secs(60);
        store.set("a", "1".to_string(), ttl).await.unwrap();
        store.set("b", "2".to_string(), ttl).await.unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        store.get("a").await.unwrap();
        store.set("c", "3".to_string(), ttl).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_delete_prefix_counts() {
        let store = MemoryStore::default();
        let ttl = Duration::from_secs(60);
        store.set("nutrition:en:a", "1".to_string(), ttl).await.unwrap();
        store.set("nutrition:es:b", "2".to_string(), ttl).await.unwrap();
        store.set("hydration:en:c", "3".to_string(), ttl).await.unwrap();

        assert_eq!(store.delete_prefix("nutrition:").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
