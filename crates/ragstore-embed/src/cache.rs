//! Query embedding cache.
//!
//! [`LruEmbeddingCache`] keeps a bounded set of embeddings keyed by the
//! blake3 digest of the query text. Recency is tracked with a doubly linked
//! list whose nodes live in a slab and link to each other by index, so
//! lookups, promotions and evictions are all O(1).
//!
//! [`CachedEmbeddingProvider`] puts a cache in front of any
//! [`EmbeddingProvider`].

use async_trait::async_trait;
use parking_lot::Mutex;
use ragstore_core::{EmbedError, EmbeddingProvider, MetricsCollector, NoopMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity used when zero is requested.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A thread-safe store of query embeddings.
pub trait EmbeddingCache: Send + Sync {
    /// Cached embedding for `query`, marking it most recently used.
    fn get(&self, query: &str) -> Option<Vec<f32>>;

    /// Store an embedding, evicting the least recently used entry if full.
    fn set(&self, query: &str, embedding: Vec<f32>);

    /// Remove every entry.
    fn clear(&self);

    /// Number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of entries evicted
    pub evictions: u64,
}

fn hash_text(text: &str) -> blake3::Hash {
    blake3::hash(text.as_bytes())
}

struct Node {
    key: blake3::Hash,
    embedding: Vec<f32>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab-backed recency list plus key index.
#[derive(Default)]
struct LruState {
    nodes: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<blake3::Hash, usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    stats: CacheStats,
}

impl LruState {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn allocate(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn evict_tail(&mut self) {
        if let Some(idx) = self.tail {
            self.unlink(idx);
            let key = self.nodes[idx].key;
            self.index.remove(&key);
            self.nodes[idx].embedding = Vec::new();
            self.free.push(idx);
            self.stats.evictions += 1;
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }
}

/// Bounded least-recently-used embedding cache.
pub struct LruEmbeddingCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl LruEmbeddingCache {
    /// Create a cache holding up to `capacity` entries (0 means
    /// [`DEFAULT_CACHE_CAPACITY`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CACHE_CAPACITY
        } else {
            capacity
        };
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

impl Default for LruEmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl EmbeddingCache for LruEmbeddingCache {
    fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = hash_text(query);
        let mut state = self.state.lock();
        match state.index.get(&key).copied() {
            Some(idx) => {
                state.stats.hits += 1;
                state.promote(idx);
                Some(state.nodes[idx].embedding.clone())
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    fn set(&self, query: &str, embedding: Vec<f32>) {
        let key = hash_text(query);
        let mut state = self.state.lock();
        if let Some(idx) = state.index.get(&key).copied() {
            state.nodes[idx].embedding = embedding;
            state.promote(idx);
            return;
        }

        let idx = state.allocate(Node {
            key,
            embedding,
            prev: None,
            next: None,
        });
        state.push_front(idx);
        state.index.insert(key, idx);
        if state.index.len() > self.capacity {
            state.evict_tail();
        }
    }

    fn clear(&self) {
        self.state.lock().clear();
    }

    fn len(&self) -> usize {
        self.state.lock().index.len()
    }
}

/// Embedding provider that consults a cache first.
pub struct CachedEmbeddingProvider {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn EmbeddingCache>,
    metrics: Arc<dyn MetricsCollector>,
}

impl CachedEmbeddingProvider {
    /// Wrap `provider`. Cache hits and misses are reported to `metrics`
    /// when given.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn EmbeddingCache>,
        metrics: Option<Arc<dyn MetricsCollector>>,
    ) -> Self {
        Self {
            provider,
            cache,
            metrics: metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
        }
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    fn record(&self, hit: bool) {
        let op = if hit {
            "embedding_cache_hit"
        } else {
            "embedding_cache_miss"
        };
        self.metrics.record_operation(op, Duration::ZERO, true);
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    async fn generate_embedding(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<Vec<f32>, EmbedError> {
        if let Some(hit) = self.cache.get(text) {
            self.record(true);
            return Ok(hit);
        }
        self.record(false);

        let embedding = self.provider.generate_embedding(cancel, text).await?;
        self.cache.set(text, embedding.clone());
        Ok(embedding)
    }

    async fn generate_embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut uncached_texts = Vec::new();
        let mut uncached_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(hit) => {
                    self.record(true);
                    results.push(Some(hit));
                }
                None => {
                    self.record(false);
                    uncached_texts.push(text.clone());
                    uncached_indices.push(i);
                    results.push(None);
                }
            }
        }

        if !uncached_texts.is_empty() {
            debug!("Cache miss for {} texts, embedding", uncached_texts.len());
            let fresh = self
                .provider
                .generate_embeddings(cancel, &uncached_texts)
                .await?;
            if fresh.len() != uncached_texts.len() {
                return Err(EmbedError::CountMismatch {
                    expected: uncached_texts.len(),
                    got: fresh.len(),
                });
            }
            for ((idx, text), embedding) in uncached_indices
                .into_iter()
                .zip(&uncached_texts)
                .zip(fresh)
            {
                self.cache.set(text, embedding.clone());
                results[idx] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| EmbedError::Inference("missing embedding".to_string())))
            .collect()
    }
}
