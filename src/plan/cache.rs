//! Process-wide cache of compiled plans
//!
//! Keyed by a blake3 fingerprint of the query text, the operation name and
//! the canonical variables. Each entry holds a `OnceLock`, so concurrent
//! requests for the same fingerprint compile it at most once and the others
//! wait for that result.

use super::node::ExecutionPlan;
use crate::core::error::PlanError;
use crate::core::value::canonical_json;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

type CachedPlan = Result<Arc<ExecutionPlan>, PlanError>;

struct CacheEntry {
    cell: Arc<OnceLock<CachedPlan>>,
    /// Insertion sequence, used to evict the oldest entry
    sequence: u64,
}

/// Concurrent plan cache with at-most-one compilation per key
pub struct PlanCache {
    entries: DashMap<blake3::Hash, CacheEntry>,
    capacity: usize,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    /// A capacity of 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fingerprint of one request shape
    pub fn fingerprint(
        query: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(query.as_bytes());
        hasher.update(&[0]);
        hasher.update(operation_name.unwrap_or_default().as_bytes());
        hasher.update(&[0]);
        hasher.update(canonical_json(&Value::Object(variables.clone())).as_bytes());
        hasher.finalize()
    }

    /// Return the cached plan for `fingerprint`, compiling it if needed
    ///
    /// Compile errors are cached as well: the same fingerprint always fails
    /// the same way.
    pub fn get_or_compile<F>(&self, fingerprint: blake3::Hash, compile: F) -> CachedPlan
    where
        F: FnOnce() -> Result<ExecutionPlan, PlanError>,
    {
        if self.capacity == 0 {
            return compile().map(Arc::new);
        }

        let cell = {
            let entry = self.entries.entry(fingerprint).or_insert_with(|| CacheEntry {
                cell: Arc::new(OnceLock::new()),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            });
            entry.cell.clone()
        };

        let mut compiled = false;
        let result = cell
            .get_or_init(|| {
                compiled = true;
                compile().map(Arc::new)
            })
            .clone();

        if compiled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.evict();
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn evict(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().sequence)
                .map(|entry| *entry.key());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    tracing::trace!(fingerprint = %key.to_hex(), "evicted cached plan");
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::QueryPlanCompiler;
    use crate::schema::{FieldDescriptor, SchemaBuilder, SchemaRegistry, TypeDescriptor};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn schema() -> SchemaRegistry {
        SchemaBuilder::new()
            .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("hello", "String")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_variable_key_order() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(
            PlanCache::fingerprint("{ hello }", None, a.as_object().unwrap()),
            PlanCache::fingerprint("{ hello }", None, b.as_object().unwrap())
        );
        assert_ne!(
            PlanCache::fingerprint("{ hello }", None, &Map::new()),
            PlanCache::fingerprint("{ hello }", Some("Op"), &Map::new())
        );
    }

    #[test]
    fn test_compiles_once_per_fingerprint() {
        let schema = schema();
        let cache = PlanCache::new(8);
        let compilations = AtomicUsize::new(0);
        let key = PlanCache::fingerprint("{ hello }", None, &Map::new());

        for _ in 0..3 {
            let plan = cache
                .get_or_compile(key, || {
                    compilations.fetch_add(1, Ordering::SeqCst);
                    QueryPlanCompiler::new(&schema).compile_str("{ hello }", None, &Map::new())
                })
                .unwrap();
            assert_eq!(plan.nodes().len(), 1);
        }
        assert_eq!(compilations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_concurrent_requests_compile_once() {
        let schema = schema();
        let cache = PlanCache::new(8);
        let compilations = AtomicUsize::new(0);
        let key = PlanCache::fingerprint("{ hello }", None, &Map::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    cache
                        .get_or_compile(key, || {
                            compilations.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            QueryPlanCompiler::new(&schema).compile_str("{ hello }", None, &Map::new())
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(compilations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_errors_are_cached() {
        let schema = schema();
        let cache = PlanCache::new(8);
        let key = PlanCache::fingerprint("{ nope }", None, &Map::new());
        let compile = || QueryPlanCompiler::new(&schema).compile_str("{ nope }", None, &Map::new());

        assert!(cache.get_or_compile(key, compile).is_err());
        assert!(cache.get_or_compile(key, || panic!("must not recompile")).is_err());
    }

    #[test]
    fn test_oldest_entry_is_evicted() {
        let schema = schema();
        let cache = PlanCache::new(2);
        for i in 0..3 {
            let query = format!("{{ a{}: hello }}", i);
            let key = PlanCache::fingerprint(&query, None, &Map::new());
            cache
                .get_or_compile(key, || QueryPlanCompiler::new(&schema).compile_str(&query, None, &Map::new()))
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        let first = PlanCache::fingerprint("{ a0: hello }", None, &Map::new());
        assert!(!cache.entries.contains_key(&first));
    }
}
