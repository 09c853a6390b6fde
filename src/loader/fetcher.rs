//! The data-access seam of the batch loader

use crate::core::value::canonical_json;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fetches many entities of one type in a single call
///
/// Implemented by the data-access layer (a database, a remote service...).
/// `keys` never contains duplicates. Keys missing from the result resolve
/// to `null`; per-key failures are reported with [`BatchResults::fail`].
/// Returning `Err` fails every key of the call.
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// impl BatchFetcher for AuthorTable {
///     async fn fetch(&self, _entity_type: &str, keys: &[Value]) -> Result<BatchResults> {
///         let mut results = BatchResults::new();
///         for row in self.select_by_ids(keys).await? {
///             results.insert(&row["id"], row.clone());
///         }
///         Ok(results)
///     }
/// }
/// ```
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    async fn fetch(&self, entity_type: &str, keys: &[Value]) -> Result<BatchResults>;
}

/// Outcome of one fetch call, by key
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    entries: HashMap<String, Result<Value, String>>,
}

impl BatchResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value of a key
    pub fn insert(&mut self, key: &Value, value: Value) {
        self.entries.insert(canonical_json(key), Ok(value));
    }

    /// Record a failure for one key only
    pub fn fail(&mut self, key: &Value, message: impl Into<String>) {
        self.entries.insert(canonical_json(key), Err(message.into()));
    }

    pub fn get(&self, key: &Value) -> Option<&Result<Value, String>> {
        self.entries.get(&canonical_json(key))
    }

    pub(crate) fn take_fingerprint(&mut self, fingerprint: &str) -> Option<Result<Value, String>> {
        self.entries.remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Value, Value)> for BatchResults {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut results = Self::new();
        for (key, value) in iter {
            results.insert(&key, value);
        }
        results
    }
}

/// Fetchers by entity type, with an optional catch-all
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    by_type: HashMap<String, Arc<dyn BatchFetcher>>,
    fallback: Option<Arc<dyn BatchFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: impl Into<String>, fetcher: Arc<dyn BatchFetcher>) {
        self.by_type.insert(entity_type.into(), fetcher);
    }

    /// Fetcher used for entity types without a dedicated one
    pub fn set_fallback(&mut self, fetcher: Arc<dyn BatchFetcher>) {
        self.fallback = Some(fetcher);
    }

    pub fn with_fallback(mut self, fetcher: Arc<dyn BatchFetcher>) -> Self {
        self.set_fallback(fetcher);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<dyn BatchFetcher>> {
        self.by_type.get(entity_type).or(self.fallback.as_ref())
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("entity_types", &self.entity_types())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_lookup_is_canonical() {
        let mut results = BatchResults::new();
        results.insert(&json!({"a": 1, "b": 2}), json!("x"));
        results.fail(&json!(7), "gone");

        assert_eq!(results.get(&json!({"b": 2, "a": 1})), Some(&Ok(json!("x"))));
        assert_eq!(results.get(&json!(7)), Some(&Err("gone".to_string())));
        assert_eq!(results.get(&json!(8)), None);
        assert_eq!(results.len(), 2);
    }
}
