//! In-memory implementation of BatchFetcher for testing and development

use super::fetcher::{BatchFetcher, BatchResults};
use crate::core::value::canonical_json;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// One recorded fetch call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub entity_type: String,
    pub keys: Vec<Value>,
}

/// In-memory batch fetcher
///
/// Stores entities by type and canonical key, and records every call it
/// receives so tests can assert on batching. Uses RwLock for thread-safe
/// access.
#[derive(Clone, Default)]
pub struct InMemoryFetcher {
    entities: Arc<RwLock<HashMap<String, HashMap<String, Value>>>>,
    calls: Arc<RwLock<Vec<FetchCall>>>,
    call_count: Arc<AtomicUsize>,
    failing_types: Arc<RwLock<HashSet<String>>>,
    failing_keys: Arc<RwLock<HashSet<String>>>,
    latency: Option<Duration>,
}

impl InMemoryFetcher {
    /// Create a new empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch call, to simulate I/O
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store an entity under a key
    pub fn insert(&self, entity_type: &str, key: Value, entity: Value) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        entities
            .entry(entity_type.to_string())
            .or_default()
            .insert(canonical_json(&key), entity);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_entity(self, entity_type: &str, key: Value, entity: Value) -> Result<Self> {
        self.insert(entity_type, key, entity)?;
        Ok(self)
    }

    /// Make every call for `entity_type` fail
    pub fn fail_type(&self, entity_type: &str) -> Result<()> {
        self.failing_types
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .insert(entity_type.to_string());
        Ok(())
    }

    /// Report a per-key failure for `key` of `entity_type`
    pub fn fail_key(&self, entity_type: &str, key: &Value) -> Result<()> {
        self.failing_keys
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .insert(format!("{}:{}", entity_type, canonical_json(key)));
        Ok(())
    }

    /// Number of fetch calls received so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every fetch call received so far, in order
    pub fn calls(&self) -> Result<Vec<FetchCall>> {
        let calls = self
            .calls
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(calls.clone())
    }
}

#[async_trait]
impl BatchFetcher for InMemoryFetcher {
    async fn fetch(&self, entity_type: &str, keys: &[Value]) -> Result<BatchResults> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .push(FetchCall {
                entity_type: entity_type.to_string(),
                keys: keys.to_vec(),
            });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failing_types
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
            .contains(entity_type);
        if failing {
            return Err(anyhow!("{} store unavailable", entity_type));
        }

        let entities = self
            .entities
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        let failing_keys = self
            .failing_keys
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        let mut results = BatchResults::new();
        for key in keys {
            let fingerprint = canonical_json(key);
            if failing_keys.contains(&format!("{}:{}", entity_type, fingerprint)) {
                results.fail(key, format!("{} {} is unavailable", entity_type, fingerprint));
                continue;
            }
            if let Some(entity) = entities
                .get(entity_type)
                .and_then(|by_key| by_key.get(&fingerprint))
            {
                results.insert(key, entity.clone());
            }
        }
        Ok(results)
    }
}
