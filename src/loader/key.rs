//! Batch keys

use crate::core::value::canonical_json;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies one entity to load: `(entity type, key value)`
///
/// Keys compare by their canonical JSON rendering, so `{"a":1,"b":2}` and
/// `{"b":2,"a":1}` are the same key.
#[derive(Clone)]
pub struct BatchKey {
    entity_type: Arc<str>,
    key: Value,
    fingerprint: String,
}

impl BatchKey {
    pub fn new(entity_type: &str, key: Value) -> Self {
        Self {
            entity_type: Arc::from(entity_type),
            fingerprint: canonical_json(&key),
            key,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Canonical JSON of the key value
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl PartialEq for BatchKey {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.fingerprint == other.fingerprint
    }
}

impl Eq for BatchKey {}

impl Hash for BatchKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_type.hash(state);
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchKey({}, {})", self.entity_type, self.fingerprint)
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_keys_compare_canonically() {
        let a = BatchKey::new("Book", json!({"isbn": "1", "edition": 2}));
        let b = BatchKey::new("Book", json!({"edition": 2, "isbn": "1"}));
        let c = BatchKey::new("Author", json!({"isbn": "1", "edition": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_string_and_number_keys_differ() {
        assert_ne!(BatchKey::new("Book", json!(1)), BatchKey::new("Book", json!("1")));
    }
}
