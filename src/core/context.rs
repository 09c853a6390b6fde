//! Request-scoped context shared by every resolver of one request

use super::cancellation::Cancellation;
use crate::loader::BatchLoader;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Typed request data supplied by the transport layer
///
/// Holds at most one value per type, e.g. an authenticated user or a
/// database handle that resolvers read through [`RequestContext::data`].
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Everything one request owns while it executes
///
/// Created when the request starts and dropped when it ends, together with
/// its batch cache.
pub struct RequestContext {
    request_id: Uuid,
    variables: Map<String, Value>,
    extensions: Extensions,
    loader: BatchLoader,
    cancellation: Cancellation,
}

impl RequestContext {
    pub fn new(
        variables: Map<String, Value>,
        extensions: Extensions,
        loader: BatchLoader,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            variables,
            extensions,
            loader,
            cancellation,
        }
    }

    /// Override the generated request id
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Coerced operation variables
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Typed request data inserted by the caller
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub fn loader(&self) -> &BatchLoader {
        &self.loader
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("variables", &self.variables)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct CurrentUser(&'static str);

    #[test]
    fn test_extensions_are_typed() {
        let mut extensions = Extensions::new();
        assert!(extensions.insert(CurrentUser("ada")).is_none());
        assert_eq!(extensions.insert(CurrentUser("bob")), Some(CurrentUser("ada")));
        extensions.insert(42u32);

        assert_eq!(extensions.get::<CurrentUser>(), Some(&CurrentUser("bob")));
        assert_eq!(extensions.get::<u32>(), Some(&42));
        assert!(extensions.get::<String>().is_none());
        assert_eq!(extensions.len(), 2);
    }
}
