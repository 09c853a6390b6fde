//! Resolver bindings and the context they receive

use crate::core::cancellation::Cancellation;
use crate::core::context::RequestContext;
use crate::core::error::LoadError;
use crate::core::path::ResponsePath;
use crate::core::value::property;
use crate::loader::{BatchKey, TaskId};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Produces the value of one field
///
/// Returning `Ok(Value::Null)` is a valid result for nullable fields; an
/// error becomes a field error at the field's response path.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<Value>;
}

/// Everything a resolver gets to see
pub struct ResolverContext<'a> {
    parent: Arc<Value>,
    args: &'a Map<String, Value>,
    request: &'a RequestContext,
    field_name: &'a str,
    parent_type: &'a str,
    path: ResponsePath,
    task: TaskId,
}

impl<'a> ResolverContext<'a> {
    pub(crate) fn new(
        parent: Arc<Value>,
        args: &'a Map<String, Value>,
        request: &'a RequestContext,
        field_name: &'a str,
        parent_type: &'a str,
        path: ResponsePath,
        task: TaskId,
    ) -> Self {
        Self {
            parent,
            args,
            request,
            field_name,
            parent_type,
            path,
            task,
        }
    }

    /// The value returned by the parent field (an empty object at the root)
    pub fn parent(&self) -> &Value {
        &self.parent
    }

    /// A property of the parent value, with the default resolver's lookup rules
    pub fn parent_field(&self, name: &str) -> Value {
        property(&self.parent, name)
    }

    /// Resolved arguments, defaults applied
    pub fn args(&self) -> &Map<String, Value> {
        self.args
    }

    /// A required argument, deserialized
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .args
            .get(name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| anyhow!("Missing argument '{}'", name))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow!("Invalid argument '{}': {}", name, e))
    }

    /// An optional argument, deserialized; absent and null are both `None`
    pub fn arg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.args.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| anyhow!("Invalid argument '{}': {}", name, e)),
        }
    }

    pub fn field_name(&self) -> &str {
        self.field_name
    }

    /// The concrete type the field is resolved on
    pub fn parent_type(&self) -> &str {
        self.parent_type
    }

    pub fn path(&self) -> &ResponsePath {
        &self.path
    }

    pub fn request(&self) -> &RequestContext {
        self.request
    }

    /// Typed request data inserted by the caller
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.request.data::<T>()
    }

    pub fn cancellation(&self) -> &Cancellation {
        self.request.cancellation()
    }

    /// Load one entity through the request's batch loader
    ///
    /// The call is deferred until every resolver of the current level has
    /// either finished or is waiting on the loader, then all keys requested
    /// in that window are fetched together.
    pub async fn load(&self, entity_type: &str, key: impl Into<Value>) -> Result<Value, LoadError> {
        self.request
            .loader()
            .load_in(self.task, BatchKey::new(entity_type, key.into()))
            .await
    }

    /// Load several entities of one type, preserving input order
    pub async fn load_many<I, K>(&self, entity_type: &str, keys: I) -> Result<Vec<Value>, LoadError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let keys = keys
            .into_iter()
            .map(|key| BatchKey::new(entity_type, key.into()))
            .collect();
        self.request.loader().load_many_in(self.task, keys).await
    }
}

/// Adapter for async closures
pub struct FnResolver<F> {
    f: F,
}

impl<F> FnResolver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Resolver for FnResolver<F>
where
    F: for<'a> Fn(ResolverContext<'a>) -> BoxFuture<'a, Result<Value>> + Send + Sync,
{
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<Value> {
        (self.f)(ctx).await
    }
}

/// Adapter for synchronous closures
pub struct SyncResolver<F> {
    f: F,
}

impl<F> SyncResolver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Resolver for SyncResolver<F>
where
    F: for<'a, 'b> Fn(&'b ResolverContext<'a>) -> Result<Value> + Send + Sync,
{
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<Value> {
        (self.f)(&ctx)
    }
}
