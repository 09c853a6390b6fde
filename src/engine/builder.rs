//! EngineBuilder for fluent engine construction

use super::core::GraphQLEngine;
use crate::config::EngineConfig;
use crate::federation::{ServiceDirectory, SubgraphService};
use crate::loader::{BatchFetcher, FetcherRegistry};
use crate::schema::SchemaRegistry;
use anyhow::Result;
use std::sync::Arc;

/// Builder for [`GraphQLEngine`]
///
/// # Example
///
/// ```ignore
/// let engine = GraphQLEngine::builder()
///     .with_schema(schema)
///     .with_fetcher("Author", InMemoryFetcher::new())
///     .with_service("reviews", reviews_subgraph)
///     .with_config(EngineConfig::from_yaml_file("engine.yaml")?)
///     .build()?;
/// ```
pub struct EngineBuilder {
    schema: Option<SchemaRegistry>,
    fetchers: FetcherRegistry,
    directory: ServiceDirectory,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Create a new EngineBuilder
    pub fn new() -> Self {
        Self {
            schema: None,
            fetchers: FetcherRegistry::new(),
            directory: ServiceDirectory::new(),
            config: EngineConfig::default(),
        }
    }

    /// Set the schema (required)
    pub fn with_schema(mut self, schema: SchemaRegistry) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Register the batch fetcher of one entity type
    pub fn with_fetcher(mut self, entity_type: &str, fetcher: impl BatchFetcher + 'static) -> Self {
        self.fetchers.register(entity_type, Arc::new(fetcher));
        self
    }

    /// Fetcher used for entity types without a dedicated one
    pub fn with_fallback_fetcher(mut self, fetcher: impl BatchFetcher + 'static) -> Self {
        self.fetchers.set_fallback(Arc::new(fetcher));
        self
    }

    /// Register a federated service
    ///
    /// The endpoint recorded for the service comes from the config, if any.
    pub fn with_service(mut self, name: &str, service: impl SubgraphService + 'static) -> Self {
        let endpoint = self
            .config
            .find_service(name)
            .and_then(|s| s.endpoint.clone());
        self.directory.register(name, endpoint, Arc::new(service));
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine
    ///
    /// With the `remote` feature, configured services that were not
    /// registered programmatically but have an endpoint are reached over
    /// HTTP.
    pub fn build(mut self) -> Result<GraphQLEngine> {
        let schema = self
            .schema
            .take()
            .ok_or_else(|| anyhow::anyhow!("Schema is required. Call .with_schema()"))?;

        #[cfg(feature = "remote")]
        for service in &self.config.services {
            if let Some(endpoint) = &service.endpoint
                && !self.directory.contains(&service.name)
            {
                tracing::debug!(service = %service.name, endpoint = %endpoint, "registering HTTP subgraph");
                self.directory.register(
                    service.name.clone(),
                    Some(endpoint.clone()),
                    Arc::new(crate::federation::HttpSubgraph::new(endpoint.clone())),
                );
            }
        }

        // Unregistered services only fail the requests that reach them
        for service in schema.services() {
            if !self.directory.contains(&service) {
                tracing::warn!(service = %service, "schema references an unregistered service");
            }
        }

        tracing::info!(
            types = schema.types().count(),
            fetchers = self.fetchers.entity_types().len(),
            services = self.directory.len(),
            "GraphQL engine built"
        );

        Ok(GraphQLEngine::from_builder_components(
            schema,
            self.fetchers,
            self.directory,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, SchemaBuilder, TypeDescriptor};

    #[test]
    fn test_schema_is_required() {
        let err = EngineBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("Schema is required"));
    }

    #[test]
    fn test_plan_cache_capacity_from_config() {
        let schema = SchemaBuilder::new()
            .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("hello", "String")))
            .build()
            .unwrap();
        let engine = EngineBuilder::new()
            .with_schema(schema)
            .with_config(EngineConfig {
                plan_cache_capacity: 0,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        engine
            .prepare("{ hello }", None, &Default::default())
            .unwrap();
        assert!(engine.plan_cache().is_empty());
    }
}
