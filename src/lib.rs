//! # this-graphql
//!
//! A GraphQL query execution core: schema registry, query plan compiler,
//! level-synchronous executor with batched data loading, and a federation
//! planner that splits service-owned fields into sub-queries.
//!
//! ## Features
//!
//! - **Typed Schema Registry**: types, fields and resolver bindings captured at build time
//! - **Compiled Plans**: documents compiled once into leveled plans, cached by fingerprint
//! - **Batched Loading**: one fetch per entity type and level, deduplicated per request
//! - **Null Propagation**: field errors null the nearest nullable ancestor, one error per cause
//! - **Cancellation**: caller tokens and deadlines return partial data promptly
//! - **Federation**: entity resolution across services, staged by dependency
//! - **Configuration-Based**: limits, timeouts and services from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use this_graphql::prelude::*;
//!
//! let schema = SchemaBuilder::new()
//!     .register(
//!         TypeDescriptor::object("Query").field(
//!             FieldDescriptor::new("book", "Book")
//!                 .argument(ArgumentDescriptor::new("id", "ID!"))
//!                 .resolve_with(|ctx| Box::pin(async move {
//!                     let id: String = ctx.arg("id")?;
//!                     Ok(ctx.load("Book", id).await?)
//!                 })),
//!         ),
//!     )
//!     .register(
//!         TypeDescriptor::object("Book")
//!             .field(FieldDescriptor::new("id", "ID!"))
//!             .field(FieldDescriptor::new("title", "String!")),
//!     )
//!     .build()?;
//!
//! let engine = GraphQLEngine::builder()
//!     .with_schema(schema)
//!     .with_fetcher("Book", books)
//!     .build()?;
//!
//! let response = engine
//!     .execute(Request::new("{ book(id: \"1\") { title } }"))
//!     .await;
//! println!("{}", response.to_json());
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod execution;
pub mod federation;
pub mod loader;
pub mod plan;
pub mod schema;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        cancellation::{Cancellation, Interruption},
        context::{Extensions, RequestContext},
        error::{EngineError, FederationError, LoadError, PlanError, SchemaError},
        path::{PathSegment, ResponsePath},
        response::{FieldError, GraphQLError, Response},
    };

    // === Schema ===
    pub use crate::schema::{
        ArgumentDescriptor, FieldDescriptor, Resolver, ResolverContext, SchemaBuilder,
        SchemaRegistry, TypeDescriptor, TypeKind, TypeRef,
    };

    // === Planning & Execution ===
    pub use crate::execution::{ExecutionOutcome, Executor};
    pub use crate::plan::{ExecutionPlan, PlanCache, PlanLimits, QueryPlanCompiler};

    // === Loading ===
    pub use crate::loader::{BatchFetcher, BatchKey, BatchLoader, BatchResults, InMemoryFetcher};

    // === Federation ===
    pub use crate::federation::{
        InMemorySubgraph, ServiceDirectory, SubgraphRequest, SubgraphResponse, SubgraphService,
    };

    // === Engine & Config ===
    pub use crate::config::{EngineConfig, ServiceConfig};
    pub use crate::engine::{EngineBuilder, GraphQLEngine, Request};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use tokio_util::sync::CancellationToken;
}
