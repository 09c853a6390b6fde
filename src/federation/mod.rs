//! Federation: splitting service-owned fields into sub-queries
//!
//! Active only when a plan contains fields owned by a service. The
//! [`FederationPlanner`] turns those fields into fetch groups ordered in
//! stages, the [`FederationExecutor`] runs them against the
//! [`ServiceDirectory`], and the execution engine reads the stitched
//! [`FederatedData`] in place of resolver calls.

pub mod directory;
pub mod executor;
#[cfg(feature = "remote")]
pub mod http;
pub mod in_memory;
pub mod planner;
pub mod reference;
pub mod selection;

pub use directory::{
    ServiceDefinition, ServiceDirectory, SubgraphError, SubgraphOperation, SubgraphRequest,
    SubgraphResponse, SubgraphService,
};
pub use executor::{FederatedData, FederationExecutor};
#[cfg(feature = "remote")]
pub use http::HttpSubgraph;
pub use in_memory::InMemorySubgraph;
pub use planner::{FederatedPlan, FederationPlanner, FetchGroup, FetchKind};
pub use reference::EntityReference;
pub use selection::{RenderedQuery, SelectedArgument, SelectedField, Selection};
