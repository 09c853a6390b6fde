//! Core types shared by every layer of the engine

pub mod cancellation;
pub mod context;
pub mod error;
pub mod path;
pub mod response;
pub mod value;

pub use cancellation::{Cancellation, Interruption};
pub use context::{Extensions, RequestContext};
pub use error::{EngineError, FederationError, LoadError, PlanError, SchemaError};
pub use path::{PathSegment, ResponsePath};
pub use response::{FieldError, GraphQLError, Response};
