//! Engine facade and builder

pub mod builder;
pub mod core;

pub use builder::EngineBuilder;
pub use self::core::{GraphQLEngine, Request};
