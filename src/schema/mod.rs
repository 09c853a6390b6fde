//! Schema registry, descriptors and resolver bindings

pub mod registry;
pub mod resolver;
pub mod types;

pub use registry::{BUILTIN_SCALARS, SchemaBuilder, SchemaRegistry};
pub use resolver::{FnResolver, Resolver, ResolverContext, SyncResolver};
pub use types::{
    ArgumentDescriptor, Discriminator, FieldDescriptor, TypeDescriptor, TypeKind, TypeRef,
};
