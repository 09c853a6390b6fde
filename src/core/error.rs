//! Typed error handling for the execution core
//!
//! Every layer reports its own error type so callers can match on the
//! precise failure instead of inspecting strings.
//!
//! # Error Categories
//!
//! - [`SchemaError`]: registry construction and lookups
//! - [`PlanError`]: everything that aborts a request before a resolver runs
//! - [`LoadError`]: batch loading failures, observed by resolvers
//! - [`FederationError`]: federated query planning
//! - [`EngineError`]: umbrella type returned by the engine facade
//!
//! Each type exposes `error_code()`, the stable machine-readable code that is
//! written to `extensions.code` of serialized GraphQL errors.
//!
//! # Example
//!
//! ```rust,ignore
//! match engine.prepare(query, None, &variables) {
//!     Ok(plan) => println!("{} levels", plan.levels().len()),
//!     Err(EngineError::Plan(PlanError::MissingVariable { name, .. })) => {
//!         println!("variable ${} is required", name);
//!     }
//!     Err(e) => eprintln!("{} ({})", e, e.error_code()),
//! }
//! ```

use thiserror::Error;

/// The main error type of the engine facade
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Schema registry errors
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Compile-time errors (parse, plan, federation planning)
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The request was cancelled by its caller
    #[error("Request cancelled")]
    Cancelled,

    /// The request deadline elapsed
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Internal engine errors (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Schema(e) => e.error_code(),
            EngineError::Plan(e) => e.error_code(),
            EngineError::Cancelled => "CANCELLED",
            EngineError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<FederationError> for EngineError {
    fn from(err: FederationError) -> Self {
        EngineError::Plan(PlanError::Federation(err))
    }
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors raised while building or querying the schema registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A type name is absent from the registry
    #[error("Unknown type '{name}'")]
    UnknownType { name: String },

    /// A field name is absent from its type
    #[error("Unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    /// A field or argument refers to a type that was never registered
    #[error("Field '{type_name}.{field}' refers to unknown type '{referenced}'")]
    DanglingTypeReference {
        type_name: String,
        field: String,
        referenced: String,
    },

    /// A chain of non-null, non-list object fields loops back on itself
    #[error("Unguarded non-null cycle: {}", .path.join(" -> "))]
    UnguardedCycle { path: Vec<String> },

    /// The same type name was registered twice
    #[error("Type '{name}' is registered more than once")]
    DuplicateType { name: String },

    /// The query (or mutation) root type is missing or not an object
    #[error("Root type '{name}' is missing or is not an object type")]
    MissingRootType { name: String },

    /// A union member or implemented interface has the wrong kind
    #[error("Type '{type_name}' references '{referenced}', which is not {expected}")]
    InvalidTypeReference {
        type_name: String,
        referenced: String,
        expected: &'static str,
    },

    /// An object does not declare a field of an interface it implements
    #[error("Type '{type_name}' implements '{interface}' but does not declare field '{field}'")]
    MissingInterfaceField {
        type_name: String,
        interface: String,
        field: String,
    },

    /// An entity key names a field that does not exist
    #[error("Entity key '{field}' is not a field of type '{type_name}'")]
    UnknownKeyField { type_name: String, field: String },
}

impl SchemaError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SchemaError::UnknownType { .. } => "UNKNOWN_TYPE",
            SchemaError::UnknownField { .. } => "UNKNOWN_FIELD",
            SchemaError::DanglingTypeReference { .. } => "DANGLING_TYPE_REFERENCE",
            SchemaError::UnguardedCycle { .. } => "UNGUARDED_CYCLE",
            SchemaError::DuplicateType { .. } => "DUPLICATE_TYPE",
            SchemaError::MissingRootType { .. } => "MISSING_ROOT_TYPE",
            SchemaError::InvalidTypeReference { .. } => "INVALID_TYPE_REFERENCE",
            SchemaError::MissingInterfaceField { .. } => "MISSING_INTERFACE_FIELD",
            SchemaError::UnknownKeyField { .. } => "UNKNOWN_KEY_FIELD",
        }
    }
}

// =============================================================================
// Plan Errors
// =============================================================================

/// Errors that abort a request before any resolver runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The request text is not valid GraphQL
    #[error("Failed to parse query: {message}")]
    Syntax { message: String },

    /// The document has no operation
    #[error("No operation found in query")]
    NoOperation,

    /// The requested operation name does not exist in the document
    #[error("Unknown operation named '{name}'")]
    UnknownOperation { name: String },

    /// Several operations and no operation name
    #[error("Operation name is required when the document contains several operations")]
    AmbiguousOperation,

    /// Subscriptions, or mutations on a schema without a mutation type
    #[error("{kind} operations are not supported")]
    UnsupportedOperation { kind: &'static str },

    /// A required variable was not supplied
    #[error("Variable '${name}' of required type '{ty}' was not provided")]
    MissingVariable { name: String, ty: String },

    /// A required argument has no value and no default
    #[error("Field '{type_name}.{field}' argument '{argument}' is required")]
    MissingArgument {
        type_name: String,
        field: String,
        argument: String,
    },

    /// An argument the field does not declare
    #[error("Unknown argument '{argument}' on field '{type_name}.{field}'")]
    UnknownArgument {
        type_name: String,
        field: String,
        argument: String,
    },

    /// A selected field is absent from its parent type
    #[error("Cannot query field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    /// A type condition names an unknown or non-composite type
    #[error("Unknown type '{name}'")]
    UnknownType { name: String },

    /// A spread names a fragment the document does not define
    #[error("Unknown fragment '{name}'")]
    UnknownFragment { name: String },

    /// A fragment spreads itself, directly or indirectly
    #[error("Cannot spread fragment '{name}' within itself")]
    FragmentCycle { name: String },

    /// A selection set is missing on a composite field, or present on a leaf
    #[error("Invalid selection on field '{type_name}.{field}': {reason}")]
    InvalidSelection {
        type_name: String,
        field: String,
        reason: &'static str,
    },

    /// A `@skip` / `@include` directive without a boolean `if`
    #[error("Directive '@{name}' requires a boolean 'if' argument")]
    InvalidDirective { name: String },

    /// The operation nests deeper than allowed
    #[error("Query depth {depth} exceeds the limit of {limit}")]
    DepthLimitExceeded { depth: usize, limit: usize },

    /// The operation is more expensive than allowed
    #[error("Query complexity {complexity} exceeds the limit of {limit}")]
    ComplexityLimitExceeded { complexity: u64, limit: u64 },

    /// Federated planning failed
    #[error(transparent)]
    Federation(#[from] FederationError),
}

impl PlanError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PlanError::Syntax { .. } => "GRAPHQL_PARSE_FAILED",
            PlanError::NoOperation => "NO_OPERATION",
            PlanError::UnknownOperation { .. } => "UNKNOWN_OPERATION",
            PlanError::AmbiguousOperation => "AMBIGUOUS_OPERATION",
            PlanError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            PlanError::MissingVariable { .. } => "MISSING_VARIABLE",
            PlanError::MissingArgument { .. } => "MISSING_ARGUMENT",
            PlanError::UnknownArgument { .. } => "UNKNOWN_ARGUMENT",
            PlanError::UnknownField { .. } => "UNKNOWN_FIELD",
            PlanError::UnknownType { .. } => "UNKNOWN_TYPE",
            PlanError::UnknownFragment { .. } => "UNKNOWN_FRAGMENT",
            PlanError::FragmentCycle { .. } => "FRAGMENT_CYCLE",
            PlanError::InvalidSelection { .. } => "INVALID_SELECTION",
            PlanError::InvalidDirective { .. } => "INVALID_DIRECTIVE",
            PlanError::DepthLimitExceeded { .. } => "DEPTH_LIMIT_EXCEEDED",
            PlanError::ComplexityLimitExceeded { .. } => "COMPLEXITY_LIMIT_EXCEEDED",
            PlanError::Federation(e) => e.error_code(),
        }
    }
}

// =============================================================================
// Load Errors
// =============================================================================

/// Errors observed by resolvers waiting on the batch loader
///
/// Clonable: one failed fetch fails every waiter of its batch with the
/// same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The whole fetch call failed
    #[error("Batch fetch for '{entity_type}' failed: {message}")]
    Fetch {
        entity_type: String,
        message: String,
    },

    /// The fetcher reported a failure for this key only
    #[error("Failed to load '{entity_type}' {key}: {message}")]
    Key {
        entity_type: String,
        key: String,
        message: String,
    },

    /// No fetcher is registered for the entity type
    #[error("No batch fetcher registered for entity type '{entity_type}'")]
    NoFetcher { entity_type: String },

    /// The request was cancelled while waiting
    #[error("Load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LoadError::Fetch { .. } => "BATCH_FETCH_FAILED",
            LoadError::Key { .. } => "BATCH_KEY_FAILED",
            LoadError::NoFetcher { .. } => "NO_FETCHER",
            LoadError::Cancelled => "CANCELLED",
        }
    }
}

// =============================================================================
// Federation Errors
// =============================================================================

/// Errors raised while planning a federated operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FederationError {
    /// A field is owned by a service missing from the directory
    #[error("Unknown service '{name}'")]
    UnknownService { name: String },

    /// Fetch groups depend on each other in a loop
    #[error("Circular dependency between services: {}", .services.join(" -> "))]
    CircularDependency { services: Vec<String> },

    /// A service-owned field below a field resolved locally
    #[error("Field '{field}' is owned by service '{service}' but its parent is resolved locally")]
    UnsupportedLocalParent { field: String, service: String },

    /// A cross-service edge on a type that declares no entity keys
    #[error("Type '{type_name}' is reached across services but declares no entity keys")]
    MissingKeys { type_name: String },
}

impl FederationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            FederationError::UnknownService { .. } => "UNKNOWN_SERVICE",
            FederationError::CircularDependency { .. } => "CIRCULAR_SERVICE_DEPENDENCY",
            FederationError::UnsupportedLocalParent { .. } => "UNSUPPORTED_LOCAL_PARENT",
            FederationError::MissingKeys { .. } => "MISSING_ENTITY_KEYS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_delegates_codes() {
        let err = EngineError::from(PlanError::MissingVariable {
            name: "id".to_string(),
            ty: "ID!".to_string(),
        });
        assert_eq!(err.error_code(), "MISSING_VARIABLE");
        assert_eq!(
            err.to_string(),
            "Variable '$id' of required type 'ID!' was not provided"
        );
    }

    #[test]
    fn test_federation_error_folds_into_plan_error() {
        let err = EngineError::from(FederationError::UnknownService {
            name: "reviews".to_string(),
        });
        assert!(matches!(
            err,
            EngineError::Plan(PlanError::Federation(FederationError::UnknownService { .. }))
        ));
        assert_eq!(err.error_code(), "UNKNOWN_SERVICE");
    }

    #[test]
    fn test_unguarded_cycle_message_lists_path() {
        let err = SchemaError::UnguardedCycle {
            path: vec!["A.b".to_string(), "B.a".to_string()],
        };
        assert_eq!(err.to_string(), "Unguarded non-null cycle: A.b -> B.a");
    }
}
