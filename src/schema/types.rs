//! Type and field descriptors
//!
//! Descriptors are plain data plus resolver bindings. They are assembled by
//! the caller, handed to [`SchemaBuilder`](super::SchemaBuilder) and never
//! change afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! let book = TypeDescriptor::object("Book")
//!     .key("id")
//!     .field(FieldDescriptor::new("id", "ID!"))
//!     .field(FieldDescriptor::new("title", "String!"))
//!     .field(
//!         FieldDescriptor::new("author", "Author")
//!             .resolve_with(|ctx| {
//!                 async move {
//!                     let id = ctx.parent_field("authorId");
//!                     Ok(ctx.load("Author", id).await?)
//!                 }
//!                 .boxed()
//!             }),
//!     );
//! ```

use super::resolver::{FnResolver, Resolver, ResolverContext, SyncResolver};
use anyhow::Result;
use futures::future::BoxFuture;
use graphql_parser::query::Type;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The kind of a named type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    InputObject,
}

impl TypeKind {
    /// Object, interface and union types carry a selection set
    pub fn is_composite(self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, TypeKind::Enum | TypeKind::Scalar)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Object => "an object type",
            TypeKind::Interface => "an interface type",
            TypeKind::Union => "a union type",
            TypeKind::Enum => "an enum type",
            TypeKind::Scalar => "a scalar type",
            TypeKind::InputObject => "an input type",
        }
    }
}

/// A possibly wrapped type reference such as `[Book!]!`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        TypeRef::NonNull(Box::new(inner))
    }

    /// Parse GraphQL type syntax
    ///
    /// Returns `None` for malformed input such as `[Book` or `String!!`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(inner) = input.strip_suffix('!') {
            let inner = Self::parse(inner)?;
            if matches!(inner, TypeRef::NonNull(_)) {
                return None;
            }
            return Some(Self::non_null(inner));
        }
        if let Some(inner) = input.strip_prefix('[') {
            let inner = inner.strip_suffix(']')?;
            return Some(Self::list(Self::parse(inner)?));
        }
        let valid = !input.is_empty()
            && input
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !input.starts_with(|c: char| c.is_ascii_digit());
        valid.then(|| Self::named(input))
    }

    /// Convert a type from a parsed document
    pub fn from_ast(ty: &Type<'_, String>) -> Self {
        match ty {
            Type::NamedType(name) => Self::named(name.clone()),
            Type::ListType(inner) => Self::list(Self::from_ast(inner)),
            Type::NonNullType(inner) => Self::non_null(Self::from_ast(inner)),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Whether the type is a list, ignoring an outer non-null wrapper
    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
            TypeRef::Named(_) => false,
        }
    }

    /// The innermost named type
    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    /// The type without its outer non-null wrapper
    pub fn nullable(&self) -> &TypeRef {
        match self {
            TypeRef::NonNull(inner) => inner,
            other => other,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "{}", name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

impl From<&str> for TypeRef {
    /// Parses type syntax; malformed input becomes a named type that the
    /// registry then reports as dangling.
    fn from(input: &str) -> Self {
        Self::parse(input).unwrap_or_else(|| Self::named(input))
    }
}

impl From<String> for TypeRef {
    fn from(input: String) -> Self {
        Self::from(input.as_str())
    }
}

/// An argument (or input object field) declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
    pub description: Option<String>,
}

impl ArgumentDescriptor {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            default_value: None,
            description: None,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A field declaration with its resolver binding
///
/// A field without a resolver reads the property of the same name from its
/// parent value.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, ArgumentDescriptor>,
    pub description: Option<String>,
    /// Weight of the field in the plan's complexity
    pub complexity: u64,
    /// Owning service; `None` inherits the owner of the parent field
    pub service: Option<String>,
    /// Fields of the parent entity this field needs from other services
    pub requires: Vec<String>,
    resolver: Option<Arc<dyn Resolver>>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            arguments: IndexMap::new(),
            description: None,
            complexity: 1,
            service: None,
            requires: Vec::new(),
            resolver: None,
        }
    }

    pub fn argument(mut self, argument: ArgumentDescriptor) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn complexity(mut self, complexity: u64) -> Self {
        self.complexity = complexity;
        self
    }

    /// Mark the field as owned by a federated service
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Declare parent fields the owning service needs to resolve this field
    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Bind a resolver
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Bind an async closure
    pub fn resolve_with<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(ResolverContext<'a>) -> BoxFuture<'a, Result<Value>> + Send + Sync + 'static,
    {
        self.resolver(FnResolver::new(f))
    }

    /// Bind a synchronous closure
    pub fn resolve_sync<F>(self, f: F) -> Self
    where
        F: for<'a, 'b> Fn(&'b ResolverContext<'a>) -> Result<Value> + Send + Sync + 'static,
    {
        self.resolver(SyncResolver::new(f))
    }

    pub fn resolver_binding(&self) -> Option<&Arc<dyn Resolver>> {
        self.resolver.as_ref()
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("arguments", &self.arguments)
            .field("complexity", &self.complexity)
            .field("service", &self.service)
            .field("requires", &self.requires)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// Maps a value of an abstract type to its concrete type name
pub type Discriminator = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// A named type of the schema
#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub fields: IndexMap<String, Arc<FieldDescriptor>>,
    /// Interfaces implemented by an object or interface
    pub interfaces: Vec<String>,
    /// Union members, or (after the registry is built) interface implementors
    pub possible_types: Vec<String>,
    pub enum_values: Vec<String>,
    /// Entity key field names
    pub keys: Vec<String>,
    discriminator: Option<Discriminator>,
}

impl TypeDescriptor {
    fn with_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            fields: IndexMap::new(),
            interfaces: Vec::new(),
            possible_types: Vec::new(),
            enum_values: Vec::new(),
            keys: Vec::new(),
            discriminator: None,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Object)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Interface)
    }

    pub fn union<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ty = Self::with_kind(name, TypeKind::Union);
        ty.possible_types = members.into_iter().map(Into::into).collect();
        ty
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ty = Self::with_kind(name, TypeKind::Enum);
        ty.enum_values = values.into_iter().map(Into::into).collect();
        ty
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Scalar)
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::InputObject)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.insert(field.name.clone(), Arc::new(field));
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Declare an entity key field
    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.keys.push(field.into());
        self
    }

    /// Resolve the concrete type of values of this abstract type
    pub fn discriminator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.discriminator = Some(Arc::new(f));
        self
    }

    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn get_field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(name)
    }

    /// Concrete type name of a value of this type
    ///
    /// Objects are their own concrete type. Abstract types ask the
    /// discriminator, then fall back to the value's `__typename` entry.
    pub fn resolve_concrete_type(&self, value: &Value) -> Option<String> {
        if self.kind == TypeKind::Object {
            return Some(self.name.clone());
        }
        if let Some(discriminator) = &self.discriminator
            && let Some(name) = discriminator(value)
        {
            return Some(name);
        }
        value
            .get("__typename")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("interfaces", &self.interfaces)
            .field("possible_types", &self.possible_types)
            .field("enum_values", &self.enum_values)
            .field("keys", &self.keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_ref_parse() {
        let ty = TypeRef::parse("[Book!]!").unwrap();
        assert_eq!(
            ty,
            TypeRef::non_null(TypeRef::list(TypeRef::non_null(TypeRef::named("Book"))))
        );
        assert_eq!(ty.to_string(), "[Book!]!");
        assert_eq!(ty.named_type(), "Book");
        assert!(ty.is_non_null());
        assert!(ty.is_list());
        assert!(!ty.nullable().is_non_null());
    }

    #[test]
    fn test_type_ref_rejects_malformed_input() {
        assert!(TypeRef::parse("[Book").is_none());
        assert!(TypeRef::parse("String!!").is_none());
        assert!(TypeRef::parse("").is_none());
        assert!(TypeRef::parse("1Book").is_none());
        assert_eq!(TypeRef::from("[Book"), TypeRef::named("[Book"));
    }

    #[test]
    fn test_field_defaults() {
        let field = FieldDescriptor::new("title", "String!");
        assert_eq!(field.complexity, 1);
        assert!(!field.has_resolver());
        assert!(field.service.is_none());
    }

    #[test]
    fn test_resolve_concrete_type() {
        let object = TypeDescriptor::object("Book");
        assert_eq!(object.resolve_concrete_type(&json!({})), Some("Book".into()));

        let union = TypeDescriptor::union("SearchResult", ["Book", "Author"]);
        assert_eq!(
            union.resolve_concrete_type(&json!({"__typename": "Author"})),
            Some("Author".into())
        );
        assert_eq!(union.resolve_concrete_type(&json!({"name": "x"})), None);

        let discriminated = TypeDescriptor::union("SearchResult", ["Book", "Author"])
            .discriminator(|value| {
                Some(if value.get("title").is_some() { "Book" } else { "Author" }.to_string())
            });
        assert_eq!(
            discriminated.resolve_concrete_type(&json!({"title": "Dune"})),
            Some("Book".into())
        );
    }
}
