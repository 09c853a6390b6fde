//! The schema registry: a validated, read-only index of types and fields
//!
//! Built once with [`SchemaBuilder`] and shared by every request through an
//! `Arc`. Nothing in it is mutated after [`SchemaBuilder::build`] returns, so
//! concurrent requests read it without locking.

use super::types::{FieldDescriptor, TypeDescriptor, TypeKind, TypeRef};
use crate::core::error::SchemaError;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;

/// Scalars every schema contains
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Read-only index of the schema's types
#[derive(Debug)]
pub struct SchemaRegistry {
    types: IndexMap<String, Arc<TypeDescriptor>>,
    query_type: String,
    mutation_type: Option<String>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Look up a type by name
    pub fn resolve_type(&self, name: &str) -> Result<&Arc<TypeDescriptor>, SchemaError> {
        self.types.get(name).ok_or_else(|| SchemaError::UnknownType {
            name: name.to_string(),
        })
    }

    /// Look up a field of a type
    pub fn resolve_field(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<&Arc<FieldDescriptor>, SchemaError> {
        self.resolve_type(type_name)?
            .get_field(field_name)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: type_name.to_string(),
                field: field_name.to_string(),
            })
    }

    pub fn get_type(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.types.values()
    }

    pub fn query_type(&self) -> &Arc<TypeDescriptor> {
        // Present by construction: `build` rejects a missing root type
        &self.types[self.query_type.as_str()]
    }

    pub fn mutation_type(&self) -> Option<&Arc<TypeDescriptor>> {
        self.mutation_type
            .as_deref()
            .and_then(|name| self.types.get(name))
    }

    /// Concrete object types a composite type can take at runtime
    pub fn possible_types(&self, name: &str) -> Vec<&str> {
        match self.types.get(name) {
            Some(ty) if ty.kind == TypeKind::Object => vec![ty.name.as_str()],
            Some(ty) => ty.possible_types.iter().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    /// Whether `concrete` is a valid runtime type for `abstract_type`
    pub fn is_possible_type(&self, abstract_type: &str, concrete: &str) -> bool {
        self.possible_types(abstract_type).contains(&concrete)
    }

    /// Whether a type condition applies to a concrete runtime type
    pub fn type_applies(&self, condition: &str, concrete: &str) -> bool {
        condition == concrete || self.is_possible_type(condition, concrete)
    }

    /// All service names referenced by field ownership, in registration order
    pub fn services(&self) -> Vec<String> {
        let mut services = IndexSet::new();
        for ty in self.types.values() {
            for field in ty.fields.values() {
                if let Some(service) = &field.service {
                    services.insert(service.clone());
                }
            }
        }
        services.into_iter().collect()
    }

    /// Whether any field is owned by a federated service
    pub fn is_federated(&self) -> bool {
        self.types
            .values()
            .any(|ty| ty.fields.values().any(|field| field.service.is_some()))
    }
}

/// Collects type descriptors and validates them into a [`SchemaRegistry`]
///
/// # Example
///
/// ```rust,ignore
/// let schema = SchemaBuilder::new()
///     .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("hello", "String")))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct SchemaBuilder {
    types: Vec<TypeDescriptor>,
    query_type: String,
    mutation_type: Option<String>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            query_type: "Query".to_string(),
            mutation_type: None,
        }
    }

    pub fn register(mut self, ty: TypeDescriptor) -> Self {
        self.types.push(ty);
        self
    }

    /// Name of the query root type (default `Query`)
    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.query_type = name.into();
        self
    }

    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.mutation_type = Some(name.into());
        self
    }

    /// Validate the descriptors and freeze them
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut types: IndexMap<String, TypeDescriptor> = IndexMap::new();
        for ty in self.types {
            if types.contains_key(&ty.name) {
                return Err(SchemaError::DuplicateType { name: ty.name });
            }
            types.insert(ty.name.clone(), ty);
        }
        for scalar in BUILTIN_SCALARS {
            if !types.contains_key(scalar) {
                types.insert(scalar.to_string(), TypeDescriptor::scalar(scalar));
            }
        }

        check_root(&types, &self.query_type)?;
        if let Some(mutation) = &self.mutation_type {
            check_root(&types, mutation)?;
        }
        check_references(&types)?;
        check_abstract_types(&types)?;
        collect_implementors(&mut types);
        check_keys(&types)?;
        check_unguarded_cycles(&types)?;

        tracing::debug!(
            types = types.len(),
            query_type = %self.query_type,
            "schema registry built"
        );

        Ok(SchemaRegistry {
            types: types
                .into_iter()
                .map(|(name, ty)| (name, Arc::new(ty)))
                .collect(),
            query_type: self.query_type,
            mutation_type: self.mutation_type,
        })
    }
}

fn check_root(types: &IndexMap<String, TypeDescriptor>, name: &str) -> Result<(), SchemaError> {
    match types.get(name) {
        Some(ty) if ty.kind == TypeKind::Object => Ok(()),
        _ => Err(SchemaError::MissingRootType {
            name: name.to_string(),
        }),
    }
}

fn check_references(types: &IndexMap<String, TypeDescriptor>) -> Result<(), SchemaError> {
    let dangling = |ty: &TypeDescriptor, field: String, referenced: &TypeRef| {
        let name = referenced.named_type();
        (!types.contains_key(name)).then(|| SchemaError::DanglingTypeReference {
            type_name: ty.name.clone(),
            field,
            referenced: name.to_string(),
        })
    };

    for ty in types.values() {
        for field in ty.fields.values() {
            if let Some(err) = dangling(ty, field.name.clone(), &field.ty) {
                return Err(err);
            }
            for argument in field.arguments.values() {
                let label = format!("{}({})", field.name, argument.name);
                if let Some(err) = dangling(ty, label, &argument.ty) {
                    return Err(err);
                }
            }
        }
    }
    Ok(())
}

fn check_abstract_types(types: &IndexMap<String, TypeDescriptor>) -> Result<(), SchemaError> {
    let expect_kind = |owner: &str, referenced: &str, kind: TypeKind| match types.get(referenced)
    {
        Some(ty) if ty.kind == kind => Ok(ty),
        _ => Err(SchemaError::InvalidTypeReference {
            type_name: owner.to_string(),
            referenced: referenced.to_string(),
            expected: kind.as_str(),
        }),
    };

    for ty in types.values() {
        if ty.kind == TypeKind::Union {
            for member in &ty.possible_types {
                expect_kind(&ty.name, member, TypeKind::Object)?;
            }
        }
        for interface_name in &ty.interfaces {
            let interface = expect_kind(&ty.name, interface_name, TypeKind::Interface)?;
            for field in interface.fields.keys() {
                if !ty.fields.contains_key(field) {
                    return Err(SchemaError::MissingInterfaceField {
                        type_name: ty.name.clone(),
                        interface: interface_name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Fill `possible_types` of every interface with its implementing objects
fn collect_implementors(types: &mut IndexMap<String, TypeDescriptor>) {
    let mut implementors: HashMap<String, Vec<String>> = HashMap::new();
    for ty in types.values() {
        if ty.kind != TypeKind::Object {
            continue;
        }
        for interface in &ty.interfaces {
            implementors
                .entry(interface.clone())
                .or_default()
                .push(ty.name.clone());
        }
    }
    for (interface, objects) in implementors {
        if let Some(ty) = types.get_mut(&interface) {
            for object in objects {
                if !ty.possible_types.contains(&object) {
                    ty.possible_types.push(object);
                }
            }
        }
    }
}

fn check_keys(types: &IndexMap<String, TypeDescriptor>) -> Result<(), SchemaError> {
    for ty in types.values() {
        for key in &ty.keys {
            if !ty.fields.contains_key(key) {
                return Err(SchemaError::UnknownKeyField {
                    type_name: ty.name.clone(),
                    field: key.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Reject cycles made only of non-null, non-list composite edges
///
/// Such a cycle means a value of the type can never be finite. Nullable or
/// list edges break the cycle (`Author.books.author` is fine).
fn check_unguarded_cycles(types: &IndexMap<String, TypeDescriptor>) -> Result<(), SchemaError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        types: &IndexMap<String, TypeDescriptor>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<(String, String)>,
    ) -> Result<(), SchemaError> {
        marks.insert(name.to_string(), Mark::Visiting);
        if let Some(ty) = types.get(name) {
            for field in ty.fields.values() {
                let TypeRef::NonNull(inner) = &field.ty else {
                    continue;
                };
                let TypeRef::Named(target) = inner.as_ref() else {
                    continue;
                };
                if !types.get(target).is_some_and(|t| t.kind.is_composite()) {
                    continue;
                }
                stack.push((ty.name.clone(), field.name.clone()));
                match marks.get(target.as_str()) {
                    Some(Mark::Visiting) => {
                        let start = stack
                            .iter()
                            .position(|(owner, _)| owner == target)
                            .unwrap_or(0);
                        return Err(SchemaError::UnguardedCycle {
                            path: stack[start..]
                                .iter()
                                .map(|(owner, field)| format!("{}.{}", owner, field))
                                .collect(),
                        });
                    }
                    Some(Mark::Done) => {}
                    None => visit(target, types, marks, stack)?,
                }
                stack.pop();
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for name in types.keys() {
        if !marks.contains_key(name.as_str()) {
            visit(name, types, &mut marks, &mut Vec::new())?;
        }
    }
    Ok(())
}
