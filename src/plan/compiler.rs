//! Query plan compiler
//!
//! Turns a parsed document plus variables into an [`ExecutionPlan`]. The
//! walk is depth-first in document order: every field selection becomes one
//! node, fragments are expanded in place, and the type conditions they
//! introduce are recorded on the nodes for the executor to check once the
//! runtime type of the parent value is known.

use super::arguments::{coerce_variables, evaluate_directives, resolve_arguments};
use super::node::{ExecutionPlan, NodeId, OperationKind, PlanNode};
use crate::core::error::PlanError;
use crate::schema::{SchemaRegistry, TypeDescriptor, TypeRef};
use graphql_parser::query::{
    Definition, Document, FragmentDefinition, OperationDefinition, Selection, SelectionSet,
    TypeCondition, parse_query,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Limits enforced on compiled plans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_depth: Option<usize>,
    pub max_complexity: Option<u64>,
}

/// Compiles documents against one schema
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanCompiler<'s> {
    schema: &'s SchemaRegistry,
    limits: PlanLimits,
}

impl<'s> QueryPlanCompiler<'s> {
    pub fn new(schema: &'s SchemaRegistry) -> Self {
        Self {
            schema,
            limits: PlanLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Parse and compile request text
    pub fn compile_str(
        &self,
        query: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<ExecutionPlan, PlanError> {
        let document = parse_query::<String>(query).map_err(|e| PlanError::Syntax {
            message: e.to_string(),
        })?;
        self.compile(&document, operation_name, variables)
    }

    /// Compile a parsed document
    pub fn compile<'a>(
        &self,
        document: &Document<'a, String>,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<ExecutionPlan, PlanError> {
        let operation = select_operation(document, operation_name)?;
        let (kind, definitions, selection_set) = match operation {
            OperationDefinition::SelectionSet(set) => (OperationKind::Query, &[][..], set),
            OperationDefinition::Query(query) => (
                OperationKind::Query,
                &query.variable_definitions[..],
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => (
                OperationKind::Mutation,
                &mutation.variable_definitions[..],
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(_) => {
                return Err(PlanError::UnsupportedOperation {
                    kind: "Subscription",
                });
            }
        };

        let root = match kind {
            OperationKind::Query => self.schema.query_type(),
            OperationKind::Mutation => self
                .schema
                .mutation_type()
                .ok_or(PlanError::UnsupportedOperation { kind: "Mutation" })?,
        };

        let variables = coerce_variables(definitions, variables)?;
        let fragments = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
                _ => None,
            })
            .collect();

        let mut walker = Walker {
            schema: self.schema,
            fragments,
            variables: &variables,
            nodes: Vec::new(),
            levels: Vec::new(),
            fragment_stack: Vec::new(),
        };
        walker.walk(
            selection_set,
            Scope {
                parent: None,
                static_type: root,
                conditions: Vec::new(),
                level: 0,
                service: None,
            },
        )?;

        let Walker { nodes, levels, .. } = walker;
        let roots = nodes
            .iter()
            .filter(|node| node.parent.is_none())
            .map(|node| node.id)
            .collect();

        let plan = ExecutionPlan {
            operation: kind,
            operation_name: operation_name.map(str::to_string),
            root_type: root.name.clone(),
            nodes,
            roots,
            levels,
            variables,
            federation: None,
            root_federation: Vec::new(),
        };
        self.check_limits(&plan)?;

        tracing::debug!(
            operation = kind.as_str(),
            nodes = plan.nodes.len(),
            depth = plan.depth(),
            "compiled execution plan"
        );
        Ok(plan)
    }

    fn check_limits(&self, plan: &ExecutionPlan) -> Result<(), PlanError> {
        if let Some(limit) = self.limits.max_depth
            && plan.depth() > limit
        {
            return Err(PlanError::DepthLimitExceeded {
                depth: plan.depth(),
                limit,
            });
        }
        if let Some(limit) = self.limits.max_complexity {
            let complexity = plan.complexity();
            if complexity > limit {
                return Err(PlanError::ComplexityLimitExceeded { complexity, limit });
            }
        }
        Ok(())
    }
}

fn operation_name_of<'d, 'a>(operation: &'d OperationDefinition<'a, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

fn select_operation<'d, 'a>(
    document: &'d Document<'a, String>,
    operation_name: Option<&str>,
) -> Result<&'d OperationDefinition<'a, String>, PlanError> {
    let operations: Vec<&OperationDefinition<'a, String>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Operation(operation) => Some(operation),
            _ => None,
        })
        .collect();

    match (operation_name, operations.as_slice()) {
        (_, []) => Err(PlanError::NoOperation),
        (Some(name), _) => operations
            .iter()
            .copied()
            .find(|operation| operation_name_of(operation) == Some(name))
            .ok_or_else(|| PlanError::UnknownOperation {
                name: name.to_string(),
            }),
        (None, [operation]) => Ok(*operation),
        (None, _) => Err(PlanError::AmbiguousOperation),
    }
}

/// Where the walk currently is
#[derive(Clone)]
struct Scope<'s> {
    parent: Option<NodeId>,
    /// Type fields are looked up on
    static_type: &'s Arc<TypeDescriptor>,
    conditions: Vec<String>,
    level: usize,
    service: Option<String>,
}

impl<'s> Scope<'s> {
    fn narrowed(&self, condition: &'s Arc<TypeDescriptor>) -> Self {
        let mut scope = self.clone();
        if condition.name != self.static_type.name {
            scope.conditions.push(condition.name.clone());
        }
        scope.static_type = condition;
        scope
    }
}

struct Walker<'s, 'd, 'a, 'v> {
    schema: &'s SchemaRegistry,
    fragments: HashMap<&'d str, &'d FragmentDefinition<'a, String>>,
    variables: &'v Map<String, Value>,
    nodes: Vec<PlanNode>,
    levels: Vec<Vec<NodeId>>,
    fragment_stack: Vec<String>,
}

impl<'s, 'd, 'a, 'v> Walker<'s, 'd, 'a, 'v> {
    fn walk(
        &mut self,
        selection_set: &'d SelectionSet<'a, String>,
        scope: Scope<'s>,
    ) -> Result<(), PlanError> {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if !evaluate_directives(&field.directives, self.variables)? {
                        continue;
                    }
                    let response_key = field.alias.clone().unwrap_or_else(|| field.name.clone());
                    let type_name = scope.static_type.name.as_str();

                    if field.name == "__typename" {
                        if !field.selection_set.items.is_empty() {
                            return Err(PlanError::InvalidSelection {
                                type_name: type_name.to_string(),
                                field: field.name.clone(),
                                reason: "leaf fields cannot have a selection of subfields",
                            });
                        }
                        self.push_node(&scope, PlanNode {
                            id: NodeId::new(self.nodes.len()),
                            parent: scope.parent,
                            response_key,
                            field_name: field.name.clone(),
                            parent_type: type_name.to_string(),
                            type_conditions: scope.conditions.clone(),
                            ty: TypeRef::non_null(TypeRef::named("String")),
                            level: scope.level,
                            arguments: Map::new(),
                            children: Vec::new(),
                            field: None,
                            service: scope.service.clone(),
                        });
                        continue;
                    }

                    let descriptor = scope.static_type.get_field(&field.name).ok_or_else(|| {
                        PlanError::UnknownField {
                            type_name: type_name.to_string(),
                            field: field.name.clone(),
                        }
                    })?;
                    let arguments =
                        resolve_arguments(type_name, descriptor, &field.arguments, self.variables)?;
                    let return_type = self
                        .schema
                        .get_type(descriptor.ty.named_type())
                        .ok_or_else(|| PlanError::UnknownType {
                            name: descriptor.ty.named_type().to_string(),
                        })?;

                    let has_selection = !field.selection_set.items.is_empty();
                    if return_type.kind.is_composite() != has_selection {
                        return Err(PlanError::InvalidSelection {
                            type_name: type_name.to_string(),
                            field: field.name.clone(),
                            reason: if has_selection {
                                "leaf fields cannot have a selection of subfields"
                            } else {
                                "composite fields must have a selection of subfields"
                            },
                        });
                    }

                    let service = descriptor.service.clone().or_else(|| scope.service.clone());
                    let id = self.push_node(&scope, PlanNode {
                        id: NodeId::new(self.nodes.len()),
                        parent: scope.parent,
                        response_key,
                        field_name: field.name.clone(),
                        parent_type: type_name.to_string(),
                        type_conditions: scope.conditions.clone(),
                        ty: descriptor.ty.clone(),
                        level: scope.level,
                        arguments,
                        children: Vec::new(),
                        field: Some(descriptor.clone()),
                        service: service.clone(),
                    });

                    if has_selection {
                        self.walk(&field.selection_set, Scope {
                            parent: Some(id),
                            static_type: return_type,
                            conditions: Vec::new(),
                            level: scope.level + 1,
                            service,
                        })?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !evaluate_directives(&spread.directives, self.variables)? {
                        continue;
                    }
                    let name = spread.fragment_name.as_str();
                    let fragment = *self.fragments.get(name).ok_or_else(|| {
                        PlanError::UnknownFragment {
                            name: name.to_string(),
                        }
                    })?;
                    if self.fragment_stack.iter().any(|visiting| visiting == name) {
                        return Err(PlanError::FragmentCycle {
                            name: name.to_string(),
                        });
                    }
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    let condition = self.condition_type(condition)?;

                    self.fragment_stack.push(name.to_string());
                    self.walk(&fragment.selection_set, scope.narrowed(condition))?;
                    self.fragment_stack.pop();
                }
                Selection::InlineFragment(inline) => {
                    if !evaluate_directives(&inline.directives, self.variables)? {
                        continue;
                    }
                    let scope = match &inline.type_condition {
                        Some(TypeCondition::On(condition)) => {
                            scope.narrowed(self.condition_type(condition)?)
                        }
                        None => scope.clone(),
                    };
                    self.walk(&inline.selection_set, scope)?;
                }
            }
        }
        Ok(())
    }

    fn condition_type(&self, name: &str) -> Result<&'s Arc<TypeDescriptor>, PlanError> {
        self.schema
            .get_type(name)
            .filter(|ty| ty.kind.is_composite())
            .ok_or_else(|| PlanError::UnknownType {
                name: name.to_string(),
            })
    }

    fn push_node(&mut self, scope: &Scope<'s>, node: PlanNode) -> NodeId {
        let id = node.id;
        if let Some(parent) = scope.parent {
            self.nodes[parent.index()].children.push(id);
        }
        if self.levels.len() <= scope.level {
            self.levels.resize_with(scope.level + 1, Vec::new);
        }
        self.levels[scope.level].push(id);
        self.nodes.push(node);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgumentDescriptor, FieldDescriptor, SchemaBuilder};
    use serde_json::json;

    fn schema() -> SchemaRegistry {
        SchemaBuilder::new()
            .register(
                TypeDescriptor::object("Query")
                    .field(
                        FieldDescriptor::new("book", "Book")
                            .argument(ArgumentDescriptor::new("id", "ID!")),
                    )
                    .field(FieldDescriptor::new("books", "[Book!]!").complexity(10))
                    .field(FieldDescriptor::new("search", "[SearchResult!]!")),
            )
            .register(
                TypeDescriptor::object("Book")
                    .field(FieldDescriptor::new("id", "ID!"))
                    .field(FieldDescriptor::new("title", "String!"))
                    .field(FieldDescriptor::new("author", "Author")),
            )
            .register(
                TypeDescriptor::object("Author")
                    .field(FieldDescriptor::new("name", "String!"))
                    .field(FieldDescriptor::new("books", "[Book!]!")),
            )
            .register(TypeDescriptor::union("SearchResult", ["Book", "Author"]))
            .register(TypeDescriptor::object("Mutation").field(FieldDescriptor::new("ping", "String")))
            .mutation_type("Mutation")
            .build()
            .unwrap()
    }

    fn compile(query: &str, variables: Value) -> Result<ExecutionPlan, PlanError> {
        let schema = schema();
        let variables = variables.as_object().cloned().unwrap_or_default();
        QueryPlanCompiler::new(&schema).compile_str(query, None, &variables)
    }

    #[test]
    fn test_levels_follow_document_order() {
        let plan = compile(
            "{ a: book(id: 1) { title author { name } } books { id } }",
            json!({}),
        )
        .unwrap();

        let keys = |level: usize| -> Vec<&str> {
            plan.levels()[level]
                .iter()
                .map(|id| plan[*id].response_key.as_str())
                .collect()
        };
        assert_eq!(plan.depth(), 3);
        assert_eq!(keys(0), vec!["a", "books"]);
        assert_eq!(keys(1), vec!["title", "author", "id"]);
        assert_eq!(keys(2), vec!["name"]);
        assert_eq!(plan.roots().len(), 2);
        assert_eq!(plan[plan.roots()[0]].arguments["id"], json!(1));
        assert_eq!(plan.key_path(plan.levels()[2][0]), vec!["a", "author", "name"]);
    }

    #[test]
    fn test_fragments_expand_in_place_with_conditions() {
        let plan = compile(
            "query { search { __typename ...B ... on Author { name } } }
             fragment B on Book { title }",
            json!({}),
        )
        .unwrap();
        let search = &plan[plan.roots()[0]];
        let children: Vec<_> = search.children.iter().map(|id| &plan[*id]).collect();
        assert_eq!(children.len(), 3);
        assert!(children[0].is_typename());
        assert!(children[0].type_conditions.is_empty());
        assert_eq!(children[1].type_conditions, vec!["Book"]);
        assert_eq!(children[1].parent_type, "Book");
        assert_eq!(children[2].type_conditions, vec!["Author"]);
    }

    #[test]
    fn test_skipped_fields_create_no_node() {
        let plan = compile(
            "query($hide: Boolean!) { books { id title @skip(if: $hide) } }",
            json!({"hide": true}),
        )
        .unwrap();
        assert_eq!(plan.nodes().len(), 2);
    }

    #[test]
    fn test_missing_variable() {
        let err = compile("query($id: ID!) { book(id: $id) { title } }", json!({})).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_VARIABLE");
    }

    #[test]
    fn test_compile_errors() {
        let cases = [
            ("{ nope }", "UNKNOWN_FIELD"),
            ("{ books }", "INVALID_SELECTION"),
            ("{ books { title { x } } }", "INVALID_SELECTION"),
            ("{ book { title } }", "MISSING_ARGUMENT"),
            ("{ books { ...Missing } }", "UNKNOWN_FRAGMENT"),
            ("{ books { ... on Nope { id } } }", "UNKNOWN_TYPE"),
            ("{ search { title } }", "UNKNOWN_FIELD"),
            ("subscription { books { id } }", "UNSUPPORTED_OPERATION"),
            ("query A { books { id } } query B { books { id } }", "AMBIGUOUS_OPERATION"),
            ("fragment F on Book { id }", "NO_OPERATION"),
            ("{ books { id ", "GRAPHQL_PARSE_FAILED"),
            (
                "{ books { ...A } } fragment A on Book { ...B } fragment B on Book { ...A }",
                "FRAGMENT_CYCLE",
            ),
        ];
        for (query, code) in cases {
            let err = compile(query, json!({})).unwrap_err();
            assert_eq!(err.error_code(), code, "query: {}", query);
        }
    }

    #[test]
    fn test_operation_selection_by_name() {
        let schema = schema();
        let compiler = QueryPlanCompiler::new(&schema);
        let query = "query A { books { id } } mutation B { ping }";

        let plan = compiler.compile_str(query, Some("B"), &Map::new()).unwrap();
        assert_eq!(plan.operation(), OperationKind::Mutation);
        assert_eq!(plan.root_type(), "Mutation");

        let err = compiler.compile_str(query, Some("C"), &Map::new()).unwrap_err();
        assert!(matches!(err, PlanError::UnknownOperation { name } if name == "C"));
    }

    #[test]
    fn test_limits() {
        let schema = schema();
        let query = "{ books { author { books { title } } } }";

        let deep = QueryPlanCompiler::new(&schema)
            .with_limits(PlanLimits {
                max_depth: Some(3),
                max_complexity: None,
            })
            .compile_str(query, None, &Map::new());
        assert!(matches!(deep, Err(PlanError::DepthLimitExceeded { depth: 4, limit: 3 })));

        let heavy = QueryPlanCompiler::new(&schema)
            .with_limits(PlanLimits {
                max_depth: None,
                max_complexity: Some(5),
            })
            .compile_str(query, None, &Map::new());
        assert!(matches!(
            heavy,
            Err(PlanError::ComplexityLimitExceeded { complexity: 13, limit: 5 })
        ));
    }
}
