//! Federation planning
//!
//! Splits the service-owned part of an execution plan into fetch groups,
//! one per service and entity position, and orders them into stages.
//!
//! Root fields owned by a service form that service's root group. Below
//! it, a field owned by another service opens an entity group: the parent
//! group fetches the entity's `__typename` and keys as hidden fields, and
//! the new group resolves the field through `_entities`. A field that
//! `requires` data owned by a third service makes its group depend on an
//! entity group of that service at the same position.

use super::directory::ServiceDirectory;
use super::selection::{RenderedQuery, SelectedField, Selection, render_entities, render_root};
use crate::core::error::FederationError;
use crate::plan::{ExecutionPlan, NodeId};
use crate::schema::SchemaRegistry;
use std::collections::BTreeSet;

/// What a fetch group asks its service for
#[derive(Debug, Clone, PartialEq)]
pub enum FetchKind {
    /// Root fields of the operation
    Root,
    /// Fields of entities found at the group's position
    Entity {
        type_name: String,
        /// Representation fields: `(field name, response key in the parent data)`
        fields: Vec<(String, String)>,
    },
}

/// One sub-query of a federated plan
#[derive(Debug, Clone)]
pub struct FetchGroup {
    pub id: usize,
    pub service: String,
    pub kind: FetchKind,
    /// Response keys from the root to the objects this group extends, list
    /// positions flattened; empty for root groups
    pub position: Vec<String>,
    pub selection: Selection,
    /// Plan nodes whose values this group supplies
    pub nodes: Vec<NodeId>,
    pub depends_on: BTreeSet<usize>,
    pub rendered: RenderedQuery,
}

/// Fetch groups ordered into stages
///
/// Stages run one after another; the groups of a stage only depend on
/// earlier stages and run concurrently.
#[derive(Debug, Clone)]
pub struct FederatedPlan {
    pub groups: Vec<FetchGroup>,
    pub stages: Vec<Vec<usize>>,
}

impl FederatedPlan {
    pub fn group(&self, id: usize) -> &FetchGroup {
        &self.groups[id]
    }

    /// Services in the order their first group runs
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = Vec::new();
        for id in self.stages.iter().flatten() {
            let service = self.groups[*id].service.as_str();
            if !services.contains(&service) {
                services.push(service);
            }
        }
        services
    }
}

/// Plans the federated part of one execution plan
pub struct FederationPlanner<'p> {
    schema: &'p SchemaRegistry,
    plan: &'p ExecutionPlan,
    directory: &'p ServiceDirectory,
    groups: Vec<FetchGroup>,
}

impl<'p> FederationPlanner<'p> {
    pub fn new(schema: &'p SchemaRegistry, plan: &'p ExecutionPlan, directory: &'p ServiceDirectory) -> Self {
        Self {
            schema,
            plan,
            directory,
            groups: Vec::new(),
        }
    }

    /// Plan every root field of the operation together
    pub fn build(mut self) -> Result<FederatedPlan, FederationError> {
        for &root in self.plan.roots() {
            self.add_root(root)?;
        }
        self.finish()
    }

    /// Plan only the given root fields, all sharing one response key
    ///
    /// Mutation roots are planned this way so each one is fetched at its
    /// turn. Returns `None` when the roots are resolved locally.
    pub fn build_roots(mut self, roots: &[NodeId]) -> Result<Option<FederatedPlan>, FederationError> {
        for &root in roots {
            self.add_root(root)?;
        }
        if self.groups.is_empty() {
            return Ok(None);
        }
        self.finish().map(Some)
    }

    fn add_root(&mut self, root: NodeId) -> Result<(), FederationError> {
        let node = self.plan.node(root);
        match &node.service {
            None => self.check_local(root),
            Some(service) => {
                let group = self.root_group(service)?;
                let field = self.select(root, group)?;
                self.groups[group].selection.push(field);
                self.groups[group].nodes.push(root);
                Ok(())
            }
        }
    }

    fn finish(mut self) -> Result<FederatedPlan, FederationError> {
        let stages = self.stages()?;
        let operation = self.plan.operation();
        for group in &mut self.groups {
            group.rendered = match &group.kind {
                FetchKind::Root => render_root(operation, &group.selection),
                FetchKind::Entity { type_name, .. } => render_entities(type_name, &group.selection),
            };
        }

        tracing::debug!(
            groups = self.groups.len(),
            stages = stages.len(),
            "planned federated fetches"
        );
        Ok(FederatedPlan {
            groups: self.groups,
            stages,
        })
    }

    /// Locally resolved fields may not have service-owned children
    fn check_local(&self, id: NodeId) -> Result<(), FederationError> {
        for &child in &self.plan.node(id).children {
            let node = self.plan.node(child);
            if let Some(service) = &node.service {
                return Err(FederationError::UnsupportedLocalParent {
                    field: format!("{}.{}", node.parent_type, node.field_name),
                    service: service.clone(),
                });
            }
            self.check_local(child)?;
        }
        Ok(())
    }

    fn new_group(&mut self, service: &str, kind: FetchKind, position: Vec<String>) -> Result<usize, FederationError> {
        if !self.directory.contains(service) {
            return Err(FederationError::UnknownService {
                name: service.to_string(),
            });
        }
        let id = self.groups.len();
        self.groups.push(FetchGroup {
            id,
            service: service.to_string(),
            kind,
            position,
            selection: Selection::default(),
            nodes: Vec::new(),
            depends_on: BTreeSet::new(),
            rendered: RenderedQuery {
                query: String::new(),
                variables: Default::default(),
            },
        });
        Ok(id)
    }

    fn root_group(&mut self, service: &str) -> Result<usize, FederationError> {
        let existing = self
            .groups
            .iter()
            .position(|g| g.kind == FetchKind::Root && g.service == service);
        match existing {
            Some(id) => Ok(id),
            None => self.new_group(service, FetchKind::Root, Vec::new()),
        }
    }

    /// The entity group of `service` for `type_name` objects at `position`
    fn entity_group(
        &mut self,
        service: &str,
        type_name: &str,
        position: &[String],
        provider: usize,
    ) -> Result<usize, FederationError> {
        let existing = self.groups.iter().position(|g| {
            g.service == service
                && g.position == position
                && matches!(&g.kind, FetchKind::Entity { type_name: t, .. } if t == type_name)
        });
        let id = match existing {
            Some(id) => id,
            None => self.new_group(
                service,
                FetchKind::Entity {
                    type_name: type_name.to_string(),
                    fields: Vec::new(),
                },
                position.to_vec(),
            )?,
        };
        self.groups[id].depends_on.insert(provider);
        Ok(id)
    }

    fn add_representation_field(&mut self, group: usize, name: &str, response_key: &str) {
        if let FetchKind::Entity { fields, .. } = &mut self.groups[group].kind
            && !fields.iter().any(|(field, _)| field == name)
        {
            fields.push((name.to_string(), response_key.to_string()));
        }
    }

    /// The subgraph selection for `id` inside `group`
    fn select(&mut self, id: NodeId, group: usize) -> Result<SelectedField, FederationError> {
        let plan = self.plan;
        let node = plan.node(id);
        let mut field = SelectedField::from_node(node);
        if node.children.is_empty() {
            return Ok(field);
        }

        field.selection.ensure_hidden("__typename", "__typename", None);
        for &child in &node.children {
            let child_node = plan.node(child);
            if child_node.service.as_deref() == Some(self.groups[group].service.as_str())
                || child_node.is_typename()
            {
                let selected = self.select(child, group)?;
                field.selection.push(selected);
            } else {
                self.entity_edge(id, child, group, &mut field.selection)?;
            }
        }
        Ok(field)
    }

    /// Route `child` (owned by another service) through an entity group
    fn entity_edge(
        &mut self,
        parent: NodeId,
        child: NodeId,
        parent_group: usize,
        parent_selection: &mut Selection,
    ) -> Result<(), FederationError> {
        let plan = self.plan;
        let schema = self.schema;
        let child_node = plan.node(child);
        let Some(service) = child_node.service.clone() else {
            return Ok(());
        };
        let entity = schema
            .get_type(&child_node.parent_type)
            .filter(|ty| ty.is_entity())
            .ok_or_else(|| FederationError::MissingKeys {
                type_name: child_node.parent_type.clone(),
            })?;

        let position = plan.key_path(parent);
        let user_keys: Vec<(&str, &str)> = plan
            .node(parent)
            .children
            .iter()
            .map(|&id| {
                let node = plan.node(id);
                (node.response_key.as_str(), node.field_name.as_str())
            })
            .collect();
        let condition = child_node.type_conditions.last().cloned();
        let parent_service = self.groups[parent_group].service.clone();

        let target = self.entity_group(&service, &entity.name, &position, parent_group)?;
        for key in &entity.keys {
            let response_key = hidden_key(&user_keys, key);
            parent_selection.ensure_hidden(key, &response_key, condition.clone());
            self.add_representation_field(target, key, &response_key);
        }

        let requires = child_node
            .field
            .as_ref()
            .map(|field| field.requires.clone())
            .unwrap_or_default();
        for required in &requires {
            let owner = entity
                .get_field(required)
                .and_then(|field| field.service.clone())
                .unwrap_or_else(|| parent_service.clone());
            if owner == service {
                continue;
            }
            let response_key = hidden_key(&user_keys, required);
            if owner == parent_service {
                parent_selection.ensure_hidden(required, &response_key, condition.clone());
            } else {
                let provider = self.entity_group(&owner, &entity.name, &position, parent_group)?;
                for key in &entity.keys {
                    let key_response = hidden_key(&user_keys, key);
                    self.add_representation_field(provider, key, &key_response);
                }
                self.groups[provider]
                    .selection
                    .ensure_hidden(required, &response_key, None);
                self.groups[target].depends_on.insert(provider);
            }
            self.add_representation_field(target, required, &response_key);
        }

        let selected = self.select(child, target)?;
        self.groups[target].selection.push(selected);
        self.groups[target].nodes.push(child);
        Ok(())
    }

    /// Kahn's algorithm, one stage per round
    fn stages(&self) -> Result<Vec<Vec<usize>>, FederationError> {
        let mut placed = vec![false; self.groups.len()];
        let mut stages = Vec::new();
        let mut remaining = self.groups.len();
        while remaining > 0 {
            let stage: Vec<usize> = self
                .groups
                .iter()
                .filter(|g| !placed[g.id])
                .filter(|g| g.depends_on.iter().all(|dep| placed[*dep]))
                .map(|g| g.id)
                .collect();
            if stage.is_empty() {
                let services = self
                    .groups
                    .iter()
                    .filter(|g| !placed[g.id])
                    .map(|g| g.service.clone())
                    .collect();
                return Err(FederationError::CircularDependency { services });
            }
            for id in &stage {
                placed[*id] = true;
            }
            remaining -= stage.len();
            stages.push(stage);
        }
        Ok(stages)
    }
}

/// Response key for a hidden field named `name` next to the user's fields
///
/// Reuses the user's key when it already selects the same field unaliased.
fn hidden_key(user_keys: &[(&str, &str)], name: &str) -> String {
    match user_keys.iter().find(|(key, _)| *key == name) {
        Some((_, field)) if *field != name => format!("_h_{}", name),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::directory::{SubgraphRequest, SubgraphResponse, SubgraphService};
    use crate::plan::QueryPlanCompiler;
    use crate::schema::{FieldDescriptor, SchemaBuilder, TypeDescriptor};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Arc;

    struct Nothing;

    #[async_trait]
    impl SubgraphService for Nothing {
        async fn execute(&self, _request: SubgraphRequest) -> anyhow::Result<SubgraphResponse> {
            Ok(SubgraphResponse::default())
        }
    }

    fn schema() -> SchemaRegistry {
        SchemaBuilder::new()
            .register(
                TypeDescriptor::object("Query")
                    .field(FieldDescriptor::new("book", "Book").service("books"))
                    .field(FieldDescriptor::new("local", "Book")),
            )
            .register(
                TypeDescriptor::object("Book")
                    .key("id")
                    .field(FieldDescriptor::new("id", "ID!"))
                    .field(FieldDescriptor::new("title", "String"))
                    .field(FieldDescriptor::new("weight", "Int").service("inventory"))
                    .field(
                        FieldDescriptor::new("shipping", "Int")
                            .service("shipping")
                            .requires(["weight"]),
                    )
                    .field(FieldDescriptor::new("reviews", "[String]").service("reviews")),
            )
            .build()
            .unwrap()
    }

    fn directory(names: &[&str]) -> ServiceDirectory {
        let mut directory = ServiceDirectory::new();
        for name in names {
            directory.register(*name, None, Arc::new(Nothing));
        }
        directory
    }

    fn plan(schema: &SchemaRegistry, query: &str) -> ExecutionPlan {
        QueryPlanCompiler::new(schema)
            .compile_str(query, None, &Map::new())
            .unwrap()
    }

    #[test]
    fn test_entity_group_fetches_hidden_keys() {
        let schema = schema();
        let plan = plan(&schema, "{ book { title reviews } }");
        let directory = directory(&["books", "reviews"]);
        let federated = FederationPlanner::new(&schema, &plan, &directory).build().unwrap();

        assert_eq!(federated.groups.len(), 2);
        assert_eq!(federated.stages, vec![vec![0], vec![1]]);
        assert_eq!(
            federated.groups[0].rendered.query,
            "query { book { __typename title id } }"
        );
        let reviews = federated.group(1);
        assert_eq!(reviews.service, "reviews");
        assert_eq!(reviews.position, vec!["book".to_string()]);
        assert_eq!(
            reviews.kind,
            FetchKind::Entity {
                type_name: "Book".into(),
                fields: vec![("id".into(), "id".into())],
            }
        );
    }

    #[test]
    fn test_single_root_is_planned_alone() {
        let schema = schema();
        let plan = plan(&schema, "{ book { title reviews } local { title } }");
        let directory = directory(&["books", "reviews"]);
        let roots = plan.roots().to_vec();

        let remote = FederationPlanner::new(&schema, &plan, &directory)
            .build_roots(&roots[..1])
            .unwrap()
            .unwrap();
        assert_eq!(remote.groups.len(), 2);
        assert_eq!(remote.group(0).nodes, vec![roots[0]]);
        assert_eq!(remote.services(), vec!["books", "reviews"]);

        let local = FederationPlanner::new(&schema, &plan, &directory)
            .build_roots(&roots[1..])
            .unwrap();
        assert!(local.is_none());
    }

    #[test]
    fn test_aliased_key_is_fetched_under_hidden_alias() {
        let schema = schema();
        let plan = plan(&schema, "{ book { id: title reviews } }");
        let directory = directory(&["books", "reviews"]);
        let federated = FederationPlanner::new(&schema, &plan, &directory).build().unwrap();
        assert_eq!(
            federated.groups[0].rendered.query,
            "query { book { __typename id: title _h_id: id } }"
        );
    }

    #[test]
    fn test_requires_from_third_service_adds_a_stage() {
        let schema = schema();
        let plan = plan(&schema, "{ book { shipping } }");
        let directory = directory(&["books", "inventory", "shipping"]);
        let federated = FederationPlanner::new(&schema, &plan, &directory).build().unwrap();

        let shipping = federated.groups.iter().find(|g| g.service == "shipping").unwrap();
        let inventory = federated.groups.iter().find(|g| g.service == "inventory").unwrap();
        assert!(shipping.depends_on.contains(&inventory.id));
        assert_eq!(federated.stages.len(), 3);
        assert_eq!(federated.services(), vec!["books", "inventory", "shipping"]);
        assert!(inventory.nodes.is_empty());
        assert_eq!(
            shipping.kind,
            FetchKind::Entity {
                type_name: "Book".into(),
                fields: vec![("id".into(), "id".into()), ("weight".into(), "weight".into())],
            }
        );
    }

    #[test]
    fn test_unknown_service() {
        let schema = schema();
        let plan = plan(&schema, "{ book { reviews } }");
        let directory = directory(&["books"]);
        let err = FederationPlanner::new(&schema, &plan, &directory).build().unwrap_err();
        assert_eq!(err, FederationError::UnknownService { name: "reviews".into() });
    }

    #[test]
    fn test_service_field_below_local_parent() {
        let schema = schema();
        let plan = plan(&schema, "{ local { reviews } }");
        let directory = directory(&["books", "reviews"]);
        let err = FederationPlanner::new(&schema, &plan, &directory).build().unwrap_err();
        assert!(matches!(err, FederationError::UnsupportedLocalParent { service, .. } if service == "reviews"));
    }

    #[test]
    fn test_mutual_requires_is_a_cycle() {
        let schema = SchemaBuilder::new()
            .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("book", "Book").service("books")))
            .register(
                TypeDescriptor::object("Book")
                    .key("id")
                    .field(FieldDescriptor::new("id", "ID!"))
                    .field(FieldDescriptor::new("a", "Int").service("alpha").requires(["b"]))
                    .field(FieldDescriptor::new("b", "Int").service("beta").requires(["a"])),
            )
            .build()
            .unwrap();
        let plan = plan(&schema, "{ book { a b } }");
        let directory = directory(&["books", "alpha", "beta"]);
        let err = FederationPlanner::new(&schema, &plan, &directory).build().unwrap_err();
        assert!(matches!(err, FederationError::CircularDependency { services } if services.len() == 2));
    }
}
