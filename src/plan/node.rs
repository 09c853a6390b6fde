//! Execution plan data structures

use crate::federation::FederatedPlan;
use crate::schema::{FieldDescriptor, TypeRef};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Index of a node in its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

/// One field execution of the plan
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: NodeId,
    /// `None` for root fields
    pub parent: Option<NodeId>,
    /// Alias, or the field name
    pub response_key: String,
    pub field_name: String,
    /// Type the field was selected on (a fragment's type condition if any)
    pub parent_type: String,
    /// Fragment type conditions the runtime type must satisfy
    pub type_conditions: Vec<String>,
    pub ty: TypeRef,
    /// Dependency level: root fields are level 0
    pub level: usize,
    /// Arguments with variables substituted and defaults applied
    pub arguments: Map<String, Value>,
    /// Children in document order
    pub children: Vec<NodeId>,
    /// `None` for `__typename`
    pub field: Option<Arc<FieldDescriptor>>,
    /// Owning service, explicit or inherited from the parent
    pub service: Option<String>,
}

impl PlanNode {
    pub fn is_typename(&self) -> bool {
        self.field.is_none()
    }

    /// Nullability flag: a failure of a non-null node bubbles to its parent
    pub fn is_non_null(&self) -> bool {
        self.ty.is_non_null()
    }

    pub fn complexity(&self) -> u64 {
        self.field.as_ref().map_or(0, |field| field.complexity)
    }
}

/// A compiled operation
///
/// Immutable once built. Cached plans are shared between requests through
/// an `Arc`; all per-request state lives in the executor.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub(crate) operation: OperationKind,
    pub(crate) operation_name: Option<String>,
    pub(crate) root_type: String,
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) levels: Vec<Vec<NodeId>>,
    pub(crate) variables: Map<String, Value>,
    pub(crate) federation: Option<Arc<FederatedPlan>>,
    /// Mutations only: one federated plan per service-owned root, keyed by
    /// the first node under its response key
    pub(crate) root_federation: Vec<(NodeId, Arc<FederatedPlan>)>,
}

impl ExecutionPlan {
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Root fields in document order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Nodes partitioned by level, document order within a level
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Sum of the complexity weights of every node
    pub fn complexity(&self) -> u64 {
        self.nodes.iter().map(PlanNode::complexity).sum()
    }

    /// Coerced variables, defaults applied
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Whether any node is owned by a federated service
    pub fn has_service_nodes(&self) -> bool {
        self.nodes.iter().any(|node| node.service.is_some())
    }

    pub fn federation(&self) -> Option<&Arc<FederatedPlan>> {
        self.federation.as_ref()
    }

    pub(crate) fn set_federation(&mut self, plan: FederatedPlan) {
        self.federation = Some(Arc::new(plan));
    }

    /// Federated fetches of one mutation root, run at that root's turn
    pub fn root_federation(&self, root: NodeId) -> Option<&Arc<FederatedPlan>> {
        self.root_federation
            .iter()
            .find(|(id, _)| *id == root)
            .map(|(_, plan)| plan)
    }

    pub(crate) fn set_root_federation(&mut self, root: NodeId, plan: FederatedPlan) {
        self.root_federation.push((root, Arc::new(plan)));
    }

    /// Root fields grouped by response key, in document order
    pub fn root_groups(&self) -> Vec<Vec<NodeId>> {
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        for &root in &self.roots {
            let key = &self.node(root).response_key;
            match groups.iter_mut().find(|g| &self.node(g[0]).response_key == key) {
                Some(group) => group.push(root),
                None => groups.push(vec![root]),
            }
        }
        groups
    }

    /// Response keys from the root down to `id`, list positions omitted
    pub fn key_path(&self, id: NodeId) -> Vec<String> {
        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id);
            keys.push(node.response_key.clone());
            current = node.parent;
        }
        keys.reverse();
        keys
    }
}

impl Index<NodeId> for ExecutionPlan {
    type Output = PlanNode;

    fn index(&self, id: NodeId) -> &PlanNode {
        self.node(id)
    }
}
