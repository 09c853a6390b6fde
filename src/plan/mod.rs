//! Query planning: compiling documents into leveled execution plans

pub mod arguments;
pub mod cache;
pub mod compiler;
pub mod node;

pub use cache::PlanCache;
pub use compiler::{PlanLimits, QueryPlanCompiler};
pub use node::{ExecutionPlan, NodeId, OperationKind, PlanNode};
