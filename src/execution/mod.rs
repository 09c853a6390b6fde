//! Plan execution: the wave executor and the response tree it fills

pub mod engine;
pub mod tree;

pub use engine::{ExecutionOutcome, Executor};
pub use tree::{FieldState, ResultTree, SlotId};
