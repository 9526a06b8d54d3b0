// Arena-based storage for container graph metadata
//
// - node_arena: one slab slot per container (edges, label, weak pointer)
// - context: the thread-local evaluation stack used for dependency tracking
//
// NodeId is a lightweight newtype that indexes into the slab. The arena is
// owned by a Runtime rather than a global static, so independent runtimes
// never share slots.

pub mod context;
pub mod node_arena;

pub use context::untracked;
pub(crate) use context::{EvaluationGuard, Frame, RuntimeKey, current_frame};
pub use node_arena::NodeId;
pub(crate) use node_arena::{NodeArena, NodeMetadata};
