// shadowgraph-core: Shadow object graph and the reaction engine that keeps derived configuration current.

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod hooks;
pub mod model;
pub mod payload;
pub mod reaction;
pub mod registry;
pub mod trace;

// ── Primary re-exports ──────────────────────────────────────────────
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorState, PartitionedDispatcher, SyncReport,
};
pub use error::CoreError;
pub use gateway::{MemoryStore, StoreGateway};
pub use graph::{ApplyOutcome, GraphStats, GraphView, ObjectGraph, SymmetryViolation, ViolationKind};
pub use hooks::{FnHook, HookError, HookRegistry, RecomputeHook};
pub use payload::ObjectDocument;
pub use reaction::{
    CompiledRule, DependencyResolver, DependencySet, Direction, Edge, ReactionMap, ReactionRule,
    Scope,
};
pub use registry::{
    Cardinality, Indexing, RefSpec, RegistryBuilder, ResourceRegistry, ResourceSchema,
};
pub use trace::{SinkSet, TraceBuffer, TraceOutcome, TraceRecord, TraceSink, TracingSink};

// Model types at the crate root for ergonomics.
pub use model::{
    CachedObject, ChangeEvent, FqName, ObjectId, ObjectKey, Operation, RefSlot, ResourceType,
};
