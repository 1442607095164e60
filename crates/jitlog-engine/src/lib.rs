//! JIT compilation log engine
//!
//! Turns the compilation log of a tiered JIT compiler into a queryable model:
//! - Streaming reader and table-driven event decoder
//! - Compile task builder with arena-backed inline trees
//! - Per-method compilation histories with deopt attachment
//! - Printed assembly parsing and native-to-bytecode correlation
//! - Query facade, inlining suggestions, statistics, top lists and session snapshots

pub mod asm;
pub mod builder;
pub mod config;
pub mod correlate;
pub mod decoder;
pub mod history;
pub mod inline_tree;
pub mod model;
pub mod persist;
pub mod query;
pub mod reader;
pub mod schema;
pub mod session;
pub mod stats;
pub mod suggest;
pub mod toplist;

pub use asm::{AssemblyMethod, CodeSpanError};
pub use builder::{BuilderOptions, BuilderStats, Emitted, TaskBuilder};
pub use config::{ConfigError, EngineConfig};
pub use correlate::{
    correlate, BciMapping, CorrelationAnomalies, CorrelationEntry, CorrelationMap, Disassembler,
    DisassemblyError, Instruction, SourceLineTable,
};
pub use decoder::{decode, DecodedEvent, LogEvent};
pub use history::{FrozenIndex, HistoryFlag, HistoryIndex, MethodHistory};
pub use inline_tree::{InlineDecision, InlineNode, InlineTree, NodeId};
pub use model::{
    CompileId, CompileKind, CompileTask, DebugAnchor, DeoptEvent, DeoptKind, ElidedLock,
    EliminatedAllocation, HotThrow, JvmsFrame, LockOp, MethodIdentity, NativeMethod, Outcome,
    Stamp, TaskFlag, TaskState,
};
pub use persist::{PersistError, Snapshot};
pub use query::{QueryError, QueryFacade};
pub use reader::{CancelToken, EventReader, FileSource, FollowSource, LogSource, MemorySource, SourceError};
pub use schema::{EventKind, SchemaError, SchemaTable};
pub use session::{parse_source, PassReport, Session, SessionError, SessionReport, SharedIndex};
pub use stats::LogStats;
pub use suggest::{InlineFailureGroup, RemedyCategory, Suggestion};
pub use toplist::{AllocationRow, LockRow, TopEntry, TopListKind};
