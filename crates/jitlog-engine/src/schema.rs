//! Versioned tag/attribute vocabulary of compilation logs.
//!
//! The decoder does no tag-name branching of its own: every tag maps to an
//! [`EventKind`] and every attribute of that tag to a [`Role`] through this
//! table. Newer log vocabularies are handled by extending the table, either
//! in code or through [`SchemaOverrides`] loaded from configuration.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema override for unknown tag '{0}' must declare a kind")]
    MissingKind(String),
    #[error("Schema override maps attribute '{attribute}' of '{tag}' to role '{role:?}', which {kind:?} events do not use")]
    RoleNotUsed {
        tag: String,
        attribute: String,
        role: Role,
        kind: EventKind,
    },
}

/// Typed event produced for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LogStart,
    HeaderText,
    CompilerThread,
    ThreadLog,
    TaskQueued,
    TaskStart,
    TaskDone,
    Failure,
    Phase,
    PhaseDone,
    TypeDef,
    KlassDef,
    MethodDef,
    ParseOpen,
    ParseDone,
    Bytecode,
    Call,
    InlineSuccess,
    InlineFail,
    Intrinsic,
    UncommonTrap,
    Jvms,
    EliminateAllocation,
    EliminateLock,
    HotThrow,
    Deoptimized,
    MadeNotEntrant,
    #[serde(rename = "nmethod")]
    NMethod,
    CodeCache,
    #[serde(rename = "print_nmethod")]
    PrintNMethod,
    /// Framing elements with no meaning of their own (`tty`, `writer`, ...).
    Structural,
}

/// What an attribute value means, which also fixes how it is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CompileId,
    /// `class name descriptor` method signature.
    Signature,
    /// Id of a `method` dictionary entry.
    MethodRef,
    /// Method of a `jvms` frame: a signature outside tasks, a dictionary id inside.
    FrameMethod,
    /// Id of a `klass` dictionary entry.
    KlassRef,
    /// `1` for a lock, `0` for an unlock.
    LockFlag,
    LockKind,
    Preallocated,
    Bytes,
    Count,
    Backedges,
    InterpreterCount,
    Level,
    CompileKind,
    OsrBci,
    Stamp,
    Success,
    NativeSize,
    InlinedBytes,
    Reason,
    Name,
    Thread,
    Nodes,
    Live,
    Id,
    Holder,
    ReturnType,
    Arguments,
    Bci,
    Opcode,
    InlineFlag,
    Action,
    Compiler,
    Address,
    Entry,
    Size,
    InstsOffset,
    FreeCodeCache,
    Pc,
    Uses,
    Version,
    Process,
    TimeMs,
}

/// Parsing rule attached to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Decimal integer, possibly negative.
    Int,
    /// `0x`-prefixed hexadecimal.
    Hex,
    /// `1`/`0` (also `true`/`false`).
    Bool,
    /// Decimal seconds.
    Stamp,
    Signature,
    /// Decimal dictionary id, or a signature when not numeric.
    MethodOrRef,
    /// Whitespace-separated dictionary ids.
    IdList,
    Text,
}

impl Role {
    pub fn value_type(self) -> ValueType {
        use Role::*;
        match self {
            CompileId | MethodRef | Bytes | Count | Backedges | InterpreterCount | Level
            | OsrBci | NativeSize | InlinedBytes | Nodes | Live | Id | Holder | ReturnType
            | Bci | Opcode | Size | InstsOffset | FreeCodeCache | Process | TimeMs | KlassRef => {
                ValueType::Int
            }
            Address | Entry | Pc => ValueType::Hex,
            Success | InlineFlag | LockFlag | Preallocated => ValueType::Bool,
            Stamp => ValueType::Stamp,
            Signature => ValueType::Signature,
            FrameMethod => ValueType::MethodOrRef,
            Arguments => ValueType::IdList,
            CompileKind | Reason | Name | Thread | Action | Compiler | Uses | Version
            | LockKind => ValueType::Text,
        }
    }
}

impl EventKind {
    /// Roles the decoder reads for this kind. Anything else is carried as unknown.
    pub fn roles(self) -> &'static [Role] {
        use Role::*;
        match self {
            EventKind::LogStart => &[Version, Process, TimeMs],
            EventKind::CompilerThread => &[Name, Thread, Stamp],
            EventKind::ThreadLog => &[Thread],
            EventKind::TaskQueued | EventKind::TaskStart => &[
                CompileId,
                Signature,
                Bytes,
                Count,
                Backedges,
                InterpreterCount,
                Level,
                CompileKind,
                OsrBci,
                Stamp,
            ],
            EventKind::TaskDone => &[Success, NativeSize, InlinedBytes, Stamp],
            EventKind::Failure => &[Reason, Stamp],
            EventKind::Phase | EventKind::PhaseDone => &[Name, Nodes, Live, Stamp],
            EventKind::TypeDef | EventKind::KlassDef => &[Id, Name],
            EventKind::MethodDef => &[
                Id,
                Holder,
                Name,
                ReturnType,
                Arguments,
                Bytes,
                InterpreterCount,
            ],
            EventKind::ParseOpen => &[MethodRef, Uses, Stamp],
            EventKind::ParseDone => &[Stamp],
            EventKind::Bytecode => &[Opcode, Bci],
            EventKind::Call => &[MethodRef, Count, InlineFlag],
            EventKind::InlineSuccess | EventKind::InlineFail => &[Reason],
            EventKind::Intrinsic => &[Id, Name],
            EventKind::UncommonTrap => &[CompileId, Bci, Reason, Action, Stamp],
            EventKind::Jvms => &[Bci, FrameMethod],
            EventKind::EliminateAllocation => &[KlassRef],
            EventKind::EliminateLock => &[LockFlag, LockKind],
            EventKind::HotThrow => &[Preallocated, Reason],
            EventKind::Deoptimized => &[CompileId, Reason, Pc, Stamp],
            EventKind::MadeNotEntrant => &[CompileId, Compiler, Level, Stamp],
            EventKind::NMethod => &[
                CompileId,
                Compiler,
                Level,
                CompileKind,
                Address,
                Entry,
                Size,
                InstsOffset,
                Signature,
                Stamp,
            ],
            EventKind::CodeCache => &[FreeCodeCache, Stamp],
            EventKind::PrintNMethod => &[Stamp, CompileId],
            EventKind::HeaderText | EventKind::Structural => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

type TagRow = (&'static str, EventKind, &'static [(&'static str, Role)]);

const HOTSPOT_1: &[TagRow] = &[
    (
        "hotspot_log",
        EventKind::LogStart,
        &[("version", Role::Version), ("process", Role::Process), ("time_ms", Role::TimeMs)],
    ),
    ("release", EventKind::HeaderText, &[]),
    ("vm_version", EventKind::HeaderText, &[]),
    ("name", EventKind::HeaderText, &[]),
    (
        "start_compile_thread",
        EventKind::CompilerThread,
        &[("name", Role::Name), ("thread", Role::Thread), ("stamp", Role::Stamp)],
    ),
    ("compilation_log", EventKind::ThreadLog, &[("thread", Role::Thread)]),
    ("task_queued", EventKind::TaskQueued, TASK_ATTRIBUTES),
    ("task", EventKind::TaskStart, TASK_ATTRIBUTES),
    (
        "task_done",
        EventKind::TaskDone,
        &[
            ("success", Role::Success),
            ("nmsize", Role::NativeSize),
            ("inlined_bytes", Role::InlinedBytes),
            ("stamp", Role::Stamp),
        ],
    ),
    ("failure", EventKind::Failure, &[("reason", Role::Reason), ("stamp", Role::Stamp)]),
    ("phase", EventKind::Phase, PHASE_ATTRIBUTES),
    ("phase_done", EventKind::PhaseDone, PHASE_ATTRIBUTES),
    ("type", EventKind::TypeDef, &[("id", Role::Id), ("name", Role::Name)]),
    ("klass", EventKind::KlassDef, &[("id", Role::Id), ("name", Role::Name)]),
    (
        "method",
        EventKind::MethodDef,
        &[
            ("id", Role::Id),
            ("holder", Role::Holder),
            ("name", Role::Name),
            ("return", Role::ReturnType),
            ("arguments", Role::Arguments),
            ("bytes", Role::Bytes),
            ("iicount", Role::InterpreterCount),
        ],
    ),
    (
        "parse",
        EventKind::ParseOpen,
        &[("method", Role::MethodRef), ("uses", Role::Uses), ("stamp", Role::Stamp)],
    ),
    ("parse_done", EventKind::ParseDone, &[("stamp", Role::Stamp)]),
    ("bc", EventKind::Bytecode, &[("code", Role::Opcode), ("bci", Role::Bci)]),
    (
        "call",
        EventKind::Call,
        &[("method", Role::MethodRef), ("count", Role::Count), ("inline", Role::InlineFlag)],
    ),
    ("inline_success", EventKind::InlineSuccess, &[("reason", Role::Reason)]),
    ("inline_fail", EventKind::InlineFail, &[("reason", Role::Reason)]),
    ("intrinsic", EventKind::Intrinsic, &[("id", Role::Name)]),
    (
        "uncommon_trap",
        EventKind::UncommonTrap,
        &[
            ("compile_id", Role::CompileId),
            ("bci", Role::Bci),
            ("reason", Role::Reason),
            ("action", Role::Action),
            ("stamp", Role::Stamp),
        ],
    ),
    ("jvms", EventKind::Jvms, &[("bci", Role::Bci), ("method", Role::FrameMethod)]),
    ("eliminate_allocation", EventKind::EliminateAllocation, &[("type", Role::KlassRef)]),
    (
        "eliminate_lock",
        EventKind::EliminateLock,
        &[("lock", Role::LockFlag), ("kind", Role::LockKind)],
    ),
    (
        "hot_throw",
        EventKind::HotThrow,
        &[("preallocated", Role::Preallocated), ("reason", Role::Reason)],
    ),
    (
        "deoptimized",
        EventKind::Deoptimized,
        &[
            ("compile_id", Role::CompileId),
            ("reason", Role::Reason),
            ("pc", Role::Pc),
            ("stamp", Role::Stamp),
        ],
    ),
    (
        "make_not_entrant",
        EventKind::MadeNotEntrant,
        &[
            ("compile_id", Role::CompileId),
            ("compiler", Role::Compiler),
            ("level", Role::Level),
            ("stamp", Role::Stamp),
        ],
    ),
    (
        "nmethod",
        EventKind::NMethod,
        &[
            ("compile_id", Role::CompileId),
            ("compiler", Role::Compiler),
            ("level", Role::Level),
            ("compile_kind", Role::CompileKind),
            ("address", Role::Address),
            ("entry", Role::Entry),
            ("size", Role::Size),
            ("insts_offset", Role::InstsOffset),
            ("method", Role::Signature),
            ("stamp", Role::Stamp),
        ],
    ),
    (
        "code_cache",
        EventKind::CodeCache,
        &[("free_code_cache", Role::FreeCodeCache), ("stamp", Role::Stamp)],
    ),
    (
        "print_nmethod",
        EventKind::PrintNMethod,
        &[("stamp", Role::Stamp), ("compile_id", Role::CompileId)],
    ),
    ("hotspot_log_done", EventKind::Structural, &[]),
    ("tty", EventKind::Structural, &[]),
    ("tty_done", EventKind::Structural, &[]),
    ("writer", EventKind::Structural, &[]),
    ("vm_arguments", EventKind::Structural, &[]),
    ("args", EventKind::Structural, &[]),
    ("command", EventKind::Structural, &[]),
    ("properties", EventKind::Structural, &[]),
];

const TASK_ATTRIBUTES: &[(&str, Role)] = &[
    ("compile_id", Role::CompileId),
    ("method", Role::Signature),
    ("bytes", Role::Bytes),
    ("count", Role::Count),
    ("backedge_count", Role::Backedges),
    ("iicount", Role::InterpreterCount),
    ("level", Role::Level),
    ("compile_kind", Role::CompileKind),
    ("osr_bci", Role::OsrBci),
    ("stamp", Role::Stamp),
];

const PHASE_ATTRIBUTES: &[(&str, Role)] = &[
    ("name", Role::Name),
    ("nodes", Role::Nodes),
    ("live", Role::Live),
    ("stamp", Role::Stamp),
];

pub const BUILTIN_VERSION: &str = "hotspot-1";

static BUILTIN: Lazy<SchemaTable> = Lazy::new(|| {
    let tags = HOTSPOT_1
        .iter()
        .map(|(tag, kind, attributes)| {
            let spec = TagSpec {
                kind: *kind,
                attributes: attributes
                    .iter()
                    .map(|(name, role)| (name.to_string(), *role))
                    .collect(),
            };
            (tag.to_string(), spec)
        })
        .collect();
    SchemaTable {
        version: BUILTIN_VERSION.to_string(),
        tags,
    }
});

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpec {
    pub kind: EventKind,
    pub attributes: FxHashMap<String, Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTable {
    version: String,
    tags: FxHashMap<String, TagSpec>,
}

impl Default for SchemaTable {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl SchemaTable {
    /// The built-in HotSpot vocabulary.
    pub fn builtin() -> &'static SchemaTable {
        &BUILTIN
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tag(&self, name: &str) -> Option<&TagSpec> {
        self.tags.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<EventKind> {
        self.tags.get(name).map(|spec| spec.kind)
    }

    /// Role of `attribute` on `tag`, if the table knows it.
    pub fn role(&self, tag: &str, attribute: &str) -> Option<Role> {
        self.tags.get(tag)?.attributes.get(attribute).copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Layer `overrides` on top of this table.
    ///
    /// Known tags keep their kind unless the override names one; attribute
    /// maps are merged key by key.
    pub fn with_overrides(&self, overrides: &SchemaOverrides) -> Result<SchemaTable, SchemaError> {
        let mut table = self.clone();
        if let Some(ref version) = overrides.version {
            table.version = version.clone();
        }
        for (tag, entry) in &overrides.tags {
            let kind = match (entry.kind, table.tags.get(tag)) {
                (Some(kind), _) => kind,
                (None, Some(existing)) => existing.kind,
                (None, None) => return Err(SchemaError::MissingKind(tag.clone())),
            };
            for (attribute, role) in &entry.attributes {
                if !kind.roles().contains(role) {
                    return Err(SchemaError::RoleNotUsed {
                        tag: tag.clone(),
                        attribute: attribute.clone(),
                        role: *role,
                        kind,
                    });
                }
            }
            let spec = table.tags.entry(tag.clone()).or_insert_with(|| TagSpec {
                kind,
                attributes: FxHashMap::default(),
            });
            spec.kind = kind;
            spec.attributes
                .extend(entry.attributes.iter().map(|(a, r)| (a.clone(), *r)));
        }
        Ok(table)
    }
}

/// `[schema]` section of the engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOverrides {
    pub version: Option<String>,
    pub tags: BTreeMap<String, TagOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOverride {
    pub kind: Option<EventKind>,
    pub attributes: BTreeMap<String, Role>,
}
