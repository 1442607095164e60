//! Ranked lists and optimisation reports over a frozen index.
//!
//! Top lists score either single compile tasks (native size, compile time)
//! or whole method histories (bytecode size, decompile count), or count
//! occurrences across every task (inline failure reasons, intrinsics, hot
//! throws). Ties keep a stable label order so output is reproducible.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::history::FrozenIndex;
use crate::inline_tree::InlineDecision;
use crate::model::{CompileId, JvmsFrame, LockOp, MethodIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopListKind {
    LargestNative,
    LargestBytecode,
    SlowestCompiles,
    MostDecompiled,
    InlineFailureReasons,
    Intrinsics,
    HotThrows,
}

impl TopListKind {
    pub const ALL: [TopListKind; 7] = [
        TopListKind::LargestNative,
        TopListKind::LargestBytecode,
        TopListKind::SlowestCompiles,
        TopListKind::MostDecompiled,
        TopListKind::InlineFailureReasons,
        TopListKind::Intrinsics,
        TopListKind::HotThrows,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TopListKind::LargestNative => "largest-native",
            TopListKind::LargestBytecode => "largest-bytecode",
            TopListKind::SlowestCompiles => "slowest-compiles",
            TopListKind::MostDecompiled => "most-decompiled",
            TopListKind::InlineFailureReasons => "inline-failure-reasons",
            TopListKind::Intrinsics => "intrinsics",
            TopListKind::HotThrows => "hot-throws",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            TopListKind::LargestNative => "Largest native methods (bytes)",
            TopListKind::LargestBytecode => "Largest bytecode methods (bytes)",
            TopListKind::SlowestCompiles => "Slowest compilations (us)",
            TopListKind::MostDecompiled => "Most decompiled methods",
            TopListKind::InlineFailureReasons => "Inlining failure reasons",
            TopListKind::Intrinsics => "Most used intrinsics",
            TopListKind::HotThrows => "Hot throws",
        }
    }
}

impl fmt::Display for TopListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown top list '{0}'")]
pub struct UnknownTopList(pub String);

impl FromStr for TopListKind {
    type Err = UnknownTopList;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopListKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownTopList(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopEntry {
    pub label: String,
    /// Method the entry is about, when it is about one.
    pub method: Option<MethodIdentity>,
    /// Set for lists that rank single tasks.
    pub compile_id: Option<CompileId>,
    pub value: u64,
}

impl TopEntry {
    fn for_method(method: &MethodIdentity, compile_id: Option<CompileId>, value: u64) -> TopEntry {
        TopEntry {
            label: method.to_string(),
            method: Some(method.clone()),
            compile_id,
            value,
        }
    }
}

/// The `limit` highest-scoring entries of `kind`, highest first.
pub fn top_list(index: &FrozenIndex, kind: TopListKind, limit: usize) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = match kind {
        TopListKind::LargestNative => index
            .tasks()
            .filter_map(|task| {
                let size = task
                    .native_size
                    .or_else(|| task.nmethod.as_ref().and_then(|n| n.size))?;
                Some(TopEntry::for_method(&task.method, Some(task.compile_id), size))
            })
            .collect(),
        TopListKind::SlowestCompiles => index
            .tasks()
            .filter_map(|task| {
                let took = task.duration_us()?;
                Some(TopEntry::for_method(&task.method, Some(task.compile_id), took))
            })
            .collect(),
        TopListKind::LargestBytecode => index
            .histories()
            .filter_map(|history| {
                let size = history.tasks().iter().filter_map(|t| t.bytecode_size).max()?;
                Some(TopEntry::for_method(history.method(), None, u64::from(size)))
            })
            .collect(),
        TopListKind::MostDecompiled => index
            .histories()
            .filter_map(|history| {
                let count = history.tasks().iter().filter(|t| t.is_invalidated()).count();
                (count > 0).then(|| TopEntry::for_method(history.method(), None, count as u64))
            })
            .collect(),
        TopListKind::InlineFailureReasons => count_labels(index.tasks().flat_map(|task| {
            task.inline_tree
                .preorder()
                .filter(|node| node.decision == InlineDecision::NotInlined)
                .map(|node| (node.reason.clone().unwrap_or_else(|| "unknown".to_string()), None))
        })),
        TopListKind::Intrinsics => count_labels(index.tasks().flat_map(|task| {
            task.inline_tree
                .preorder()
                .filter(|node| node.decision == InlineDecision::Intrinsic)
                .map(|node| {
                    let name = node.reason.as_deref().unwrap_or("?");
                    (format!("{} -> {}", node.callee, name), Some(node.callee.clone()))
                })
        })),
        TopListKind::HotThrows => count_labels(index.tasks().flat_map(|task| {
            task.hot_throws.iter().map(|throw| {
                let bci = throw.bci.map_or_else(|| "?".to_string(), |b| b.to_string());
                let reason = throw.reason.as_deref().unwrap_or("unknown");
                let label = format!("{} @ {}: {}", throw.method, bci, reason);
                (label, Some(throw.method.clone()))
            })
        })),
    };
    entries.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    entries.truncate(limit);
    entries
}

fn count_labels(items: impl Iterator<Item = (String, Option<MethodIdentity>)>) -> Vec<TopEntry> {
    let mut counts: FxHashMap<String, TopEntry> = FxHashMap::default();
    for (label, method) in items {
        counts
            .entry(label)
            .or_insert_with_key(|label| TopEntry {
                label: label.clone(),
                method,
                compile_id: None,
                value: 0,
            })
            .value += 1;
    }
    counts.into_values().collect()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRow {
    pub compile_id: CompileId,
    /// The compiled method, which may differ from the site's when inlined.
    pub compiled: MethodIdentity,
    /// Innermost frame of the allocation.
    pub site: Option<JvmsFrame>,
    pub class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRow {
    pub compile_id: CompileId,
    pub compiled: MethodIdentity,
    pub site: Option<JvmsFrame>,
    pub op: Option<LockOp>,
    pub kind: Option<String>,
}

/// Every allocation removed by escape analysis, in compile id order.
pub fn eliminated_allocations(index: &FrozenIndex) -> Vec<AllocationRow> {
    let mut rows: Vec<AllocationRow> = index
        .tasks()
        .flat_map(|task| {
            task.eliminated_allocations.iter().map(|alloc| AllocationRow {
                compile_id: task.compile_id,
                compiled: task.method.clone(),
                site: alloc.frames.first().cloned(),
                class: alloc.class.clone(),
            })
        })
        .collect();
    rows.sort_by_key(|row| row.compile_id);
    rows
}

/// Every elided lock or unlock, in compile id order.
pub fn elided_locks(index: &FrozenIndex) -> Vec<LockRow> {
    let mut rows: Vec<LockRow> = index
        .tasks()
        .flat_map(|task| {
            task.elided_locks.iter().map(|lock| LockRow {
                compile_id: task.compile_id,
                compiled: task.method.clone(),
                site: lock.frames.first().cloned(),
                op: lock.op,
                kind: lock.kind.clone(),
            })
        })
        .collect();
    rows.sort_by_key(|row| row.compile_id);
    rows
}
