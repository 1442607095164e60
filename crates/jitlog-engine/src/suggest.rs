//! Actionable inlining failures.
//!
//! Pure transformations over built tasks: nothing here touches the index.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::history::FrozenIndex;
use crate::inline_tree::{InlineDecision, NodeId};
use crate::model::{CompileTask, MethodIdentity};

/// What a developer could change to get the call inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RemedyCategory {
    ReduceCalleeSize,
    RemoveInlineRestriction,
    ReduceRecursionDepth,
}

/// Reason fragments, checked in order. Recursion comes first so that
/// "recursive inlining is too deep" is not mistaken for a size limit.
const REASONS: &[(&str, RemedyCategory)] = &[
    ("recursive", RemedyCategory::ReduceRecursionDepth),
    ("inlining too deep", RemedyCategory::ReduceRecursionDepth),
    ("too big", RemedyCategory::ReduceCalleeSize),
    ("too large", RemedyCategory::ReduceCalleeSize),
    ("big method", RemedyCategory::ReduceCalleeSize),
    ("size >", RemedyCategory::ReduceCalleeSize),
    ("desiredmethodlimit", RemedyCategory::ReduceCalleeSize),
    ("nodecountinliningcutoff", RemedyCategory::ReduceCalleeSize),
    ("disallowed by compilecommand", RemedyCategory::RemoveInlineRestriction),
    ("excluded by compilecommand", RemedyCategory::RemoveInlineRestriction),
    ("don't inline by annotation", RemedyCategory::RemoveInlineRestriction),
    ("dontinline", RemedyCategory::RemoveInlineRestriction),
    ("force not inline", RemedyCategory::RemoveInlineRestriction),
];

/// Failure reasons that never lead to a useful change.
const NOT_ACTIONABLE: &[&str] = &["not inlineable", "no static binding"];

pub fn classify_reason(reason: &str) -> Option<RemedyCategory> {
    let reason = reason.to_ascii_lowercase();
    REASONS
        .iter()
        .find(|(fragment, _)| reason.contains(fragment))
        .map(|(_, category)| *category)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub node: NodeId,
    pub caller: MethodIdentity,
    pub callee: MethodIdentity,
    pub bci: Option<u32>,
    pub reason: String,
    pub remedy: RemedyCategory,
}

/// Not-inlined call sites of `task` with an actionable reason, in tree preorder.
pub fn suggestions_for(task: &CompileTask) -> Vec<Suggestion> {
    let tree = &task.inline_tree;
    tree.preorder()
        .filter(|n| n.decision == InlineDecision::NotInlined)
        .filter_map(|n| {
            let reason = n.reason.as_deref()?;
            let remedy = classify_reason(reason)?;
            Some(Suggestion {
                node: n.id,
                caller: tree.caller_of(n.id).clone(),
                callee: n.callee.clone(),
                bci: n.bci,
                reason: reason.to_string(),
                remedy,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSite {
    pub caller: MethodIdentity,
    pub bci: Option<u32>,
}

/// Every rejected call of one callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineFailureGroup {
    pub callee: MethodIdentity,
    pub callee_size: Option<u32>,
    pub invocation_count: Option<u64>,
    pub reasons: BTreeSet<String>,
    pub call_sites: Vec<FailureSite>,
}

/// Group the inlining failures of each method's latest closed compilation by
/// callee, busiest callee first.
pub fn inline_failure_groups(index: &FrozenIndex) -> Vec<InlineFailureGroup> {
    let mut groups: BTreeMap<MethodIdentity, InlineFailureGroup> = BTreeMap::new();
    for task in index.histories().filter_map(|h| h.latest_closed()) {
        let tree = &task.inline_tree;
        for node in tree.preorder() {
            if node.decision != InlineDecision::NotInlined {
                continue;
            }
            let reason = node.reason.as_deref().unwrap_or("unknown");
            if NOT_ACTIONABLE.contains(&reason) {
                continue;
            }
            let group = groups
                .entry(node.callee.clone())
                .or_insert_with(|| InlineFailureGroup {
                    callee: node.callee.clone(),
                    callee_size: node.callee_size,
                    invocation_count: node.invocation_count,
                    reasons: BTreeSet::new(),
                    call_sites: Vec::new(),
                });
            group.reasons.insert(reason.to_string());
            group.call_sites.push(FailureSite {
                caller: tree.caller_of(node.id).clone(),
                bci: node.bci,
            });
        }
    }
    let mut groups: Vec<InlineFailureGroup> = groups.into_values().collect();
    // Stable: equal counts stay in callee order.
    groups.sort_by(|a, b| b.call_sites.len().cmp(&a.call_sites.len()));
    groups
}
