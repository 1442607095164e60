//! Inlining decision tree for one compilation.
//!
//! Nodes live in an arena and link to each other by [`NodeId`], so trees of any
//! depth are built, walked, serialized and dropped without recursion. The
//! compiled method itself is the implicit root; every node is a call site.

use serde::{Deserialize, Serialize};

use crate::model::MethodIdentity;

/// Index of a call-site node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// What the compiler did at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InlineDecision {
    Inlined,
    NotInlined,
    /// Replaced by a compiler intrinsic.
    Intrinsic,
}

/// A call site inside the compiled method or one of its inlined callees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineNode {
    pub id: NodeId,
    /// `None` when the call site belongs to the compiled method itself.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub callee: MethodIdentity,
    /// Bytecode index of the call in the caller.
    pub bci: Option<u32>,
    pub decision: InlineDecision,
    pub reason: Option<String>,
    pub detail: Option<String>,
    /// Callee bytecode size, when the log declared it.
    pub callee_size: Option<u32>,
    pub invocation_count: Option<u64>,
    /// 1 for call sites in the compiled method itself.
    pub depth: u32,
}

/// Fields of a node before it is linked into the arena.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub callee: MethodIdentity,
    pub bci: Option<u32>,
    pub decision: InlineDecision,
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub callee_size: Option<u32>,
    pub invocation_count: Option<u64>,
}

/// A bci that lies outside its caller's declared code size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainmentViolation {
    pub node: NodeId,
    pub bci: u32,
    pub parent_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineTree {
    root_method: MethodIdentity,
    root_size: Option<u32>,
    roots: Vec<NodeId>,
    nodes: Vec<InlineNode>,
}

impl InlineTree {
    pub fn new(root_method: MethodIdentity, root_size: Option<u32>) -> Self {
        InlineTree {
            root_method,
            root_size,
            roots: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn root_method(&self) -> &MethodIdentity {
        &self.root_method
    }

    pub fn root_size(&self) -> Option<u32> {
        self.root_size
    }

    pub(crate) fn set_root(&mut self, method: MethodIdentity, size: Option<u32>) {
        self.root_method = method;
        if size.is_some() {
            self.root_size = size;
        }
    }

    /// Call sites of the compiled method itself, in log order.
    pub fn top_level(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of call-site nodes (one per decision event).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&InlineNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[InlineNode] {
        &self.nodes
    }

    /// Link a new call site under `parent` (or under the compiled method).
    ///
    /// A dangling parent id attaches the node at the top level.
    pub fn add(&mut self, parent: Option<NodeId>, site: CallSite) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = parent.filter(|p| (p.0 as usize) < self.nodes.len());
        let depth = match parent {
            Some(p) => self.nodes[p.0 as usize].depth + 1,
            None => 1,
        };
        self.nodes.push(InlineNode {
            id,
            parent,
            children: Vec::new(),
            callee: site.callee,
            bci: site.bci,
            decision: site.decision,
            reason: site.reason,
            detail: site.detail,
            callee_size: site.callee_size,
            invocation_count: site.invocation_count,
            depth,
        });
        match parent {
            Some(p) => self.nodes[p.0 as usize].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// The method whose bytecode contains the call site `id`.
    pub fn caller_of(&self, id: NodeId) -> &MethodIdentity {
        match self.node(id).and_then(|n| n.parent).and_then(|p| self.node(p)) {
            Some(parent) => &parent.callee,
            None => &self.root_method,
        }
    }

    fn caller_size(&self, node: &InlineNode) -> Option<u32> {
        match node.parent {
            Some(p) => self.nodes[p.0 as usize].callee_size,
            None => self.root_size,
        }
    }

    /// Depth-first, log-ordered walk over all call sites.
    pub fn preorder(&self) -> Preorder<'_> {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        stack.reserve(8);
        Preorder { tree: self, stack }
    }

    /// Deepest inlining level present in the tree.
    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Check that every call site's bci lies within its caller's code size.
    ///
    /// Sizes or bcis missing from the log are not treated as violations.
    pub fn validate(&self) -> Vec<ContainmentViolation> {
        self.nodes
            .iter()
            .filter_map(|node| {
                let bci = node.bci?;
                let size = self.caller_size(node)?;
                (bci >= size).then_some(ContainmentViolation {
                    node: node.id,
                    bci,
                    parent_size: size,
                })
            })
            .collect()
    }
}

/// Iterator returned by [`InlineTree::preorder`].
pub struct Preorder<'a> {
    tree: &'a InlineTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a InlineNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id)?;
        self.stack.extend(node.children.iter().rev().copied());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, bci: u32, decision: InlineDecision, size: Option<u32>) -> CallSite {
        CallSite {
            callee: MethodIdentity::new("Foo", name, "()V"),
            bci: Some(bci),
            decision,
            reason: None,
            detail: None,
            callee_size: size,
            invocation_count: None,
        }
    }

    #[test]
    fn test_add_and_preorder() {
        let mut tree = InlineTree::new(MethodIdentity::new("Foo", "root", "()V"), Some(40));
        let a = tree.add(None, site("a", 1, InlineDecision::Inlined, Some(10)));
        let b = tree.add(Some(a), site("b", 2, InlineDecision::NotInlined, Some(500)));
        let c = tree.add(None, site("c", 20, InlineDecision::Inlined, Some(5)));
        let d = tree.add(Some(a), site("d", 5, InlineDecision::Intrinsic, None));

        let order: Vec<NodeId> = tree.preorder().map(|n| n.id).collect();
        assert_eq!(order, vec![a, b, d, c]);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.node(b).unwrap().depth, 2);
        assert_eq!(tree.caller_of(b).method_name, "a");
        assert_eq!(tree.caller_of(c).method_name, "root");
        assert_eq!(tree.max_depth(), 2);
        assert!(tree.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_out_of_range_bci() {
        let mut tree = InlineTree::new(MethodIdentity::new("Foo", "root", "()V"), Some(10));
        let a = tree.add(None, site("a", 3, InlineDecision::Inlined, Some(4)));
        let bad = tree.add(Some(a), site("b", 4, InlineDecision::NotInlined, None));
        let top_bad = tree.add(None, site("c", 10, InlineDecision::NotInlined, None));

        let violations = tree.validate();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0], ContainmentViolation { node: bad, bci: 4, parent_size: 4 });
        assert_eq!(violations[1].node, top_bad);
    }

    #[test]
    fn test_deep_tree_walk_is_iterative() {
        let mut tree = InlineTree::new(MethodIdentity::new("Foo", "root", "()V"), None);
        let mut parent = None;
        for i in 0..200_000u32 {
            parent = Some(tree.add(parent, site("r", i % 7, InlineDecision::Inlined, None)));
        }
        assert_eq!(tree.preorder().count(), 200_000);
        assert_eq!(tree.max_depth(), 200_000);
        // Dropping the arena must not recurse either.
        drop(tree);
    }

    #[test]
    fn test_dangling_parent_attaches_at_top_level() {
        let mut tree = InlineTree::new(MethodIdentity::new("Foo", "root", "()V"), None);
        let id = tree.add(Some(NodeId(42)), site("a", 0, InlineDecision::Inlined, None));
        assert_eq!(tree.top_level(), &[id]);
        assert_eq!(tree.node(id).unwrap().parent, None);
    }
}
