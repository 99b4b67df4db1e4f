//! Tree store for hypothesis nodes.
//!
//! The tree is a flat, creation-ordered collection of [`HypothesisNode`]s.
//! `parent_id` links are the source of truth; each node's `children_ids` is a
//! denormalized cache that [`HypothesisTree::rebuild_children_index`] recomputes.

mod id;

pub use id::{NodeId, ROOT_SENTINEL};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::{EngineError, EngineResult};

/// A claim in the hypothesis tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisNode {
    /// Dotted-path identifier.
    pub id: NodeId,
    /// Owning node, or the root sentinel.
    pub parent_id: NodeId,
    /// Hypothesis text.
    pub text: String,
    /// Reasoning behind the hypothesis.
    pub reasoning: String,
    /// Whether the node is terminal for decomposition.
    pub is_leaf: bool,
    /// Ordered child ids (cache of `parent_id` links).
    #[serde(default)]
    pub children_ids: Vec<NodeId>,
    /// Context collaborators consulted while producing this node.
    #[serde(default)]
    pub tools_used: BTreeSet<String>,
}

impl HypothesisNode {
    /// Create a non-leaf node whose parent is derived from its id.
    pub fn new(id: NodeId, text: impl Into<String>, reasoning: impl Into<String>) -> Self {
        let parent_id = id.parent();
        Self {
            id,
            parent_id,
            text: text.into(),
            reasoning: reasoning.into(),
            is_leaf: false,
            children_ids: Vec::new(),
            tools_used: BTreeSet::new(),
        }
    }

    /// Mark the node as a leaf.
    pub fn as_leaf(mut self) -> Self {
        self.is_leaf = true;
        self
    }

    /// Record the tools used to produce the node.
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.tools_used.extend(tools);
        self
    }

    /// Depth of the node (segment count of its id).
    pub fn depth(&self) -> usize {
        self.id.depth()
    }

    /// Whether the node hangs directly off the root sentinel.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_sentinel()
    }
}

/// Analysis required to test a leaf hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub hypothesis_id: NodeId,
    pub analysis_required: String,
    pub analysis_reasoning: String,
    pub source_of_reference: String,
    pub source_reasoning: String,
}

/// Flat collection of hypothesis nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisTree {
    nodes: Vec<HypothesisNode>,
}

impl HypothesisTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from raw nodes, repairing the children index.
    pub fn from_nodes(nodes: Vec<HypothesisNode>) -> Self {
        let mut tree = Self { nodes };
        tree.rebuild_children_index();
        tree
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[HypothesisNode] {
        &self.nodes
    }

    /// Consume the tree, yielding its nodes.
    pub fn into_nodes(self) -> Vec<HypothesisNode> {
        self.nodes
    }

    /// Whether a node with `id` exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    /// Look up a node by id.
    pub fn get(&self, id: &NodeId) -> EngineResult<&HypothesisNode> {
        self.nodes
            .iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| EngineError::NodeNotFound { id: id.to_string() })
    }

    pub(crate) fn get_mut(&mut self, id: &NodeId) -> EngineResult<&mut HypothesisNode> {
        self.nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| EngineError::NodeNotFound { id: id.to_string() })
    }

    /// Replace the node with a matching id, or append it.
    ///
    /// Other nodes are left untouched; callers adding children must follow
    /// up with [`Self::refresh_children`] on the parent.
    pub fn upsert(&mut self, node: HypothesisNode) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Root nodes in creation order.
    pub fn roots(&self) -> impl Iterator<Item = &HypothesisNode> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    /// Children of `id` by `parent_id` link, ordered by id.
    pub fn children_of(&self, id: &NodeId) -> Vec<&HypothesisNode> {
        let mut children: Vec<&HypothesisNode> =
            self.nodes.iter().filter(|n| &n.parent_id == id).collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        children
    }

    /// Every descendant of `id`, found breadth-first over `parent_id` links.
    ///
    /// Does not consult `children_ids`, so it stays correct when that cache
    /// has drifted.
    pub fn descendants_of(&self, id: &NodeId) -> HashSet<NodeId> {
        let mut found = HashSet::new();
        let mut frontier = VecDeque::from([id.clone()]);

        while let Some(current) = frontier.pop_front() {
            for node in self.nodes.iter().filter(|n| n.parent_id == current) {
                if found.insert(node.id.clone()) {
                    frontier.push_back(node.id.clone());
                }
            }
        }

        found
    }

    /// Recompute `children_ids` of a single node from `parent_id` links.
    pub fn refresh_children(&mut self, id: &NodeId) {
        let children: Vec<NodeId> = self
            .children_of(id)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        if let Some(node) = self.nodes.iter_mut().find(|n| &n.id == id) {
            node.children_ids = children;
        }
    }

    /// Recompute every node's `children_ids` from `parent_id` links.
    pub fn rebuild_children_index(&mut self) {
        let mut index: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .map(|n| (n.parent_id.clone(), n.id.clone()))
            .collect();
        index.sort_by(|a, b| a.1.cmp(&b.1));

        for node in &mut self.nodes {
            node.children_ids = index
                .iter()
                .filter(|(parent, _)| parent == &node.id)
                .map(|(_, child)| child.clone())
                .collect();
        }
    }

    /// Remove the given ids; does not touch the children index.
    pub(crate) fn remove_all(&mut self, ids: &HashSet<NodeId>) {
        self.nodes.retain(|n| !ids.contains(&n.id));
    }

    /// Verify the structural invariants.
    ///
    /// - ids are unique
    /// - each id has exactly one more segment than its parent id, and that
    ///   parent is the path prefix
    /// - each non-root node's parent exists
    /// - `children_ids` equals the set of nodes linking to the node
    pub fn check_invariants(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(violation(format!("duplicate node id {}", node.id)));
            }
        }

        for node in &self.nodes {
            if node.id.is_sentinel() {
                return Err(violation("root sentinel stored as a node".to_string()));
            }
            if node.id.parent() != node.parent_id {
                return Err(violation(format!(
                    "node {} has parent_id {} (expected {})",
                    node.id,
                    node.parent_id,
                    node.id.parent()
                )));
            }
            if !node.parent_id.is_sentinel() && !self.contains(&node.parent_id) {
                return Err(violation(format!(
                    "node {} references missing parent {}",
                    node.id, node.parent_id
                )));
            }

            let expected: HashSet<&NodeId> = self
                .nodes
                .iter()
                .filter(|n| n.parent_id == node.id)
                .map(|n| &n.id)
                .collect();
            let cached: HashSet<&NodeId> = node.children_ids.iter().collect();
            if expected != cached || cached.len() != node.children_ids.len() {
                return Err(violation(format!(
                    "children index of {} is stale",
                    node.id
                )));
            }
        }

        Ok(())
    }
}

fn violation(message: String) -> EngineError {
    EngineError::InvariantViolation { message }
}

/// Depth-first pre-order walk from the roots, yielding `(depth, node)`.
///
/// Children are visited by `parent_id` link in id order, so the walk is
/// valid even when `children_ids` has drifted.
pub fn render(tree: &HypothesisTree) -> Vec<(usize, &HypothesisNode)> {
    let mut out = Vec::with_capacity(tree.len());
    let mut stack: Vec<&HypothesisNode> = tree.roots().collect();
    stack.sort_by(|a, b| b.id.cmp(&a.id));

    while let Some(node) = stack.pop() {
        out.push((node.depth(), node));
        let mut children = tree.children_of(&node.id);
        children.reverse();
        stack.extend(children);
    }

    out
}
