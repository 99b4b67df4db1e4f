//! Action router: decides what a dequeued item does and applies step results.
//!
//! [`Router::route`] is evaluated against the tree before any generation call;
//! the `apply_*` methods fold a typed result back into the session. All of
//! them are synchronous and leave the tree and queue consistent.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::Session;
use crate::config::EngineConfig;
use crate::error::GenerationResult;
use crate::generation::{AnalysisPlan, Classification, ClassifyOutcome, Decomposition, Proposal, SourcePlan};
use crate::queue::{Action, WorkItem};
use crate::tree::{Analysis, HypothesisNode, NodeId};

/// Placeholder source recorded when source identification fails.
pub const MISSING_SOURCE: &str = "Error: No source identified";

/// Depth-based generation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthPolicy {
    /// Nodes at or beyond this depth are leaves.
    pub max_depth: usize,
    /// Children at or above this depth are queued for breakdown.
    pub breakdown_depth: usize,
}

impl DepthPolicy {
    pub fn new(max_depth: usize, breakdown_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            breakdown_depth,
        }
    }

    /// Whether a node at `depth` must be terminated as a leaf.
    pub fn forces_leaf(&self, depth: usize) -> bool {
        depth >= self.max_depth
    }

    /// Action to queue for a freshly created node at `depth`, or `None` if it is born a leaf.
    pub fn action_for_new_node(&self, depth: usize) -> Option<Action> {
        if self.forces_leaf(depth) {
            None
        } else if depth <= self.breakdown_depth {
            Some(Action::Breakdown)
        } else {
            Some(Action::Classify)
        }
    }
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self::new(3, 1)
    }
}

/// What to do with a dequeued work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Generate the root hypotheses.
    Formulate,
    /// Decompose the node.
    Breakdown(NodeId),
    /// Classify the node.
    Classify(NodeId),
    /// Identify analysis and source for the leaf.
    Analyze(NodeId),
    /// Node is at or past max depth: make it a leaf without generating.
    ForceLeaf(NodeId),
    /// Classify on a node that already has children: keep it a branch.
    OverrideBranch(NodeId),
    /// Drop the item without mutating the tree.
    Skip { id: NodeId, reason: &'static str },
    /// The item references a node absent from the tree.
    Missing(NodeId),
}

/// State machine over work items, configured by the depth policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Router {
    policy: DepthPolicy,
    analyze_leaves: bool,
}

impl Router {
    pub fn new(policy: DepthPolicy, analyze_leaves: bool) -> Self {
        Self {
            policy,
            analyze_leaves,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            DepthPolicy::new(config.max_depth, config.breakdown_depth),
            config.analyze_leaves,
        )
    }

    pub fn policy(&self) -> &DepthPolicy {
        &self.policy
    }

    /// Decide what the item at the queue head should do.
    pub fn route(&self, item: &WorkItem, session: &Session) -> Route {
        if item.action == Action::Formulate {
            return if session.tree.roots().next().is_some() {
                Route::Skip {
                    id: item.id.clone(),
                    reason: "roots already formulated",
                }
            } else {
                Route::Formulate
            };
        }

        let node = match session.tree.get(&item.id) {
            Ok(node) => node,
            Err(_) => return Route::Missing(item.id.clone()),
        };
        let id = node.id.clone();
        let has_children = !session.tree.children_of(&id).is_empty();

        match item.action {
            Action::Breakdown if has_children => Route::Skip {
                id,
                reason: "already decomposed",
            },
            Action::Breakdown | Action::Classify if node.is_leaf && !has_children => Route::Skip {
                id,
                reason: "already a leaf",
            },
            Action::Classify if has_children => Route::OverrideBranch(id),
            Action::Breakdown | Action::Classify if self.policy.forces_leaf(node.depth()) => {
                Route::ForceLeaf(id)
            }
            Action::Breakdown => Route::Breakdown(id),
            Action::Classify => Route::Classify(id),
            Action::Analyze if !node.is_leaf => Route::Skip {
                id,
                reason: "analysis requested for a non-leaf",
            },
            Action::Analyze => Route::Analyze(id),
            Action::Formulate => unreachable!("formulate handled above"),
        }
    }

    /// Create root nodes from the formulate result and queue them.
    pub fn apply_formulate(
        &self,
        session: &mut Session,
        result: GenerationResult<Vec<Proposal>>,
        tools: &BTreeSet<String>,
    ) {
        let proposals = match result {
            Ok(p) if !p.is_empty() => p,
            Ok(_) => {
                session.record("Error formulating top hypotheses: no hypotheses returned".to_string());
                return;
            }
            Err(e) => {
                session.record(format!("Error formulating top hypotheses: {}", e));
                return;
            }
        };

        let offset = session.tree.roots().count();
        let mut items = Vec::new();
        for (i, proposal) in proposals.into_iter().enumerate() {
            let id = NodeId::root(offset + i + 1);
            let mut node = HypothesisNode::new(id.clone(), proposal.text, proposal.reasoning)
                .with_tools(tools.iter().cloned());
            let action = self.policy.action_for_new_node(node.depth());
            node.is_leaf = action.is_none();

            session.record(format!(
                "Formulated top hypothesis ({}): '{}'. Reasoning: {}",
                id, node.text, node.reasoning
            ));
            session.tree.upsert(node);
            items.extend(self.follow_up(&id, action));
        }

        info!(roots = session.tree.len(), "Formulated root hypotheses");
        session.queue.enqueue_back(items);
    }

    /// Attach children from a decomposition, or terminate the node on failure.
    pub fn apply_breakdown(
        &self,
        session: &mut Session,
        id: &NodeId,
        result: GenerationResult<Decomposition>,
        tools: &BTreeSet<String>,
    ) {
        let decomposition = match result {
            Ok(d) if !d.sub_hypotheses.is_empty() => d,
            Ok(_) => {
                self.terminate(session, id, false);
                session.record(format!(
                    "Breakdown of ({}) returned no sub-hypotheses. Marked as leaf.",
                    id
                ));
                return;
            }
            Err(e) => {
                warn!(node_id = %id, error = %e, "Breakdown failed; terminating node");
                self.terminate(session, id, false);
                session.record(format!(
                    "Error breaking down hypothesis {}: {}. Marked as leaf.",
                    id, e
                ));
                return;
            }
        };

        let parent_text = session
            .tree
            .get(id)
            .map(|n| n.text.clone())
            .unwrap_or_default();
        let mut entry = format!(
            "Broke down hypothesis ({}) '{}'. Reasoning: {}",
            id, parent_text, decomposition.reasoning
        );

        let mut items = Vec::new();
        for (i, sub) in decomposition.sub_hypotheses.into_iter().enumerate() {
            let child_id = id.child(i + 1);
            let reasoning = if sub.reasoning.trim().is_empty() {
                decomposition.reasoning.clone()
            } else {
                sub.reasoning
            };
            let mut child = HypothesisNode::new(child_id.clone(), sub.text, reasoning)
                .with_tools(tools.iter().cloned());
            let action = self.policy.action_for_new_node(child.depth());
            child.is_leaf = action.is_none();

            entry.push_str(&format!("\n  - Created ({}): '{}'", child_id, child.text));
            if child.is_leaf {
                entry.push_str(" (LEAF, max depth)");
            }

            session.tree.upsert(child);
            items.extend(self.follow_up(&child_id, action));
        }
        session.tree.refresh_children(id);

        debug!(node_id = %id, queued = items.len(), "Children created");
        session.queue.enqueue_front(items);
        session.record(entry);
    }

    /// Fold a leaf/branch verdict into the node. Failures drop the action.
    pub fn apply_classify(
        &self,
        session: &mut Session,
        id: &NodeId,
        result: GenerationResult<ClassifyOutcome>,
        tools: &BTreeSet<String>,
    ) {
        let outcome = match result {
            Ok(o) => o,
            Err(e) => {
                warn!(node_id = %id, error = %e, "Classification failed; dropping action");
                session.record(format!("Error classifying hypothesis {}: {}", id, e));
                return;
            }
        };

        let text = match session.tree.get_mut(id) {
            Ok(node) => {
                node.is_leaf = outcome.classification == Classification::Leaf;
                node.tools_used.extend(tools.iter().cloned());
                node.text.clone()
            }
            Err(e) => {
                session.record(format!("Error classifying hypothesis {}: {}", id, e));
                return;
            }
        };

        session.record(format!(
            "Classified hypothesis ({}) '{}' as '{}'. Reasoning: {}",
            id, text, outcome.classification, outcome.reasoning
        ));

        match outcome.classification {
            Classification::Leaf => {
                session.queue.remove_where(|item| {
                    &item.id == id && matches!(item.action, Action::Breakdown | Action::Classify)
                });
                if self.analyze_leaves {
                    self.enqueue_exclusive(session, id, Action::Analyze);
                }
            }
            Classification::Branch => self.enqueue_exclusive(session, id, Action::Breakdown),
        }
    }

    /// Terminate a node that reached max depth without calling generation.
    pub fn apply_force_leaf(&self, session: &mut Session, id: &NodeId) {
        self.terminate(session, id, true);
        session.record(format!(
            "Hypothesis ({}) reached max depth {}. Marked as leaf.",
            id, self.policy.max_depth
        ));
    }

    /// Keep a decomposed node a branch even though classify was requested.
    pub fn apply_override_branch(&self, session: &mut Session, id: &NodeId) {
        if let Ok(node) = session.tree.get_mut(id) {
            node.is_leaf = false;
        }
        warn!(node_id = %id, "Classify requested for a decomposed node; forcing branch");
        session.record(format!(
            "Hypothesis ({}) already has children; classification overridden to 'branch'.",
            id
        ));
    }

    /// Record the analysis for a leaf, replacing any earlier record.
    pub fn apply_analysis(
        &self,
        session: &mut Session,
        id: &NodeId,
        analysis: GenerationResult<AnalysisPlan>,
        source: Option<GenerationResult<SourcePlan>>,
    ) {
        let plan = match analysis {
            Ok(plan) => plan,
            Err(e) => {
                session.record(format!("Error identifying analysis for {}: {}", id, e));
                return;
            }
        };

        let mut entry = format!(
            "Identified analysis for leaf ({}): '{}'. Reasoning: {}",
            id, plan.analysis_required, plan.reasoning
        );

        let (source_of_reference, source_reasoning) = match source {
            Some(Ok(s)) => {
                entry.push_str(&format!(
                    "\n  - Identified source for analysis: '{}'. Reasoning: {}",
                    s.source, s.reasoning
                ));
                (s.source, s.reasoning)
            }
            Some(Err(e)) => {
                entry.push_str(&format!("\n  - Error identifying source: {}", e));
                (MISSING_SOURCE.to_string(), e.to_string())
            }
            None => (MISSING_SOURCE.to_string(), String::new()),
        };

        session.analyses.retain(|a| &a.hypothesis_id != id);
        session.analyses.push(Analysis {
            hypothesis_id: id.clone(),
            analysis_required: plan.analysis_required,
            analysis_reasoning: plan.reasoning,
            source_of_reference,
            source_reasoning,
        });
        session.record(entry);
    }

    /// Mark a node as a leaf and drop its pending generation items.
    pub(crate) fn terminate(&self, session: &mut Session, id: &NodeId, analyze: bool) {
        if let Ok(node) = session.tree.get_mut(id) {
            node.is_leaf = true;
        }
        session.queue.remove_where(|item| {
            &item.id == id && matches!(item.action, Action::Breakdown | Action::Classify)
        });
        if analyze && self.analyze_leaves {
            self.enqueue_exclusive(session, id, Action::Analyze);
        }
    }

    fn follow_up(&self, id: &NodeId, action: Option<Action>) -> Vec<WorkItem> {
        match action {
            Some(action) => vec![WorkItem::new(id.clone(), action)],
            None if self.analyze_leaves => vec![WorkItem::new(id.clone(), Action::Analyze)],
            None => Vec::new(),
        }
    }

    /// Append an item, replacing whatever was pending for the same node.
    fn enqueue_exclusive(&self, session: &mut Session, id: &NodeId, action: Action) {
        session.queue.remove_id(id);
        session
            .queue
            .enqueue_back([WorkItem::new(id.clone(), action)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::queue::WorkQueue;
    use crate::tree::tests::{id, node};
    use crate::tree::HypothesisTree;
    use pretty_assertions::assert_eq;

    fn router() -> Router {
        Router::new(DepthPolicy::default(), false)
    }

    fn session_with(nodes: Vec<HypothesisNode>) -> Session {
        let mut s = Session::new("Profits fell");
        s.tree = HypothesisTree::from_nodes(nodes);
        s.queue = WorkQueue::new();
        s
    }

    fn item(raw: &str, action: Action) -> WorkItem {
        WorkItem::new(id(raw), action)
    }

    fn queued(session: &Session) -> Vec<String> {
        session.queue.iter().map(|i| i.to_string()).collect()
    }

    fn decomposition(n: usize) -> Decomposition {
        Decomposition {
            sub_hypotheses: (1..=n)
                .map(|i| Proposal::new(format!("Sub {}", i), format!("Why {}", i)))
                .collect(),
            reasoning: "split by driver".to_string(),
        }
    }

    fn failure() -> GenerationError {
        GenerationError::Malformed {
            message: "no json".to_string(),
        }
    }

    #[test]
    fn test_depth_policy_defaults() {
        let p = DepthPolicy::default();
        assert_eq!(p.action_for_new_node(1), Some(Action::Breakdown));
        assert_eq!(p.action_for_new_node(2), Some(Action::Classify));
        assert_eq!(p.action_for_new_node(3), None);
        assert!(p.forces_leaf(4));
        assert!(!p.forces_leaf(2));
    }

    #[test]
    fn test_route_formulate_once() {
        let r = router();
        let fresh = Session::new("p");
        assert_eq!(r.route(&WorkItem::formulate(), &fresh), Route::Formulate);

        let seeded = session_with(vec![node("1")]);
        assert!(matches!(
            r.route(&WorkItem::formulate(), &seeded),
            Route::Skip { .. }
        ));
    }

    #[test]
    fn test_route_missing_node() {
        let s = session_with(vec![node("1")]);
        assert_eq!(
            router().route(&item("7", Action::Breakdown), &s),
            Route::Missing(id("7"))
        );
    }

    #[test]
    fn test_route_guards() {
        let s = session_with(vec![
            node("1"),
            node("1.1"),
            node("1.2").as_leaf(),
            node("1.1.1"),
        ]);
        let r = router();

        assert!(matches!(
            r.route(&item("1", Action::Breakdown), &s),
            Route::Skip { reason: "already decomposed", .. }
        ));
        assert_eq!(r.route(&item("1", Action::Classify), &s), Route::OverrideBranch(id("1")));
        assert!(matches!(
            r.route(&item("1.2", Action::Classify), &s),
            Route::Skip { reason: "already a leaf", .. }
        ));
        assert_eq!(r.route(&item("1.1.1", Action::Breakdown), &s), Route::ForceLeaf(id("1.1.1")));
        assert_eq!(r.route(&item("1.1.1", Action::Classify), &s), Route::ForceLeaf(id("1.1.1")));
        assert_eq!(r.route(&item("1.2", Action::Analyze), &s), Route::Analyze(id("1.2")));
        assert!(matches!(
            r.route(&item("1.1", Action::Analyze), &s),
            Route::Skip { .. }
        ));
    }

    #[test]
    fn test_apply_formulate_creates_roots_and_breakdowns() {
        let mut s = Session::new("p");
        s.queue = WorkQueue::new();
        let tools: BTreeSet<String> = ["memory".to_string()].into_iter().collect();

        router().apply_formulate(
            &mut s,
            Ok(vec![Proposal::new("A", "ra"), Proposal::new("B", "rb")]),
            &tools,
        );

        assert_eq!(s.tree.len(), 2);
        assert!(s.tree.get(&id("2")).unwrap().tools_used.contains("memory"));
        assert_eq!(queued(&s), vec!["1:breakdown", "2:breakdown"]);
        assert!(s.tree.check_invariants().is_ok());
    }

    #[test]
    fn test_apply_formulate_failure_leaves_tree_empty() {
        let mut s = Session::new("p");
        s.queue = WorkQueue::new();
        router().apply_formulate(&mut s, Err(failure()), &BTreeSet::new());
        assert!(s.tree.is_empty());
        assert!(s.queue.is_empty());
        assert!(s.log.last().unwrap().starts_with("Error formulating"));
    }

    #[test]
    fn test_apply_breakdown_prepends_children() {
        let mut s = session_with(vec![node("1"), node("2")]);
        s.queue.enqueue_back([item("2", Action::Breakdown)]);

        router().apply_breakdown(&mut s, &id("1"), Ok(decomposition(2)), &BTreeSet::new());

        assert_eq!(queued(&s), vec!["1.1:classify", "1.2:classify", "2:breakdown"]);
        assert_eq!(s.tree.get(&id("1")).unwrap().children_ids, vec![id("1.1"), id("1.2")]);
        assert_eq!(s.tree.get(&id("1.2")).unwrap().reasoning, "Why 2");
        assert!(s.tree.check_invariants().is_ok());
    }

    #[test]
    fn test_apply_breakdown_at_max_depth_creates_leaves() {
        let mut s = session_with(vec![node("1"), node("1.1")]);
        router().apply_breakdown(&mut s, &id("1.1"), Ok(decomposition(2)), &BTreeSet::new());

        assert!(s.tree.get(&id("1.1.1")).unwrap().is_leaf);
        assert!(s.tree.get(&id("1.1.2")).unwrap().is_leaf);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn test_apply_breakdown_at_max_depth_queues_analysis_when_enabled() {
        let r = Router::new(DepthPolicy::default(), true);
        let mut s = session_with(vec![node("1"), node("1.1")]);
        r.apply_breakdown(&mut s, &id("1.1"), Ok(decomposition(2)), &BTreeSet::new());
        assert_eq!(queued(&s), vec!["1.1.1:analyze", "1.1.2:analyze"]);
    }

    #[test]
    fn test_apply_breakdown_failure_or_empty_marks_leaf() {
        let mut s = session_with(vec![node("1"), node("2")]);
        router().apply_breakdown(&mut s, &id("1"), Err(failure()), &BTreeSet::new());
        router().apply_breakdown(&mut s, &id("2"), Ok(decomposition(0)), &BTreeSet::new());

        assert!(s.tree.get(&id("1")).unwrap().is_leaf);
        assert!(s.tree.get(&id("2")).unwrap().is_leaf);
        assert_eq!(s.tree.len(), 2);
    }

    #[test]
    fn test_apply_breakdown_uses_shared_reasoning_when_missing() {
        let mut s = session_with(vec![node("1")]);
        let d = Decomposition {
            sub_hypotheses: vec![Proposal::new("only", "")],
            reasoning: "shared".to_string(),
        };
        router().apply_breakdown(&mut s, &id("1"), Ok(d), &BTreeSet::new());
        assert_eq!(s.tree.get(&id("1.1")).unwrap().reasoning, "shared");
    }

    #[test]
    fn test_apply_classify_leaf_and_branch() {
        let mut s = session_with(vec![node("1"), node("1.1"), node("1.2")]);
        let r = router();

        r.apply_classify(
            &mut s,
            &id("1.1"),
            Ok(ClassifyOutcome {
                classification: Classification::Leaf,
                reasoning: "testable".to_string(),
            }),
            &BTreeSet::new(),
        );
        r.apply_classify(
            &mut s,
            &id("1.2"),
            Ok(ClassifyOutcome {
                classification: Classification::Branch,
                reasoning: "broad".to_string(),
            }),
            &BTreeSet::new(),
        );

        assert!(s.tree.get(&id("1.1")).unwrap().is_leaf);
        assert!(!s.tree.get(&id("1.2")).unwrap().is_leaf);
        assert_eq!(queued(&s), vec!["1.2:breakdown"]);
    }

    #[test]
    fn test_apply_classify_failure_drops_action() {
        let mut s = session_with(vec![node("1"), node("1.1")]);
        let before = s.tree.clone();
        router().apply_classify(&mut s, &id("1.1"), Err(failure()), &BTreeSet::new());
        assert_eq!(s.tree, before);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn test_apply_override_branch() {
        let mut s = session_with(vec![node("1").as_leaf(), node("1.1")]);
        router().apply_override_branch(&mut s, &id("1"));
        assert!(!s.tree.get(&id("1")).unwrap().is_leaf);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn test_apply_analysis_replaces_previous_record() {
        let mut s = session_with(vec![node("1").as_leaf()]);
        let r = router();
        let plan = |text: &str| {
            Ok(AnalysisPlan {
                analysis_required: text.to_string(),
                reasoning: "r".to_string(),
            })
        };

        r.apply_analysis(&mut s, &id("1"), plan("first"), Some(Err(failure())));
        assert_eq!(s.analyses[0].source_of_reference, MISSING_SOURCE);

        r.apply_analysis(
            &mut s,
            &id("1"),
            plan("second"),
            Some(Ok(SourcePlan {
                source: "ERP export".to_string(),
                reasoning: "has costs".to_string(),
            })),
        );
        assert_eq!(s.analyses.len(), 1);
        assert_eq!(s.analyses[0].analysis_required, "second");
        assert_eq!(s.analyses[0].source_of_reference, "ERP export");
    }

    #[test]
    fn test_apply_analysis_failure_records_nothing() {
        let mut s = session_with(vec![node("1").as_leaf()]);
        router().apply_analysis(&mut s, &id("1"), Err(failure()), None);
        assert!(s.analyses.is_empty());
    }
}
