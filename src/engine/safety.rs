//! Completion safety net.
//!
//! When the queue drains, any node that is neither a leaf nor decomposed nor
//! pending is an orphan: work was dropped for it somewhere. The scan is pure;
//! the engine decides whether to queue the repairs or force the orphans to
//! leaves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::router::DepthPolicy;
use crate::queue::{Action, WorkItem, WorkQueue};
use crate::tree::HypothesisTree;

/// Repair action queued for an orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    /// Always queue a breakdown.
    #[default]
    Breakdown,
    /// Queue whatever a freshly created node at that depth would get.
    ByDepth,
}

impl fmt::Display for OrphanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanAction::Breakdown => write!(f, "breakdown"),
            OrphanAction::ByDepth => write!(f, "by_depth"),
        }
    }
}

impl FromStr for OrphanAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakdown" => Ok(OrphanAction::Breakdown),
            "by_depth" | "by-depth" => Ok(OrphanAction::ByDepth),
            _ => Err(format!("Unknown orphan action: {}", s)),
        }
    }
}

/// Repair items for every orphan in the tree, in creation order.
///
/// A node is an orphan when it is not a leaf, has no children, and has no
/// pending item. Items already in `queue` suppress their node, so queuing the
/// result and scanning again yields nothing.
pub fn find_orphans(
    tree: &HypothesisTree,
    queue: &WorkQueue,
    action: OrphanAction,
    policy: &DepthPolicy,
) -> Vec<WorkItem> {
    tree.nodes()
        .iter()
        .filter(|n| !n.is_leaf)
        .filter(|n| tree.children_of(&n.id).is_empty())
        .filter(|n| !queue.contains_id(&n.id))
        .map(|n| {
            let repair = match action {
                OrphanAction::Breakdown => Action::Breakdown,
                OrphanAction::ByDepth => policy
                    .action_for_new_node(n.depth())
                    .unwrap_or(Action::Breakdown),
            };
            WorkItem::new(n.id.clone(), repair)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{id, node, sample_tree};
    use pretty_assertions::assert_eq;

    fn rendered(items: &[WorkItem]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_complete_tree_has_no_orphans() {
        let orphans = find_orphans(
            &sample_tree(),
            &WorkQueue::new(),
            OrphanAction::Breakdown,
            &DepthPolicy::default(),
        );
        assert!(orphans.is_empty());
    }

    #[test]
    fn test_undecided_nodes_are_orphans() {
        let mut tree = sample_tree();
        tree.upsert(node("2"));
        tree.upsert(node("1.3"));
        tree.rebuild_children_index();

        let orphans = find_orphans(
            &tree,
            &WorkQueue::new(),
            OrphanAction::Breakdown,
            &DepthPolicy::default(),
        );
        assert_eq!(rendered(&orphans), vec!["2:breakdown", "1.3:breakdown"]);

        let by_depth = find_orphans(
            &tree,
            &WorkQueue::new(),
            OrphanAction::ByDepth,
            &DepthPolicy::default(),
        );
        assert_eq!(rendered(&by_depth), vec!["2:breakdown", "1.3:classify"]);
    }

    #[test]
    fn test_pending_nodes_are_not_orphans() {
        let mut tree = sample_tree();
        tree.upsert(node("2"));
        let queue = WorkQueue::singleton(WorkItem::new(id("2"), Action::Classify));

        let orphans = find_orphans(&tree, &queue, OrphanAction::Breakdown, &DepthPolicy::default());
        assert!(orphans.is_empty());
    }

    #[test]
    fn test_scan_is_idempotent_once_queued() {
        let mut tree = sample_tree();
        tree.upsert(node("2"));
        tree.upsert(node("3"));
        let mut queue = WorkQueue::new();

        let first = find_orphans(&tree, &queue, OrphanAction::Breakdown, &DepthPolicy::default());
        assert_eq!(first.len(), 2);
        queue.enqueue_back(first);

        let second = find_orphans(&tree, &queue, OrphanAction::Breakdown, &DepthPolicy::default());
        assert!(second.is_empty());
    }

    #[test]
    fn test_orphan_action_parse() {
        assert_eq!("by_depth".parse::<OrphanAction>().unwrap(), OrphanAction::ByDepth);
        assert_eq!("Breakdown".parse::<OrphanAction>().unwrap(), OrphanAction::Breakdown);
        assert!("ignore".parse::<OrphanAction>().is_err());
    }
}
