//! Restart a run from an edited node.
//!
//! Restart prunes the node's subtree, reinserts the edited node as an
//! undecided non-leaf, and seeds a single-item queue so generation resumes
//! from that node only. Siblings and ancestors are kept verbatim.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::queue::{Action, WorkItem, WorkQueue};
use crate::tree::{HypothesisTree, NodeId};

/// Action queued for the edited node on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartRequeue {
    /// Roots are broken down; deeper nodes are re-classified.
    #[default]
    ByParent,
    /// Always break the edited node down.
    Breakdown,
    /// Always re-classify the edited node.
    Classify,
}

impl RestartRequeue {
    /// Action to queue for `id`.
    pub fn action_for(&self, id: &NodeId) -> Action {
        match self {
            RestartRequeue::ByParent if id.depth() == 1 => Action::Breakdown,
            RestartRequeue::ByParent => Action::Classify,
            RestartRequeue::Breakdown => Action::Breakdown,
            RestartRequeue::Classify => Action::Classify,
        }
    }
}

impl fmt::Display for RestartRequeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartRequeue::ByParent => "by_parent",
            RestartRequeue::Breakdown => "breakdown",
            RestartRequeue::Classify => "classify",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RestartRequeue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "by_parent" | "by-parent" => Ok(RestartRequeue::ByParent),
            "breakdown" => Ok(RestartRequeue::Breakdown),
            "classify" => Ok(RestartRequeue::Classify),
            _ => Err(format!("Unknown restart requeue policy: {}", s)),
        }
    }
}

/// Caller-supplied edits applied to the restart node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeEdit {
    pub text: Option<String>,
    pub reasoning: Option<String>,
}

impl NodeEdit {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.reasoning.is_none()
    }
}

/// Tree and queue to resume from, plus the ids that were pruned.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    pub tree: HypothesisTree,
    pub queue: WorkQueue,
    pub pruned: HashSet<NodeId>,
}

/// Build the resume state for restarting at `restart_id`.
///
/// The snapshot is not modified. Fails with
/// [`EngineError::RestartTargetMissing`] when the node is absent.
pub fn restart_from(
    snapshot: &HypothesisTree,
    restart_id: &NodeId,
    edit: &NodeEdit,
    requeue: RestartRequeue,
) -> EngineResult<RestartPlan> {
    let mut edited = snapshot
        .get(restart_id)
        .map_err(|_| EngineError::RestartTargetMissing {
            id: restart_id.to_string(),
        })?
        .clone();

    let pruned = snapshot.descendants_of(restart_id);

    let mut tree = snapshot.clone();
    tree.remove_all(&pruned);

    if let Some(text) = &edit.text {
        edited.text = text.clone();
    }
    if let Some(reasoning) = &edit.reasoning {
        edited.reasoning = reasoning.clone();
    }
    edited.is_leaf = false;
    edited.children_ids.clear();
    tree.upsert(edited);
    tree.rebuild_children_index();

    let action = requeue.action_for(restart_id);
    info!(
        node_id = %restart_id,
        pruned = pruned.len(),
        action = %action,
        "Restarting from edited node"
    );

    Ok(RestartPlan {
        tree,
        queue: WorkQueue::singleton(WorkItem::new(restart_id.clone(), action)),
        pruned,
    })
}
