//! Ordered queue of pending work items.
//!
//! The queue only orders items; keeping at most one pending item per node id
//! is the router's job, since legitimate flows remove and re-add the same id.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::tree::NodeId;

/// Kind of step to run for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Generate the root hypotheses for the problem statement.
    Formulate,
    /// Decompose a node into children.
    Breakdown,
    /// Decide whether a node is a leaf or a branch.
    Classify,
    /// Identify the analysis and data source for a leaf.
    Analyze,
}

impl Action {
    /// Get the action name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Formulate => "formulate",
            Action::Breakdown => "breakdown",
            Action::Classify => "classify",
            Action::Analyze => "analyze",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "formulate" => Ok(Action::Formulate),
            "breakdown" => Ok(Action::Breakdown),
            "classify" => Ok(Action::Classify),
            "analyze" => Ok(Action::Analyze),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

/// A queued `(node id, action)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: NodeId,
    pub action: Action,
}

impl WorkItem {
    pub fn new(id: NodeId, action: Action) -> Self {
        Self { id, action }
    }

    /// The item that starts a fresh session.
    pub fn formulate() -> Self {
        Self::new(NodeId::root_sentinel(), Action::Formulate)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.action)
    }
}

/// Ordered sequence of pending work items; the front is processed next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue holding exactly one item.
    pub fn singleton(item: WorkItem) -> Self {
        Self {
            items: VecDeque::from([item]),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn front(&self) -> Option<&WorkItem> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    /// Append items behind the existing queue (breadth-first).
    pub fn enqueue_back(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        self.items.extend(items);
    }

    /// Prepend items ahead of the existing queue, keeping their order (depth-first).
    pub fn enqueue_front(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        let incoming: Vec<WorkItem> = items.into_iter().collect();
        for item in incoming.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    pub fn dequeue_front(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn contains_id(&self, id: &NodeId) -> bool {
        self.items.iter().any(|item| &item.id == id)
    }

    /// Drop every item referencing `id`; returns how many were removed.
    pub fn remove_id(&mut self, id: &NodeId) -> usize {
        let before = self.items.len();
        self.items.retain(|item| &item.id != id);
        before - self.items.len()
    }

    /// Drop every item matching the predicate; returns how many were removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&WorkItem) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !predicate(item));
        before - self.items.len()
    }

    /// Move the item at `index` to the front. Returns false if out of range.
    pub fn promote(&mut self, index: usize) -> bool {
        match self.items.remove(index) {
            Some(item) => {
                self.items.push_front(item);
                true
            }
            None => false,
        }
    }
}

impl FromIterator<WorkItem> for WorkQueue {
    fn from_iter<T: IntoIterator<Item = WorkItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, action: Action) -> WorkItem {
        WorkItem::new(NodeId::parse(id).unwrap(), action)
    }

    fn order(queue: &WorkQueue) -> Vec<String> {
        queue.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_action_round_trip_names() {
        for action in [
            Action::Formulate,
            Action::Breakdown,
            Action::Classify,
            Action::Analyze,
        ] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("prune".parse::<Action>().is_err());
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&item("1.2", Action::Breakdown)).unwrap();
        assert_eq!(json, r#"{"id":"1.2","action":"breakdown"}"#);
    }

    #[test]
    fn test_enqueue_back_is_fifo() {
        let mut queue = WorkQueue::singleton(item("1", Action::Breakdown));
        queue.enqueue_back([item("2", Action::Breakdown), item("3", Action::Classify)]);
        assert_eq!(order(&queue), vec!["1:breakdown", "2:breakdown", "3:classify"]);
    }

    #[test]
    fn test_enqueue_front_keeps_batch_order() {
        let mut queue = WorkQueue::singleton(item("2", Action::Breakdown));
        queue.enqueue_front([item("1.1", Action::Classify), item("1.2", Action::Classify)]);
        assert_eq!(order(&queue), vec!["1.1:classify", "1.2:classify", "2:breakdown"]);
    }

    #[test]
    fn test_dequeue_front_on_empty() {
        let mut queue = WorkQueue::new();
        assert!(queue.dequeue_front().is_none());
    }

    #[test]
    fn test_contains_and_remove_id() {
        let mut queue: WorkQueue = [item("1", Action::Breakdown), item("2", Action::Classify)]
            .into_iter()
            .collect();
        assert!(queue.contains_id(&NodeId::parse("2").unwrap()));
        assert_eq!(queue.remove_id(&NodeId::parse("2").unwrap()), 1);
        assert!(!queue.contains_id(&NodeId::parse("2").unwrap()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_promote_reorders() {
        let mut queue: WorkQueue = [
            item("1", Action::Breakdown),
            item("2", Action::Breakdown),
            item("3", Action::Breakdown),
        ]
        .into_iter()
        .collect();

        assert!(queue.promote(2));
        assert_eq!(order(&queue), vec!["3:breakdown", "1:breakdown", "2:breakdown"]);
        assert!(!queue.promote(5));
    }
}
