//! Integration tests for SQLite storage layer
//!
//! Tests snapshot persistence and keyword search using in-memory and
//! file-backed SQLite databases.

use tempfile::tempdir;

use hypotree::config::DatabaseConfig;
use hypotree::engine::Session;
use hypotree::queue::{Action, WorkItem, WorkQueue};
use hypotree::storage::{SessionSnapshot, SqliteStorage, Storage};
use hypotree::tree::{HypothesisNode, HypothesisTree, NodeId};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn id(raw: &str) -> NodeId {
    NodeId::parse(raw).unwrap()
}

fn snapshot(session_id: &str, nodes: &[&str]) -> SessionSnapshot {
    let tree = HypothesisTree::from_nodes(
        nodes
            .iter()
            .map(|raw| HypothesisNode::new(id(raw), format!("Hypothesis {}", raw), "because"))
            .collect(),
    );
    SessionSnapshot {
        session_id: session_id.to_string(),
        problem_statement: "Why did profits fall?".to_string(),
        tree,
        queue: WorkQueue::singleton(WorkItem::new(id("1"), Action::Breakdown)),
        analyses: Vec::new(),
        log: vec!["Problem statement defined: Why did profits fall?".to_string()],
        last_completed_item_id: None,
        completion_passes: 0,
        finished: false,
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let storage = create_test_storage().await;
        let saved = snapshot("s-1", &["1", "1.1", "2"]);

        storage.save_tree(&saved).await.unwrap();
        let loaded = storage.load_tree("s-1").await.unwrap();

        assert_eq!(loaded, Some(saved));
    }

    #[tokio::test]
    async fn test_load_missing_session() {
        let storage = create_test_storage().await;
        assert!(storage.load_tree("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let storage = create_test_storage().await;

        storage.save_tree(&snapshot("s-1", &["1", "1.1", "1.2"])).await.unwrap();
        let mut smaller = snapshot("s-1", &["1"]);
        smaller.finished = true;
        storage.save_tree(&smaller).await.unwrap();

        let loaded = storage.load_tree("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.tree.len(), 1);
        assert!(loaded.finished);
        assert_eq!(storage.list_sessions().await.unwrap(), vec!["s-1"]);
    }

    #[tokio::test]
    async fn test_snapshot_restores_session() {
        let storage = create_test_storage().await;
        storage.save_tree(&snapshot("s-9", &["1", "1.1"])).await.unwrap();

        let loaded = storage.load_tree("s-9").await.unwrap().unwrap();
        let session = Session::from(loaded);

        assert_eq!(session.id.as_deref(), Some("s-9"));
        assert_eq!(session.queue.len(), 1);
        assert_eq!(session.tree.get(&id("1")).unwrap().children_ids, vec![id("1.1")]);
        assert!(session.tree.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("hypotree.db"),
            max_connections: 1,
        };

        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.save_tree(&snapshot("s-1", &["1", "2"])).await.unwrap();
            storage.add_learning("Freight costs doubled").await.unwrap();
            storage.pool().close().await;
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let loaded = reopened.load_tree("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.tree.len(), 2);
        assert_eq!(
            reopened.search_learnings("freight", 5).await.unwrap(),
            vec!["Freight costs doubled"]
        );
    }
}

#[cfg(test)]
mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_learnings_ranks_by_overlap() {
        let storage = create_test_storage().await;
        storage
            .add_learning("USER CORRECTION for Hypothesis 'Costs rose': check freight costs")
            .await
            .unwrap();
        storage.add_learning("Marketing spend was flat").await.unwrap();
        storage.add_learning("Freight contracts renewed in May").await.unwrap();

        let hits = storage
            .search_learnings("rising freight costs", 5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].contains("check freight costs"));
        assert_eq!(hits[1], "Freight contracts renewed in May");
    }

    #[tokio::test]
    async fn test_search_learnings_respects_limit_and_misses() {
        let storage = create_test_storage().await;
        for i in 0..4 {
            storage
                .add_learning(&format!("Pricing note number {}", i))
                .await
                .unwrap();
        }

        assert_eq!(storage.search_learnings("pricing", 2).await.unwrap().len(), 2);
        assert!(storage.search_learnings("weather", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_documents_are_scoped_to_session() {
        let storage = create_test_storage().await;
        storage
            .add_document("s-1", "q3.txt", "Q3 logistics costs up 20 percent")
            .await
            .unwrap();
        storage
            .add_document("s-2", "other.txt", "logistics overview")
            .await
            .unwrap();

        let hits = storage.search_documents("s-1", "logistics costs", 3).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "q3.txt");
        assert!(storage
            .search_documents("s-3", "logistics", 3)
            .await
            .unwrap()
            .is_empty());
    }
}
