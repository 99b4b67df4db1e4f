//! Storage layer for session persistence and retrieval context.
//!
//! Sessions are stored as full snapshots keyed by session id. Learnings and
//! uploaded documents back the memory and document lookups used while
//! generating.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{AppResult, StorageResult};
use crate::generation::{ContextRetrieval, DocumentChunk};
use crate::queue::WorkQueue;
use crate::tree::{Analysis, HypothesisTree, NodeId};

/// Number of hits pulled into a generation context per lookup.
pub const CONTEXT_HITS: usize = 3;

/// Persisted state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub problem_statement: String,
    pub tree: HypothesisTree,
    pub queue: WorkQueue,
    #[serde(default)]
    pub analyses: Vec<Analysis>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub last_completed_item_id: Option<NodeId>,
    #[serde(default)]
    pub completion_passes: usize,
    #[serde(default)]
    pub finished: bool,
}

/// Persistence backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or fully replace the snapshot for its session id.
    async fn save_tree(&self, snapshot: &SessionSnapshot) -> StorageResult<()>;
    /// Load the latest snapshot of a session.
    async fn load_tree(&self, session_id: &str) -> StorageResult<Option<SessionSnapshot>>;
    /// Ids of stored sessions, most recently updated first.
    async fn list_sessions(&self) -> StorageResult<Vec<String>>;

    /// Store a learning for later memory searches.
    async fn add_learning(&self, content: &str) -> StorageResult<()>;
    /// Learnings ranked by keyword overlap with `query`.
    async fn search_learnings(&self, query: &str, limit: usize) -> StorageResult<Vec<String>>;

    /// Attach a document to a session.
    async fn add_document(
        &self,
        session_id: &str,
        filename: &str,
        content: &str,
    ) -> StorageResult<()>;
    /// Session documents ranked by keyword overlap with `query`.
    async fn search_documents(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> StorageResult<Vec<DocumentChunk>>;
}

/// Lowercase keywords of `text` worth matching on.
pub(crate) fn keywords(text: &str) -> Vec<String> {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
        .collect();
    words.sort();
    words.dedup();
    words
}

/// Number of `keywords` appearing in `text`.
pub(crate) fn score(text: &str, keywords: &[String]) -> usize {
    let lowered = text.to_lowercase();
    keywords.iter().filter(|k| lowered.contains(k.as_str())).count()
}

/// [`ContextRetrieval`] over a [`Storage`]: memory searches learnings and
/// document searches read uploaded text. There is no web backend.
#[derive(Clone)]
pub struct StorageContext {
    storage: Arc<dyn Storage>,
}

impl StorageContext {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ContextRetrieval for StorageContext {
    async fn search_memory(&self, query: &str) -> String {
        match self.storage.search_learnings(query, CONTEXT_HITS).await {
            Ok(hits) => hits
                .iter()
                .map(|h| format!("[Memory] {}", h))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(error = %e, "Memory search failed");
                String::new()
            }
        }
    }

    async fn search_web(&self, _query: &str) -> String {
        String::new()
    }

    async fn search_documents(&self, session_id: &str, query: &str) -> Vec<DocumentChunk> {
        self.storage
            .search_documents(session_id, query, CONTEXT_HITS)
            .await
            .unwrap_or_else(|e| {
                warn!(session_id = %session_id, error = %e, "Document search failed");
                Vec::new()
            })
    }

    async fn record_learning(&self, learning: &str) -> AppResult<()> {
        self.storage.add_learning(learning).await?;
        Ok(())
    }
}
