use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

use super::{ContextRetrieval, DocumentChunk};
use crate::error::AppResult;

/// `tools_used` name for memory lookups.
pub const TOOL_MEMORY: &str = "memory";
/// `tools_used` name for web searches.
pub const TOOL_WEB: &str = "web_search";
/// `tools_used` name for uploaded-document searches.
pub const TOOL_DOCUMENTS: &str = "documents";

/// Context text assembled for one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatheredContext {
    /// Sectioned context text passed to the generation service.
    pub text: String,
    /// Collaborators that contributed non-empty results.
    pub tools_used: BTreeSet<String>,
}

/// Query every context collaborator and assemble sectioned context text.
///
/// Document search only runs when the run has a session id.
pub async fn gather_context(
    retrieval: &dyn ContextRetrieval,
    session_id: Option<&str>,
    query: &str,
) -> GatheredContext {
    debug!(query = %query.chars().take(50).collect::<String>(), "Gathering context");

    let mut gathered = GatheredContext::default();
    let mut sections = Vec::new();

    let memory = retrieval.search_memory(query).await;
    if !memory.trim().is_empty() {
        gathered.tools_used.insert(TOOL_MEMORY.to_string());
        sections.push(format!("--- Context from Agent Memory ---\n{}", memory.trim()));
    }

    let web = retrieval.search_web(query).await;
    if !web.trim().is_empty() {
        gathered.tools_used.insert(TOOL_WEB.to_string());
        sections.push(format!("--- Context from Web Search ---\n{}", web.trim()));
    }

    if let Some(session_id) = session_id {
        let chunks = retrieval.search_documents(session_id, query).await;
        if !chunks.is_empty() {
            gathered.tools_used.insert(TOOL_DOCUMENTS.to_string());
            let body: Vec<String> = chunks
                .iter()
                .map(|c| format!("[Source: {}]\n{}", c.filename, c.content))
                .collect();
            sections.push(format!(
                "--- Context from Uploaded Documents ---\n{}",
                body.join("\n\n")
            ));
        }
    }

    gathered.text = sections.join("\n\n");
    gathered
}

/// Retrieval that knows nothing and forgets everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait]
impl ContextRetrieval for NoContext {
    async fn search_memory(&self, _query: &str) -> String {
        String::new()
    }

    async fn search_web(&self, _query: &str) -> String {
        String::new()
    }

    async fn search_documents(&self, _session_id: &str, _query: &str) -> Vec<DocumentChunk> {
        Vec::new()
    }

    async fn record_learning(&self, _learning: &str) -> AppResult<()> {
        Ok(())
    }
}
