//! Collaborator contracts consumed by the engine.
//!
//! - [`GenerationService`]: turns text into typed hypotheses, classifications
//!   and analyses. Results are decoded once at this boundary.
//! - [`ContextRetrieval`]: read-only memory, web and document lookups used as
//!   generation input, plus the learning sink fed by review corrections.
//!
//! [`LangbaseGenerator`] is the production generation adapter.

mod context;
mod langbase;

pub use context::{gather_context, GatheredContext, NoContext, TOOL_DOCUMENTS, TOOL_MEMORY, TOOL_WEB};
pub use langbase::{extract_json_from_completion, LangbaseGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, GenerationResult};

/// A generated hypothesis before it is placed in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub text: String,
    #[serde(default)]
    pub reasoning: String,
}

impl Proposal {
    pub fn new(text: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: reasoning.into(),
        }
    }
}

/// Result of decomposing a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub sub_hypotheses: Vec<Proposal>,
    #[serde(default)]
    pub reasoning: String,
}

/// Leaf/branch verdict for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Specific enough to be tested directly.
    Leaf,
    /// Needs further decomposition.
    Branch,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Leaf => write!(f, "leaf"),
            Classification::Branch => write!(f, "branch"),
        }
    }
}

/// Result of classifying a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOutcome {
    pub classification: Classification,
    #[serde(default)]
    pub reasoning: String,
}

/// Analysis required to test a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub analysis_required: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Data source for an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePlan {
    pub source: String,
    #[serde(default)]
    pub reasoning: String,
}

/// A matching chunk of an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub filename: String,
    pub content: String,
}

/// Reasoning service producing structured generation results.
///
/// A malformed or unparseable completion must surface as a
/// [`crate::error::GenerationError`], never as a partially filled result.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Propose root hypotheses for a problem statement.
    async fn formulate(&self, problem: &str, context: &str) -> GenerationResult<Vec<Proposal>>;

    /// Decompose a hypothesis into sub-hypotheses.
    async fn decompose(&self, node_text: &str, context: &str) -> GenerationResult<Decomposition>;

    /// Classify a hypothesis as leaf or branch.
    async fn classify(&self, node_text: &str, context: &str) -> GenerationResult<ClassifyOutcome>;

    /// Identify the analysis that would test a leaf hypothesis.
    async fn identify_analysis(
        &self,
        node_text: &str,
        context: &str,
    ) -> GenerationResult<AnalysisPlan>;

    /// Identify the data source for an analysis.
    async fn identify_source(&self, analysis: &str, context: &str) -> GenerationResult<SourcePlan>;
}

/// Read-only context lookups. Implementations absorb their own failures and
/// return empty results instead.
#[async_trait]
pub trait ContextRetrieval: Send + Sync {
    /// Search accumulated learnings.
    async fn search_memory(&self, query: &str) -> String;

    /// Search the web.
    async fn search_web(&self, query: &str) -> String;

    /// Search documents uploaded for a session.
    async fn search_documents(&self, session_id: &str, query: &str) -> Vec<DocumentChunk>;

    /// Persist a learning (e.g. a reviewer's correction) for later memory searches.
    async fn record_learning(&self, learning: &str) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decomposition_reasoning_defaults() {
        let json = r#"{"sub_hypotheses": [{"text": "A"}]}"#;
        let d: Decomposition = serde_json::from_str(json).unwrap();
        assert_eq!(d.sub_hypotheses, vec![Proposal::new("A", "")]);
        assert!(d.reasoning.is_empty());
    }

    #[test]
    fn test_classification_rejects_unknown_verdict() {
        let json = r#"{"classification": "maybe", "reasoning": "?"}"#;
        assert!(serde_json::from_str::<ClassifyOutcome>(json).is_err());
    }

    #[test]
    fn test_classification_lowercase() {
        let c: ClassifyOutcome =
            serde_json::from_str(r#"{"classification": "branch"}"#).unwrap();
        assert_eq!(c.classification, Classification::Branch);
        assert_eq!(c.classification.to_string(), "branch");
    }
}
