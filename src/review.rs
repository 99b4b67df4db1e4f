//! Human review gate for reviewed runs.
//!
//! After every step the engine shows the reviewer the node it just completed
//! and lets them accept it or correct it, then asks which queued item should
//! run next.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::queue::WorkQueue;
use crate::tree::{Analysis, HypothesisNode, HypothesisTree};

/// Reviewer verdict on a completed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Accept,
    /// Record `correction` as a learning and optionally edit the node.
    Correct {
        correction: String,
        new_text: Option<String>,
        new_reasoning: Option<String>,
    },
}

/// Reviewer choice of what runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Move the queue item at this index to the front.
    Next(usize),
    /// Stop the run, keeping the queue for later.
    Finish,
}

/// Decision point consulted by [`crate::engine::Engine::run_reviewed`].
#[async_trait]
pub trait ReviewGate: Send + Sync {
    async fn review(&self, node: &HypothesisNode, analysis: Option<&Analysis>) -> ReviewDecision;

    async fn select(&self, queue: &WorkQueue, tree: &HypothesisTree) -> Selection;
}

/// Gate that accepts everything in queue order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ReviewGate for AutoApprove {
    async fn review(&self, _node: &HypothesisNode, _analysis: Option<&Analysis>) -> ReviewDecision {
        ReviewDecision::Accept
    }

    async fn select(&self, _queue: &WorkQueue, _tree: &HypothesisTree) -> Selection {
        Selection::Next(0)
    }
}

/// Line-oriented interactive gate.
///
/// End of input accepts the node and continues in queue order.
pub struct LineReviewGate<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> LineReviewGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// Show `text` and read one trimmed line; `None` at end of input.
    async fn ask(&self, text: &str) -> io::Result<Option<String>> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn ask_optional(&self, text: &str) -> io::Result<Option<String>> {
        Ok(self.ask(text).await?.filter(|s| !s.is_empty()))
    }

    async fn try_review(
        &self,
        node: &HypothesisNode,
        analysis: Option<&Analysis>,
    ) -> io::Result<ReviewDecision> {
        let mut summary = format!(
            "\n[{}] {}{}\n  Reasoning: {}\n",
            node.id,
            node.text,
            if node.is_leaf { " (LEAF)" } else { "" },
            node.reasoning
        );
        if let Some(a) = analysis {
            summary.push_str(&format!(
                "  Analysis: {}\n  Source: {}\n",
                a.analysis_required, a.source_of_reference
            ));
        }
        summary.push_str("Accept? [Y/c] ");

        let answer = self.ask(&summary).await?.unwrap_or_default();
        if !matches!(answer.to_lowercase().as_str(), "c" | "correct" | "n" | "no") {
            return Ok(ReviewDecision::Accept);
        }

        let correction = self.ask("Correction: ").await?.unwrap_or_default();
        let new_text = self.ask_optional("New text (blank keeps current): ").await?;
        let new_reasoning = self
            .ask_optional("New reasoning (blank keeps current): ")
            .await?;

        Ok(ReviewDecision::Correct {
            correction,
            new_text,
            new_reasoning,
        })
    }

    async fn try_select(&self, queue: &WorkQueue, tree: &HypothesisTree) -> io::Result<Selection> {
        let mut listing = String::from("\nPending:\n");
        for (i, item) in queue.iter().enumerate() {
            let text = tree.get(&item.id).map(|n| n.text.as_str()).unwrap_or("");
            listing.push_str(&format!("  [{}] {} {}\n", i, item, text));
        }
        listing.push_str("Next item number (Enter for 0, f to finish): ");

        let answer = match self.ask(&listing).await? {
            Some(a) => a,
            None => return Ok(Selection::Next(0)),
        };
        match answer.to_lowercase().as_str() {
            "" => Ok(Selection::Next(0)),
            "f" | "finish" | "q" => Ok(Selection::Finish),
            other => match other.parse::<usize>() {
                Ok(i) if i < queue.len() => Ok(Selection::Next(i)),
                _ => Ok(Selection::Next(0)),
            },
        }
    }
}

#[async_trait]
impl<R, W> ReviewGate for LineReviewGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn review(&self, node: &HypothesisNode, analysis: Option<&Analysis>) -> ReviewDecision {
        self.try_review(node, analysis).await.unwrap_or_else(|e| {
            warn!(error = %e, "Review prompt failed; accepting");
            ReviewDecision::Accept
        })
    }

    async fn select(&self, queue: &WorkQueue, tree: &HypothesisTree) -> Selection {
        self.try_select(queue, tree).await.unwrap_or_else(|e| {
            warn!(error = %e, "Selection prompt failed; continuing in order");
            Selection::Next(0)
        })
    }
}
