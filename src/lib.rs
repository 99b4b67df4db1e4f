//! # Hypotree
//!
//! A workflow engine that decomposes a problem statement into a tree of
//! testable hypotheses by delegating each reasoning step to Langbase Pipes.
//!
//! ## Features
//!
//! - **Formulate**: propose root hypotheses for the problem
//! - **Breakdown / Classify**: refine nodes depth-first until they are testable leaves
//! - **Analyze**: identify the analysis and data source for each leaf
//! - **Restart**: edit any node and regenerate only its subtree
//! - **Review**: gate every step on a human reviewer whose corrections become learnings
//!
//! ## Architecture
//!
//! ```text
//! CLI → Engine → Router → GenerationService → Langbase Pipes (HTTP)
//!          ↓
//!    SQLite (snapshots, learnings, documents)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hypotree::{Config, Engine, Session};
//! use hypotree::generation::{LangbaseGenerator, NoContext};
//! use hypotree::langbase::LangbaseClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let generator = Arc::new(LangbaseGenerator::new(client, config.pipes.clone()));
//!     let engine = Engine::new(generator, Arc::new(NoContext), config.engine.clone());
//!
//!     let mut session = Session::new("Why did Q3 profits fall?");
//!     engine.run(&mut session).await?;
//!     Ok(())
//! }
//! ```

/// Configuration loaded from the environment.
pub mod config;
/// Workflow engine: router, restart, completion safety net, and driver.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Generation and context-retrieval contracts plus the Langbase adapter.
pub mod generation;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// Pending work items.
pub mod queue;
/// Human review gate.
pub mod review;
/// SQLite storage layer for persistence.
pub mod storage;
/// Hypothesis nodes, ids and the tree store.
pub mod tree;

pub use config::Config;
pub use engine::{Engine, ProgressEvent, RunOutcome, Session};
pub use error::{AppError, AppResult};
