//! Langbase Pipes client.
//!
//! Thin HTTP layer used by the generation adapter: run a pipe with a list of
//! messages, and upsert pipes at startup.

mod client;
mod types;

pub use client::LangbaseClient;
pub use types::*;
