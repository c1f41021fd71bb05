//! # Hearth Core Library
//!
//! Reflective memory for LLM-driven villagers.
//!
//! Every villager gets an [`AgentMemory`] holding a stream of natural
//! language observations:
//!
//! - **Recall** — time-weighted retrieval blending recency decay,
//!   importance and semantic relevance ([`retrieval`]).
//! - **Importance** — a 1–10 poignancy rating from a small model, scaled
//!   into `[0, importance_weight]` ([`importance`]).
//! - **Reflection** — once accumulated importance passes a threshold, the
//!   agent asks itself questions about recent memories and stores the
//!   answers as new memories, one concurrent task per question
//!   ([`reflection`]).
//! - **Logging** — every memory is appended to a per-agent external log
//!   before it is stored ([`persistence`]).
//!
//! ## Example
//!
//! ```no_run
//! # use hearth_core::{AgentMemory, HearthConfig};
//! # async fn run() -> hearth_core::Result<()> {
//! let config = HearthConfig::from_toml("[memory]\nreflection_threshold = 0.5")?;
//! let mut memory = AgentMemory::from_config("Villager 1", config)?;
//! memory.add_memory("I saw wolf tracks by the well", None).await?;
//! let related = memory.fetch_memories("wolves", None).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod config;
pub mod embedding;
pub mod error;
pub mod importance;
pub mod memory;
pub mod persistence;
pub mod reflection;
pub mod retrieval;
pub mod telemetry;
pub mod types;

pub use agent::{AgentMemory, AgentMemoryBuilder, AgentMemoryState, MemoryVariables};
pub use config::HearthConfig;
pub use error::{HearthError, Result};
pub use memory::MemoryDocument;
pub use retrieval::MemoryStore;
pub use types::*;
