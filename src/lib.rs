//! # AgentMem
//!
//! Shared semantic memory for autonomous agents.
//!
//! ## Architecture
//!
//! The engine has three parts:
//! - **Fingerprint generation** ([`embedding`]) - text to fixed-length vectors
//! - **Similarity ranking** ([`search`], [`similarity`]) - cosine scoring,
//!   threshold filtering, stable sort, top-k
//! - **Access control** ([`permissions`]) - read/write/share decisions from
//!   ownership, explicit sharing and visibility
//!
//! [`service::MemoryService`] wires them to SQLite storage and is what the
//! HTTP server calls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentmem::{Config, MemoryService, NewMemory, SearchRequest};
//!
//! let service = MemoryService::open(Config::from_env()?)?;
//! let agent = service.register_agent("team-a", "planner")?;
//!
//! service.create(&agent, NewMemory {
//!     memory_type: "fact".into(),
//!     category: "ml".into(),
//!     content: "Machine learning is a branch of AI".into(),
//!     visibility: Default::default(),
//! }).await?;
//!
//! let hits = service.search(&agent, &SearchRequest::new("artificial intelligence")).await?;
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod permissions;
pub mod response;
pub mod search;
pub mod service;
pub mod similarity;
pub mod storage;

pub use config::Config;
pub use embedding::{Embedder, FastEmbedder, HashEmbedder};
pub use error::{Error, Result};
pub use memory::{AgentRecord, Lifecycle, Memory, MemoryUpdate, NewMemory, Visibility};
pub use permissions::{AccessController, Action};
pub use search::{SearchEngine, SearchHit, SearchStats, Searchable};
pub use service::{MemoryService, ReembedReport, ScoredMemory, SearchRequest};
pub use similarity::cosine_similarity;
pub use storage::SqliteStorage;
