//! Storage backends for agentmem

mod sqlite;

pub use sqlite::SqliteStorage;
