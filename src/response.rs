//! Boundary response types
//!
//! Every response carries `schema_version` so clients can detect shape changes.
//! Fields are listed explicitly; nothing is serialized by reflection over
//! internal records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::memory::{AgentRecord, Memory, Visibility};
use crate::search::SearchStats;
use crate::service::{ReembedReport, ScoredMemory};

/// Version of the response shapes below
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AgentRecord> for AgentView {
    fn from(a: &AgentRecord) -> Self {
        Self {
            id: a.id,
            workspace_id: a.workspace_id.clone(),
            name: a.name.clone(),
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryView {
    pub schema_version: u32,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub category: String,
    pub content: String,
    pub visibility: Visibility,
    pub created_by: Uuid,
    /// False when the memory has no fingerprint and cannot be found by search
    pub searchable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_updated_at: Option<DateTime<Utc>>,
}

impl From<&Memory> for MemoryView {
    fn from(m: &Memory) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: m.id,
            memory_type: m.memory_type.clone(),
            category: m.category.clone(),
            content: m.content.clone(),
            visibility: m.visibility,
            created_by: m.created_by,
            searchable: m.is_searchable(),
            created_at: m.created_at,
            updated_at: m.updated_at,
            fingerprint_updated_at: m.fingerprint_updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryListResponse {
    pub schema_version: u32,
    pub memories: Vec<MemoryView>,
    pub total: usize,
}

impl MemoryListResponse {
    pub fn new(memories: &[Memory]) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            memories: memories.iter().map(MemoryView::from).collect(),
            total: memories.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHitView {
    pub memory_id: Uuid,
    pub content: String,
    pub relevance_score: f64,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub category: String,
}

impl From<&ScoredMemory> for SearchHitView {
    fn from(hit: &ScoredMemory) -> Self {
        Self {
            memory_id: hit.memory.id,
            content: hit.memory.content.clone(),
            relevance_score: hit.score,
            memory_type: hit.memory.memory_type.clone(),
            category: hit.memory.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub schema_version: u32,
    pub results: Vec<SearchHitView>,
    pub total: usize,
    pub limit: i64,
    pub offset: usize,
}

impl SearchResponse {
    pub fn new(hits: &[ScoredMemory], limit: i64, offset: usize) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            results: hits.iter().map(SearchHitView::from).collect(),
            total: hits.len(),
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatsResponse {
    pub schema_version: u32,
    pub total_memories: usize,
    pub searchable_memories: usize,
    pub embedding_coverage: f64,
}

impl From<SearchStats> for SearchStatsResponse {
    fn from(s: SearchStats) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            total_memories: s.total_memories,
            searchable_memories: s.searchable_memories,
            embedding_coverage: s.embedding_coverage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedWithResponse {
    pub schema_version: u32,
    pub memory_id: Uuid,
    pub shared_with: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReembedResponse {
    pub schema_version: u32,
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl From<ReembedReport> for ReembedResponse {
    fn from(r: ReembedReport) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            attempted: r.attempted,
            embedded: r.embedded,
            failed: r.failed,
            skipped: r.skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub schema_version: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<Uuid>,
}

impl SuccessResponse {
    pub fn ok(memory_id: Option<Uuid>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            success: true,
            memory_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub schema_version: u32,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            error: error.into(),
        }
    }
}
