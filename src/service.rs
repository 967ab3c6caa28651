//! Memory service: permission-checked CRUD, sharing and semantic search
//!
//! Every operation runs as an authenticated [`AgentRecord`] and is confined
//! to that agent's workspace. Access decisions come from
//! [`AccessController`]; a denied decision becomes
//! [`Error::PermissionDenied`], a missing record [`Error::NotFound`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{ensure_text, Embedder, FastEmbedder};
use crate::error::{Error, Result};
use crate::memory::{AgentRecord, Memory, MemoryUpdate, NewMemory};
use crate::permissions::{AccessController, Action};
use crate::search::{SearchEngine, SearchStats};
use crate::storage::SqliteStorage;

/// Parameters of a semantic search
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    /// Maximum number of hits. Zero or negative yields no hits. Falls back
    /// to the configured `default_top_k` when absent.
    #[serde(default)]
    pub limit: Option<i64>,

    /// Number of ranked hits to skip
    #[serde(default)]
    pub offset: usize,

    /// Falls back to the configured threshold when absent
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            offset: 0,
            similarity_threshold: None,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// The requested limit, or `default_top_k` when none was given
    pub fn effective_limit(&self, default_top_k: usize) -> i64 {
        self.limit
            .unwrap_or_else(|| i64::try_from(default_top_k).unwrap_or(i64::MAX))
    }
}

/// A memory returned by search, with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
}

/// Outcome of re-embedding memories that have no fingerprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReembedReport {
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
    /// Records updated or deleted while their fingerprint was being computed
    pub skipped: usize,
}

/// Coordinates storage, permissions, embedding and ranking
pub struct MemoryService {
    config: Config,
    storage: SqliteStorage,
    engine: SearchEngine,
}

impl MemoryService {
    pub fn new(config: Config, storage: SqliteStorage, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            storage,
            engine: SearchEngine::new(embedder),
        }
    }

    /// Open the on-disk database and load the configured embedding model
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;

        let storage = SqliteStorage::new(&config)?;
        let embedder = Arc::new(FastEmbedder::new(&config)?);
        Ok(Self::new(config, storage, embedder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    fn embedder(&self) -> &Arc<dyn Embedder> {
        self.engine.embedder()
    }

    /// Register a new agent identity in a workspace
    pub fn register_agent(&self, workspace_id: &str, name: &str) -> Result<AgentRecord> {
        if workspace_id.trim().is_empty() {
            return Err(Error::invalid_input("workspace_id must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(Error::invalid_input("name must not be empty"));
        }

        let agent = AgentRecord::new(workspace_id.trim(), name.trim());
        self.storage.save_agent(&agent)?;
        tracing::info!(agent_id = %agent.id, workspace_id = %agent.workspace_id, "Registered agent");
        Ok(agent)
    }

    /// Resolve an agent identity handed over by the transport layer
    pub fn agent(&self, id: Uuid) -> Result<Option<AgentRecord>> {
        self.storage.get_agent(id)
    }

    /// Load a live memory in the actor's workspace and check `action` on it
    fn authorize(&self, actor: &AgentRecord, id: Uuid, action: Action) -> Result<Memory> {
        let memory = self
            .storage
            .get_memory(id)?
            .filter(|m| m.is_active() && m.workspace_id == actor.workspace_id)
            .ok_or_else(|| Error::not_found(format!("memory {}", id)))?;

        if !AccessController::is_allowed(actor.id, Some(&memory), action) {
            tracing::debug!(agent_id = %actor.id, memory_id = %id, %action, "Access denied");
            return Err(Error::permission_denied(format!(
                "agent {} may not {} memory {}",
                actor.id, action, id
            )));
        }
        Ok(memory)
    }

    /// Embed content for a record write. Model failures degrade to `None`.
    async fn fingerprint_for(&self, memory_id: Uuid, content: &str) -> Result<Option<Vec<f32>>> {
        match self.embedder().embed(content).await {
            Ok(fingerprint) => Ok(Some(fingerprint)),
            Err(e) if e.is_embedding() => {
                tracing::warn!(
                    memory_id = %memory_id,
                    error = %e,
                    "Embedding failed; memory stored without search eligibility"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a memory owned by `actor`
    pub async fn create(&self, actor: &AgentRecord, req: NewMemory) -> Result<Memory> {
        ensure_text(&req.content)?;

        let mut memory = Memory::new(
            actor.workspace_id.clone(),
            actor.id,
            req.memory_type,
            req.category,
            req.content,
        )
        .with_visibility(req.visibility);

        let fingerprint = self.fingerprint_for(memory.id, &memory.content).await?;
        memory.set_fingerprint(fingerprint);

        self.storage.insert_memory(&memory)?;
        tracing::info!(
            memory_id = %memory.id,
            agent_id = %actor.id,
            searchable = memory.is_searchable(),
            "Created memory"
        );
        Ok(memory)
    }

    /// Fetch a memory the actor may read
    pub fn get(&self, actor: &AgentRecord, id: Uuid) -> Result<Memory> {
        self.authorize(actor, id, Action::Read)
    }

    /// Replace content (and optionally visibility), regenerating the fingerprint
    pub async fn update(&self, actor: &AgentRecord, id: Uuid, req: MemoryUpdate) -> Result<Memory> {
        ensure_text(&req.content)?;
        let mut memory = self.authorize(actor, id, Action::Write)?;

        // Computed before anything is written so the stored record only ever
        // holds the old or the new fingerprint.
        let fingerprint = self.fingerprint_for(id, &req.content).await?;

        memory.content = req.content;
        if let Some(visibility) = req.visibility {
            memory.visibility = visibility;
        }
        memory.set_fingerprint(fingerprint);
        memory.updated_at = Utc::now();

        self.storage.update_memory(&memory)?;
        tracing::info!(memory_id = %id, searchable = memory.is_searchable(), "Updated memory");
        Ok(memory)
    }

    /// Soft-delete a memory
    pub fn delete(&self, actor: &AgentRecord, id: Uuid) -> Result<()> {
        self.authorize(actor, id, Action::Write)?;
        self.storage.soft_delete(id)?;
        tracing::info!(memory_id = %id, agent_id = %actor.id, "Deleted memory");
        Ok(())
    }

    /// All live memories of the actor's workspace that the actor may read
    pub fn list(&self, actor: &AgentRecord) -> Result<Vec<Memory>> {
        let memories = self.storage.list_active(&actor.workspace_id)?;
        Ok(AccessController::readable(actor.id, &memories)
            .cloned()
            .collect())
    }

    /// Grant `grantee` read access. Idempotent.
    pub fn share(&self, actor: &AgentRecord, id: Uuid, grantee: Uuid) -> Result<()> {
        self.authorize(actor, id, Action::Share)?;

        let target = self
            .storage
            .get_agent(grantee)?
            .filter(|a| a.workspace_id == actor.workspace_id)
            .ok_or_else(|| Error::not_found(format!("agent {}", grantee)))?;

        if self.storage.add_share(id, target.id)? {
            tracing::info!(memory_id = %id, grantee = %target.id, "Shared memory");
        }
        Ok(())
    }

    /// Withdraw `grantee`'s explicit read access. Idempotent.
    pub fn revoke(&self, actor: &AgentRecord, id: Uuid, grantee: Uuid) -> Result<()> {
        self.authorize(actor, id, Action::Share)?;

        if self.storage.remove_share(id, grantee)? {
            tracing::info!(memory_id = %id, grantee = %grantee, "Revoked sharing");
        }
        Ok(())
    }

    /// Grantees of a memory the actor may read
    pub fn shared_with(&self, actor: &AgentRecord, id: Uuid) -> Result<Vec<Uuid>> {
        let memory = self.authorize(actor, id, Action::Read)?;
        Ok(memory.shared_with.into_iter().collect())
    }

    /// Rank the actor's readable memories by similarity to the query
    pub async fn search(&self, actor: &AgentRecord, req: &SearchRequest) -> Result<Vec<ScoredMemory>> {
        let threshold = req
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        if !threshold.is_finite() {
            return Err(Error::invalid_input("similarity_threshold must be finite"));
        }
        ensure_text(&req.query)?;

        let limit = usize::try_from(req.effective_limit(self.config.default_top_k)).unwrap_or(0);
        let top_k = req.offset.saturating_add(limit);

        let memories = self.storage.list_active(&actor.workspace_id)?;
        let candidates: Vec<&Memory> = AccessController::readable(actor.id, &memories).collect();

        let dimensions = self.embedder().dimensions();
        let mismatched = candidates
            .iter()
            .filter_map(|m| m.fingerprint.as_ref())
            .filter(|f| f.len() != dimensions)
            .count();
        if mismatched > 0 {
            tracing::warn!(
                mismatched,
                dimensions,
                workspace_id = %actor.workspace_id,
                "Stored fingerprints do not match the model dimensionality; they will score 0"
            );
        }

        let hits = self
            .engine
            .search(&req.query, &candidates, top_k, threshold)
            .await?;

        Ok(hits
            .into_iter()
            .skip(req.offset)
            .map(|hit| ScoredMemory {
                memory: (*hit.record).clone(),
                score: hit.score,
            })
            .collect())
    }

    /// Search coverage of the actor's workspace
    pub fn search_stats(&self, actor: &AgentRecord) -> Result<SearchStats> {
        let memories = self.storage.list_active(&actor.workspace_id)?;
        Ok(SearchStats::from_memories(&memories))
    }

    /// Embed the actor's own memories that have no fingerprint yet
    pub async fn reembed(&self, actor: &AgentRecord) -> Result<ReembedReport> {
        let pending: Vec<Memory> = self
            .storage
            .list_active(&actor.workspace_id)?
            .into_iter()
            .filter(|m| m.is_creator(actor.id) && !m.is_searchable())
            .collect();

        let mut report = ReembedReport {
            attempted: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let texts: Vec<String> = pending.iter().map(|m| m.content.clone()).collect();
        let fingerprints: Vec<Option<Vec<f32>>> = match self
            .embedder()
            .embed_batch(&texts, self.config.embed_batch_size)
            .await
        {
            Ok(batch) => batch.into_iter().map(Some).collect(),
            Err(e) if e.is_embedding() => {
                tracing::warn!(error = %e, "Batch embedding failed; retrying one by one");
                let mut singles = Vec::with_capacity(pending.len());
                for memory in &pending {
                    singles.push(self.fingerprint_for(memory.id, &memory.content).await?);
                }
                singles
            }
            Err(e) => return Err(e),
        };

        for (memory, fingerprint) in pending.iter().zip(fingerprints) {
            let Some(fingerprint) = fingerprint else {
                report.failed += 1;
                continue;
            };
            // The record may have been rewritten while the model ran; its
            // own write already carries the right fingerprint.
            if self
                .storage
                .fill_fingerprint(memory.id, &memory.content, &fingerprint, Utc::now())?
            {
                report.embedded += 1;
            } else {
                tracing::debug!(memory_id = %memory.id, "Memory changed during re-embed; skipped");
                report.skipped += 1;
            }
        }

        tracing::info!(
            agent_id = %actor.id,
            attempted = report.attempted,
            embedded = report.embedded,
            failed = report.failed,
            skipped = report.skipped,
            "Re-embedded memories"
        );
        Ok(report)
    }
}
