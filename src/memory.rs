//! Memory records, agents and the lifecycle rules shared by every read path

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default access level of a memory, independent of its explicit grantees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the creator and explicit grantees
    #[default]
    Private,

    /// Advertised as shared; read access still comes from the grantee set
    Shared,

    /// Readable by every agent in the workspace
    Public,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Shared => write!(f, "shared"),
            Visibility::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "private" => Ok(Visibility::Private),
            "shared" => Ok(Visibility::Shared),
            "public" => Ok(Visibility::Public),
            _ => Err(Error::invalid_input(format!("Unknown visibility: {}", s))),
        }
    }
}

/// Lifecycle state of a memory. Deleted memories are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Active,
    Deleted,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for Lifecycle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Lifecycle::Active),
            "deleted" => Ok(Lifecycle::Deleted),
            _ => Err(Error::storage(format!("Unknown lifecycle: {}", s))),
        }
    }
}

/// A natural-language memory owned by the agent that created it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique memory ID
    pub id: Uuid,

    /// Workspace the memory lives in
    pub workspace_id: String,

    /// Agent that created (and owns) the memory
    pub created_by: Uuid,

    /// Free-form type tag, e.g. "fact" or "preference"
    pub memory_type: String,

    /// Free-form category tag
    pub category: String,

    /// The memory content
    pub content: String,

    pub visibility: Visibility,

    /// Agents the creator explicitly shared this memory with
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shared_with: BTreeSet<Uuid>,

    /// Embedding of `content`. `None` when embedding failed or never ran.
    #[serde(skip)]
    pub fingerprint: Option<Vec<f32>>,

    /// When `fingerprint` was last computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_updated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl Memory {
    /// Create a new active, private memory without a fingerprint
    pub fn new(
        workspace_id: impl Into<String>,
        created_by: Uuid,
        memory_type: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            created_by,
            memory_type: memory_type.into(),
            category: category.into(),
            content: content.into(),
            visibility: Visibility::Private,
            shared_with: BTreeSet::new(),
            fingerprint: None,
            fingerprint_updated_at: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    /// Set the visibility
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the fingerprint and stamp its generation time
    pub fn with_fingerprint(mut self, fingerprint: Vec<f32>) -> Self {
        self.set_fingerprint(Some(fingerprint));
        self
    }

    /// Replace the fingerprint wholesale
    pub fn set_fingerprint(&mut self, fingerprint: Option<Vec<f32>>) {
        self.fingerprint_updated_at = fingerprint.as_ref().map(|_| Utc::now());
        self.fingerprint = fingerprint;
    }

    /// The single predicate every read, search and share path consults
    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Whether the memory can take part in semantic search
    pub fn is_searchable(&self) -> bool {
        self.fingerprint.is_some()
    }

    pub fn is_creator(&self, agent_id: Uuid) -> bool {
        self.created_by == agent_id
    }

    pub fn is_grantee(&self, agent_id: Uuid) -> bool {
        self.shared_with.contains(&agent_id)
    }
}

/// Input for creating a memory
#[derive(Debug, Clone, Deserialize)]
pub struct NewMemory {
    #[serde(rename = "type")]
    pub memory_type: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Input for updating a memory's content and optionally its visibility
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryUpdate {
    pub content: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// An agent identity registered in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(workspace_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
