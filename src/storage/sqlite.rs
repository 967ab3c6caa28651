//! SQLite storage for agents, memory records and the sharing relation

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::{AgentRecord, Lifecycle, Memory};

const MEMORY_COLUMNS: &str = "id, workspace_id, created_by, memory_type, category, content, \
     visibility, fingerprint, fingerprint_updated_at, created_at, updated_at, lifecycle";

/// SQLite storage backend. Every mutation touches a single record atomically.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database under the configured data directory
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(config.sqlite_path())
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::storage(e.to_string()))
    }

    /// Save an agent
    pub fn save_agent(&self, agent: &AgentRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO agents (id, workspace_id, name, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
            params![
                agent.id.to_string(),
                agent.workspace_id,
                agent.name,
                agent.created_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Get an agent by ID
    pub fn get_agent(&self, id: Uuid) -> Result<Option<AgentRecord>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT id, workspace_id, name, created_at FROM agents WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, workspace_id, name, created_at)| {
            Ok(AgentRecord {
                id: parse_uuid(&id)?,
                workspace_id,
                name,
                created_at: parse_time(&created_at)?,
            })
        })
        .transpose()
    }

    /// Insert a new memory together with its grantees
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO memories ({MEMORY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                memory.id.to_string(),
                memory.workspace_id,
                memory.created_by.to_string(),
                memory.memory_type,
                memory.category,
                memory.content,
                memory.visibility.to_string(),
                memory.fingerprint.as_deref().map(encode_fingerprint),
                memory.fingerprint_updated_at.map(|dt| dt.to_rfc3339()),
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
                memory.lifecycle.to_string(),
            ],
        )?;

        for agent_id in &memory.shared_with {
            tx.execute(
                "INSERT OR IGNORE INTO memory_shares (memory_id, agent_id) VALUES (?1, ?2)",
                params![memory.id.to_string(), agent_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Write content, visibility, fingerprint and timestamps in one statement.
    /// A deleted record is `NotFound`.
    pub fn update_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            UPDATE memories SET
                content = ?2,
                visibility = ?3,
                fingerprint = ?4,
                fingerprint_updated_at = ?5,
                updated_at = ?6
            WHERE id = ?1 AND lifecycle = 'active'
            "#,
            params![
                memory.id.to_string(),
                memory.content,
                memory.visibility.to_string(),
                memory.fingerprint.as_deref().map(encode_fingerprint),
                memory.fingerprint_updated_at.map(|dt| dt.to_rfc3339()),
                memory.updated_at.to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            return Err(Error::not_found(format!("memory {}", memory.id)));
        }
        Ok(())
    }

    /// Attach a fingerprint to a live record that still has none and still
    /// holds `content`. Returns false when the record changed in between.
    pub fn fill_fingerprint(
        &self,
        id: Uuid,
        content: &str,
        fingerprint: &[f32],
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE memories SET fingerprint = ?2, fingerprint_updated_at = ?3
            WHERE id = ?1
              AND content = ?4
              AND fingerprint IS NULL
              AND lifecycle = 'active'
            "#,
            params![
                id.to_string(),
                encode_fingerprint(fingerprint),
                updated_at.to_rfc3339(),
                content,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Mark a memory as deleted. The row is kept.
    pub fn soft_delete(&self, id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE memories SET lifecycle = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                Lifecycle::Deleted.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Get a memory by ID regardless of lifecycle
    pub fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id.to_string()],
                MemoryRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT agent_id FROM memory_shares WHERE memory_id = ?1")?;
        let grantees = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
            .map(|r| r.map_err(Error::from).and_then(|s| parse_uuid(&s)))
            .collect::<Result<BTreeSet<_>>>()?;

        let mut memory = row.into_memory()?;
        memory.shared_with = grantees;
        Ok(Some(memory))
    }

    /// Active memories of a workspace, newest first
    pub fn list_active(&self, workspace_id: &str) -> Result<Vec<Memory>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE workspace_id = ?1 AND lifecycle = 'active' \
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![workspace_id], MemoryRow::from_row)?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row?.into_memory()?);
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT s.memory_id, s.agent_id
            FROM memory_shares s JOIN memories m ON m.id = s.memory_id
            WHERE m.workspace_id = ?1 AND m.lifecycle = 'active'
            "#,
        )?;
        let mut grantees: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();
        let share_rows = stmt.query_map(params![workspace_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for share in share_rows {
            let (memory_id, agent_id) = share?;
            grantees
                .entry(parse_uuid(&memory_id)?)
                .or_default()
                .insert(parse_uuid(&agent_id)?);
        }

        for memory in &mut memories {
            if let Some(set) = grantees.remove(&memory.id) {
                memory.shared_with = set;
            }
        }

        Ok(memories)
    }

    /// Add a grantee. Returns false if it was already present.
    pub fn add_share(&self, memory_id: Uuid, agent_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO memory_shares (memory_id, agent_id) VALUES (?1, ?2)",
            params![memory_id.to_string(), agent_id.to_string()],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a grantee. Returns false if it was not present.
    pub fn remove_share(&self, memory_id: Uuid, agent_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM memory_shares WHERE memory_id = ?1 AND agent_id = ?2",
            params![memory_id.to_string(), agent_id.to_string()],
        )?;
        Ok(removed > 0)
    }
}

/// Little-endian f32 packing for the fingerprint BLOB column
fn encode_fingerprint(fingerprint: &[f32]) -> Vec<u8> {
    fingerprint.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_fingerprint(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::storage(format!(
            "Fingerprint blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::storage(e.to_string()))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(e.to_string()))
}

/// Intermediate struct for reading from SQLite
struct MemoryRow {
    id: String,
    workspace_id: String,
    created_by: String,
    memory_type: String,
    category: String,
    content: String,
    visibility: String,
    fingerprint: Option<Vec<u8>>,
    fingerprint_updated_at: Option<String>,
    created_at: String,
    updated_at: String,
    lifecycle: String,
}

impl MemoryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            created_by: row.get(2)?,
            memory_type: row.get(3)?,
            category: row.get(4)?,
            content: row.get(5)?,
            visibility: row.get(6)?,
            fingerprint: row.get(7)?,
            fingerprint_updated_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            lifecycle: row.get(11)?,
        })
    }

    fn into_memory(self) -> Result<Memory> {
        Ok(Memory {
            id: parse_uuid(&self.id)?,
            workspace_id: self.workspace_id,
            created_by: parse_uuid(&self.created_by)?,
            memory_type: self.memory_type,
            category: self.category,
            content: self.content,
            visibility: self
                .visibility
                .parse()
                .map_err(|_| Error::storage(format!("Unknown visibility: {}", self.visibility)))?,
            shared_with: BTreeSet::new(),
            fingerprint: self.fingerprint.as_deref().map(decode_fingerprint).transpose()?,
            fingerprint_updated_at: self
                .fingerprint_updated_at
                .as_deref()
                .map(parse_time)
                .transpose()?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            lifecycle: self.lifecycle.parse()?,
        })
    }
}
