//! Per-record access decisions
//!
//! | Action | Allowed when |
//! |--------|--------------|
//! | read   | creator, explicit grantee, or `public` visibility |
//! | write  | creator |
//! | share  | creator |
//!
//! Absent or deleted records are denied for every action. The controller
//! never errors; callers turn `false` into `Error::PermissionDenied`.

use uuid::Uuid;

use crate::memory::{Memory, Visibility};

/// Something an agent may attempt on a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Share,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
            Action::Share => write!(f, "share"),
        }
    }
}

/// Stateless permission checks
pub struct AccessController;

impl AccessController {
    /// Decide whether `actor` may perform `action` on `memory`
    pub fn is_allowed(actor: Uuid, memory: Option<&Memory>, action: Action) -> bool {
        let Some(memory) = memory.filter(|m| m.is_active()) else {
            return false;
        };

        match action {
            Action::Read => {
                memory.is_creator(actor)
                    || memory.is_grantee(actor)
                    || memory.visibility == Visibility::Public
            }
            Action::Write | Action::Share => memory.is_creator(actor),
        }
    }

    pub fn can_read(actor: Uuid, memory: Option<&Memory>) -> bool {
        Self::is_allowed(actor, memory, Action::Read)
    }

    pub fn can_write(actor: Uuid, memory: Option<&Memory>) -> bool {
        Self::is_allowed(actor, memory, Action::Write)
    }

    pub fn can_share(actor: Uuid, memory: Option<&Memory>) -> bool {
        Self::is_allowed(actor, memory, Action::Share)
    }

    /// Keep only the memories `actor` may read, preserving order
    pub fn readable<'a>(
        actor: Uuid,
        memories: impl IntoIterator<Item = &'a Memory>,
    ) -> impl Iterator<Item = &'a Memory> {
        memories
            .into_iter()
            .filter(move |m| Self::can_read(actor, Some(*m)))
    }
}
