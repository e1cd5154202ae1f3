//! Role resolution and access checks.
//!
//! A document grants access three ways, in priority order: implicit
//! ownership, an explicit per-user permission entry, and an optional public
//! default role. Explicit entries always win over the public default, which
//! lets an owner grant one user *less* than the public gets.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::DocumentRecord;

/// Access role, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

impl Role {
    /// Hierarchy level: owner(3) > editor(2) > viewer(1); absent role is 0.
    pub fn level(self) -> u8 {
        match self {
            Role::Owner => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Editor => write!(f, "editor"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Explicit per-user permission entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub user_id: Uuid,
    pub role: Role,
}

/// Resolve the role `user_id` holds on `doc`.
///
/// Owner match first, then the explicit permission list, then the public
/// default (only when the document is public). `None` means no access.
pub fn resolve_role(doc: &DocumentRecord, user_id: Option<Uuid>) -> Option<Role> {
    let user_id = user_id?;

    if doc.owner == user_id {
        return Some(Role::Owner);
    }

    if let Some(entry) = doc.permissions.iter().find(|p| p.user_id == user_id) {
        return Some(entry.role);
    }

    if doc.is_public {
        return doc.public_role;
    }

    None
}

/// Whether `user_id` holds at least `required` on `doc`.
pub fn has_access(doc: &DocumentRecord, user_id: Option<Uuid>, required: Role) -> bool {
    let level = resolve_role(doc, user_id).map(Role::level).unwrap_or(0);
    level >= required.level()
}
