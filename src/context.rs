//! Request Identity Context
//!
//! The identity oracle (JWT verification, session lookup) lives outside this
//! crate. Every engine operation receives the resolved `{user, role}` pair as
//! an explicit parameter; there is no ambient/global user state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Application role of the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Creates, edits and submits dossiers.
    Secretaire,
    /// First validation gate (CB).
    ControleurBudgetaire,
    /// Second validation gate.
    Ordonnateur,
    /// Final validation authority (AC).
    AgentComptable,
    /// Superset of every other role.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Secretaire => "SECRETAIRE",
            Role::ControleurBudgetaire => "CONTROLEUR_BUDGETAIRE",
            Role::Ordonnateur => "ORDONNATEUR",
            Role::AgentComptable => "AGENT_COMPTABLE",
            Role::Admin => "ADMIN",
        };
        f.write_str(label)
    }
}

/// Resolved caller identity, passed into every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    /// True if the caller holds one of `allowed` (ADMIN passes everything).
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        self.role == Role::Admin || allowed.contains(&self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_is_superset() {
        let ctx = RequestContext::new(Uuid::new_v4(), Role::Admin);
        assert!(ctx.has_any_role(&[Role::Secretaire]));
        assert!(ctx.has_any_role(&[Role::AgentComptable]));
    }

    #[test]
    fn test_role_must_match() {
        let ctx = RequestContext::new(Uuid::new_v4(), Role::Ordonnateur);
        assert!(ctx.has_any_role(&[Role::Ordonnateur]));
        assert!(!ctx.has_any_role(&[Role::ControleurBudgetaire]));
    }
}
