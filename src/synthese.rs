//! Ordonnateur Verification Synthesis
//!
//! Aggregate rollup of the ordonnateur-stage field verifications for one
//! dossier. The transition engine only consumes the pre-aggregated row;
//! authoring of the constituent verifications lives outside this crate and
//! writes through [`crate::store::DossierStore::upsert_synthese`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::DossierStore;
use crate::WorkflowError;

/// Derived status of the verification synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyntheseStatut {
    #[serde(rename = "VALIDÉ", alias = "VALIDE")]
    Valide,
    #[serde(rename = "REJETÉ", alias = "REJETE")]
    Rejete,
    #[serde(rename = "EN_COURS")]
    EnCours,
}

impl SyntheseStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyntheseStatut::Valide => "VALIDÉ",
            SyntheseStatut::Rejete => "REJETÉ",
            SyntheseStatut::EnCours => "EN_COURS",
        }
    }
}

impl std::fmt::Display for SyntheseStatut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single synthesis row for a dossier (at most one per dossier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheseVerification {
    pub dossier_id: Uuid,
    pub statut: SyntheseStatut,
    pub total_verifications: u32,
    pub verifications_rejetees: u32,
    pub updated_at: DateTime<Utc>,
}

impl SyntheseVerification {
    /// Derive a synthesis row from the constituent counts.
    ///
    /// Statut is VALIDÉ only when no verification was rejected and at least
    /// one verification exists; any rejection makes it REJETÉ; otherwise the
    /// work is still EN_COURS.
    pub fn derive(dossier_id: Uuid, total_verifications: u32, verifications_rejetees: u32) -> Self {
        let statut = if verifications_rejetees > 0 {
            SyntheseStatut::Rejete
        } else if total_verifications > 0 {
            SyntheseStatut::Valide
        } else {
            SyntheseStatut::EnCours
        };
        Self {
            dossier_id,
            statut,
            total_verifications,
            verifications_rejetees,
            updated_at: Utc::now(),
        }
    }

    /// Check the structural invariant on a row read back from the store.
    pub fn is_consistent(&self) -> bool {
        match self.statut {
            SyntheseStatut::Valide => {
                self.verifications_rejetees == 0 && self.total_verifications > 0
            }
            _ => self.verifications_rejetees <= self.total_verifications,
        }
    }
}

/// Read the synthesis row for a dossier.
///
/// Zero rows is a legal "gate not satisfied" condition and returns `None`.
/// More than one row is a data-integrity anomaly and is surfaced as
/// [`WorkflowError::DuplicateSynthesis`] rather than silently picking one.
pub async fn get_synthesis(
    store: &dyn DossierStore,
    dossier_id: Uuid,
) -> Result<Option<SyntheseVerification>, WorkflowError> {
    let mut rows = store.load_syntheses(dossier_id).await?;
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(rows.remove(0))),
        count => {
            tracing::error!(%dossier_id, count, "duplicate synthese rows for dossier");
            Err(WorkflowError::DuplicateSynthesis { dossier_id, count })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_valide_requires_work_and_no_rejections() {
        let s = SyntheseVerification::derive(Uuid::new_v4(), 5, 0);
        assert_eq!(s.statut, SyntheseStatut::Valide);
        assert!(s.is_consistent());
    }

    #[test]
    fn test_derive_rejete_on_any_rejection() {
        let s = SyntheseVerification::derive(Uuid::new_v4(), 5, 2);
        assert_eq!(s.statut, SyntheseStatut::Rejete);
    }

    #[test]
    fn test_derive_en_cours_when_empty() {
        let s = SyntheseVerification::derive(Uuid::new_v4(), 0, 0);
        assert_eq!(s.statut, SyntheseStatut::EnCours);
    }

    #[test]
    fn test_inconsistent_row_detected() {
        let mut s = SyntheseVerification::derive(Uuid::new_v4(), 3, 0);
        s.verifications_rejetees = 1; // contradicts VALIDÉ
        assert!(!s.is_consistent());
    }
}
