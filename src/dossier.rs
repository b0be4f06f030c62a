//! Dossier and Validation Record Types
//!
//! The case file being routed through the approval chain, plus the
//! per-check validation evidence rows the gate evaluator counts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::statut::DossierStatut;

/// An accounting case file routed through the approval workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dossier {
    pub id: Uuid,
    /// Unique human-readable reference (`DOSS-ACGE-<date>-<shortId>`).
    pub numero_dossier: String,
    pub statut: DossierStatut,
    pub objet_operation: String,
    pub beneficiaire: String,
    pub montant_ordonnance: Option<Decimal>,
    pub poste_comptable_id: Option<Uuid>,
    pub nature_document_id: Option<Uuid>,
    /// Owning secretary.
    pub secretaire_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by CB Validate.
    pub validated_at: Option<DateTime<Utc>>,
    /// Set at final (AC) validation. Immutable afterwards.
    pub validated_definitively_at: Option<DateTime<Utc>>,
    pub validation_definitive_comment: Option<String>,
    pub rejection_comment: Option<String>,
}

impl Dossier {
    /// Build a fresh draft. The statut is always `BROUILLON` at creation,
    /// regardless of what the caller supplied upstream.
    pub fn new_draft(input: NewDossier, secretaire_id: Uuid) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            numero_dossier: generate_numero_dossier(&id, now),
            statut: DossierStatut::Brouillon,
            objet_operation: input.objet_operation,
            beneficiaire: input.beneficiaire,
            montant_ordonnance: input.montant_ordonnance,
            poste_comptable_id: input.poste_comptable_id,
            nature_document_id: input.nature_document_id,
            secretaire_id: Some(secretaire_id),
            created_at: now,
            updated_at: now,
            validated_at: None,
            validated_definitively_at: None,
            validation_definitive_comment: None,
            rejection_comment: None,
        }
    }
}

/// Caller-supplied fields for dossier creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDossier {
    pub objet_operation: String,
    pub beneficiaire: String,
    #[serde(default)]
    pub montant_ordonnance: Option<Decimal>,
    #[serde(default)]
    pub poste_comptable_id: Option<Uuid>,
    #[serde(default)]
    pub nature_document_id: Option<Uuid>,
}

/// Field edits for the Update operation. `None` means "leave unchanged";
/// only changed fields are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DossierUpdate {
    #[serde(default)]
    pub objet_operation: Option<String>,
    #[serde(default)]
    pub beneficiaire: Option<String>,
    #[serde(default)]
    pub montant_ordonnance: Option<Decimal>,
    #[serde(default)]
    pub poste_comptable_id: Option<Uuid>,
    #[serde(default)]
    pub nature_document_id: Option<Uuid>,
}

impl DossierUpdate {
    pub fn is_empty(&self) -> bool {
        self.objet_operation.is_none()
            && self.beneficiaire.is_none()
            && self.montant_ordonnance.is_none()
            && self.poste_comptable_id.is_none()
            && self.nature_document_id.is_none()
    }

    /// Apply changed fields in place, bumping `updated_at`.
    pub fn apply_to(&self, dossier: &mut Dossier) {
        if let Some(v) = &self.objet_operation {
            dossier.objet_operation = v.clone();
        }
        if let Some(v) = &self.beneficiaire {
            dossier.beneficiaire = v.clone();
        }
        if let Some(v) = self.montant_ordonnance {
            dossier.montant_ordonnance = Some(v);
        }
        if let Some(v) = self.poste_comptable_id {
            dossier.poste_comptable_id = Some(v);
        }
        if let Some(v) = self.nature_document_id {
            dossier.nature_document_id = Some(v);
        }
        dossier.updated_at = Utc::now();
    }
}

/// The write half of a status transition: the target statut plus the audit
/// fields the transition stamps. Applied in one conditional store write.
#[derive(Debug, Clone, Default)]
pub struct StatutChange {
    pub new_statut: Option<DossierStatut>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_definitively_at: Option<DateTime<Utc>>,
    pub validation_definitive_comment: Option<String>,
    pub rejection_comment: Option<String>,
}

impl StatutChange {
    pub fn to(statut: DossierStatut) -> Self {
        Self {
            new_statut: Some(statut),
            ..Self::default()
        }
    }

    /// Apply to a loaded row (memory backend; the Postgres backend applies
    /// the same change inside a single conditional UPDATE).
    pub fn apply_to(&self, dossier: &mut Dossier) {
        if let Some(statut) = self.new_statut {
            dossier.statut = statut;
        }
        if let Some(at) = self.validated_at {
            dossier.validated_at = Some(at);
        }
        if let Some(at) = self.validated_definitively_at {
            dossier.validated_definitively_at = Some(at);
        }
        if let Some(comment) = &self.validation_definitive_comment {
            dossier.validation_definitive_comment = Some(comment.clone());
        }
        if let Some(comment) = &self.rejection_comment {
            dossier.rejection_comment = Some(comment.clone());
        }
        dossier.updated_at = Utc::now();
    }
}

/// Evidence that the operation-type check was performed for a dossier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTypeValidation {
    pub id: Uuid,
    pub dossier_id: Uuid,
    pub type_operation_id: Uuid,
    pub nature_operation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OperationTypeValidation {
    pub fn new(dossier_id: Uuid, type_operation_id: Uuid, nature_operation_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dossier_id,
            type_operation_id,
            nature_operation_id,
            created_at: Utc::now(),
        }
    }
}

/// Evidence that one fond control was performed for a dossier.
///
/// `valide` is advisory metadata: gate satisfaction is existence-only, so a
/// recorded *failed* control still satisfies the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControleFondValidation {
    pub id: Uuid,
    pub dossier_id: Uuid,
    pub controle_fond_id: Uuid,
    pub valide: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ControleFondValidation {
    pub fn new(dossier_id: Uuid, controle_fond_id: Uuid, valide: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            dossier_id,
            controle_fond_id,
            valide,
            comment: None,
            created_at: Utc::now(),
        }
    }
}

/// Generate the unique human-readable dossier reference:
/// `DOSS-ACGE-<YYYYMMDD>-<first 8 hex of the dossier id>`.
pub fn generate_numero_dossier(id: &Uuid, at: DateTime<Utc>) -> String {
    let short_id = &id.simple().to_string()[..8];
    format!("DOSS-ACGE-{}-{}", at.format("%Y%m%d"), short_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_draft_is_always_brouillon() {
        let dossier = Dossier::new_draft(
            NewDossier {
                objet_operation: "Achat de fournitures".into(),
                beneficiaire: "Fournisseur SARL".into(),
                ..Default::default()
            },
            Uuid::new_v4(),
        );
        assert_eq!(dossier.statut, DossierStatut::Brouillon);
        assert!(dossier.validated_definitively_at.is_none());
    }

    #[test]
    fn test_numero_dossier_format() {
        let id = Uuid::new_v4();
        let numero = generate_numero_dossier(&id, Utc::now());
        assert!(numero.starts_with("DOSS-ACGE-"));
        let parts: Vec<&str> = numero.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].len(), 8); // YYYYMMDD
        assert_eq!(parts[3].len(), 8); // short id
    }

    #[test]
    fn test_update_applies_only_changed_fields() {
        let mut dossier = Dossier::new_draft(
            NewDossier {
                objet_operation: "Objet initial".into(),
                beneficiaire: "Beneficiaire initial".into(),
                ..Default::default()
            },
            Uuid::new_v4(),
        );
        let update = DossierUpdate {
            beneficiaire: Some("Nouveau beneficiaire".into()),
            ..Default::default()
        };
        update.apply_to(&mut dossier);
        assert_eq!(dossier.objet_operation, "Objet initial");
        assert_eq!(dossier.beneficiaire, "Nouveau beneficiaire");
    }
}
