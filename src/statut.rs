//! Dossier Status Enum
//!
//! The closed set of statuses a dossier can hold, plus the helpers the
//! transition engine uses to classify them. The canonical wire form is the
//! accented French label; parsing accepts the unaccented historical aliases
//! as well (both spellings exist in stored data).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a dossier in the validation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DossierStatut {
    /// Draft, editable by the owning secretary.
    #[serde(rename = "BROUILLON")]
    Brouillon,
    /// Submitted, awaiting budget controller review.
    #[serde(rename = "EN_ATTENTE")]
    EnAttente,
    /// Rejected by the budget controller.
    #[serde(rename = "REJETÉ_CB", alias = "REJETE_CB")]
    RejeteCb,
    /// Validated by the budget controller.
    #[serde(rename = "VALIDÉ_CB", alias = "VALIDE_CB")]
    ValideCb,
    /// Queued for the authorizing officer.
    #[serde(rename = "EN_ATTENTE_ORDONNANCEMENT")]
    EnAttenteOrdonnancement,
    /// Rejected by the authorizing officer.
    #[serde(rename = "REJETE_ORDONNATEUR", alias = "REJETÉ_ORDONNATEUR")]
    RejeteOrdonnateur,
    /// Validated by the authorizing officer.
    #[serde(rename = "VALIDÉ_ORDONNATEUR", alias = "VALIDE_ORDONNATEUR")]
    ValideOrdonnateur,
    /// Payment ordered.
    #[serde(rename = "ORDONNE", alias = "ORDONNÉ")]
    Ordonne,
    /// Queued for the accounting agent.
    #[serde(rename = "EN_ATTENTE_COMPTABILISATION")]
    EnAttenteComptabilisation,
    /// Rejected by the accounting agent.
    #[serde(rename = "REJETE_AC", alias = "REJETÉ_AC")]
    RejeteAc,
    /// Definitively validated. Success terminal; the record is immutable
    /// afterwards except for reads.
    #[serde(rename = "VALIDÉ_DÉFINITIVEMENT", alias = "VALIDE_DEFINITIVEMENT")]
    ValideDefinitivement,
}

impl DossierStatut {
    /// Every status, in chain order. Used by exhaustive transition tests.
    pub const ALL: [DossierStatut; 11] = [
        DossierStatut::Brouillon,
        DossierStatut::EnAttente,
        DossierStatut::RejeteCb,
        DossierStatut::ValideCb,
        DossierStatut::EnAttenteOrdonnancement,
        DossierStatut::RejeteOrdonnateur,
        DossierStatut::ValideOrdonnateur,
        DossierStatut::Ordonne,
        DossierStatut::EnAttenteComptabilisation,
        DossierStatut::RejeteAc,
        DossierStatut::ValideDefinitivement,
    ];

    /// Canonical (accented) label.
    pub fn as_str(&self) -> &'static str {
        match self {
            DossierStatut::Brouillon => "BROUILLON",
            DossierStatut::EnAttente => "EN_ATTENTE",
            DossierStatut::RejeteCb => "REJETÉ_CB",
            DossierStatut::ValideCb => "VALIDÉ_CB",
            DossierStatut::EnAttenteOrdonnancement => "EN_ATTENTE_ORDONNANCEMENT",
            DossierStatut::RejeteOrdonnateur => "REJETE_ORDONNATEUR",
            DossierStatut::ValideOrdonnateur => "VALIDÉ_ORDONNATEUR",
            DossierStatut::Ordonne => "ORDONNE",
            DossierStatut::EnAttenteComptabilisation => "EN_ATTENTE_COMPTABILISATION",
            DossierStatut::RejeteAc => "REJETE_AC",
            DossierStatut::ValideDefinitivement => "VALIDÉ_DÉFINITIVEMENT",
        }
    }

    /// True only for the success terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DossierStatut::ValideDefinitivement)
    }

    /// True for every rejection status.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DossierStatut::RejeteCb | DossierStatut::RejeteOrdonnateur | DossierStatut::RejeteAc
        )
    }

    /// Statuses in which the owning secretary may still edit dossier fields:
    /// draft, pending, and every rejection status.
    pub fn is_editable(&self) -> bool {
        matches!(self, DossierStatut::Brouillon | DossierStatut::EnAttente) || self.is_rejection()
    }
}

impl fmt::Display for DossierStatut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DossierStatut {
    type Err = UnknownStatut;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let statut = match s {
            "BROUILLON" => DossierStatut::Brouillon,
            "EN_ATTENTE" => DossierStatut::EnAttente,
            "REJETÉ_CB" | "REJETE_CB" => DossierStatut::RejeteCb,
            "VALIDÉ_CB" | "VALIDE_CB" => DossierStatut::ValideCb,
            "EN_ATTENTE_ORDONNANCEMENT" => DossierStatut::EnAttenteOrdonnancement,
            "REJETE_ORDONNATEUR" | "REJETÉ_ORDONNATEUR" => DossierStatut::RejeteOrdonnateur,
            "VALIDÉ_ORDONNATEUR" | "VALIDE_ORDONNATEUR" => DossierStatut::ValideOrdonnateur,
            "ORDONNE" | "ORDONNÉ" => DossierStatut::Ordonne,
            "EN_ATTENTE_COMPTABILISATION" => DossierStatut::EnAttenteComptabilisation,
            "REJETE_AC" | "REJETÉ_AC" => DossierStatut::RejeteAc,
            "VALIDÉ_DÉFINITIVEMENT" | "VALIDE_DEFINITIVEMENT" => {
                DossierStatut::ValideDefinitivement
            }
            other => return Err(UnknownStatut(other.to_string())),
        };
        Ok(statut)
    }
}

/// Error returned when a stored status label is outside the closed set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown dossier statut: {0}")]
pub struct UnknownStatut(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_statuts() {
        for statut in DossierStatut::ALL {
            assert_eq!(statut.as_str().parse::<DossierStatut>().unwrap(), statut);
        }
    }

    #[test]
    fn test_unaccented_aliases() {
        assert_eq!(
            "REJETE_CB".parse::<DossierStatut>().unwrap(),
            DossierStatut::RejeteCb
        );
        assert_eq!(
            "VALIDE_DEFINITIVEMENT".parse::<DossierStatut>().unwrap(),
            DossierStatut::ValideDefinitivement
        );
        assert!("VALIDÉ".parse::<DossierStatut>().is_err());
    }

    #[test]
    fn test_serde_uses_canonical_label() {
        let json = serde_json::to_string(&DossierStatut::ValideCb).unwrap();
        assert_eq!(json, "\"VALIDÉ_CB\"");
        let back: DossierStatut = serde_json::from_str("\"VALIDE_CB\"").unwrap();
        assert_eq!(back, DossierStatut::ValideCb);
    }

    #[test]
    fn test_classification() {
        assert!(DossierStatut::ValideDefinitivement.is_terminal());
        assert!(!DossierStatut::ValideOrdonnateur.is_terminal());
        assert!(DossierStatut::RejeteAc.is_editable());
        assert!(!DossierStatut::ValideCb.is_editable());
    }
}
