//! Quitus Integrity Service
//!
//! A quitus is the clearance certificate sealed once a dossier reaches
//! final validation. Its integrity hash is a pure function of a fixed-order
//! canonical string. `serde_json` must NEVER feed the hasher (JSON key
//! order and whitespace are not canonical). Verification attempts against
//! the public endpoint are durably audited, never pruned.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::DossierStore;
use crate::WorkflowError;

/// Canonical snapshot sealed into the quitus at generation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuitusContenu {
    pub numero_quitus: String,
    pub numero_dossier: String,
    pub date_generation: DateTime<Utc>,
    pub beneficiaire: String,
    pub montant_ordonnance: Option<Decimal>,
    /// Conformity of the finalized dossier (derives the hashed
    /// CONFORME / NON_CONFORME label).
    pub conforme: bool,
}

impl QuitusContenu {
    /// Conformity label exactly as hashed.
    pub fn statut_conformite(&self) -> &'static str {
        if self.conforme {
            "CONFORME"
        } else {
            "NON_CONFORME"
        }
    }

    /// Fixed-order canonical serialization feeding the digest. Field order
    /// never varies with locale or map iteration order; the date is
    /// RFC 3339 with fixed millisecond precision; an absent montant
    /// canonicalizes to the empty string.
    pub fn canonical_string(&self) -> String {
        let montant = self
            .montant_ordonnance
            .map(|m| m.to_string())
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.numero_quitus,
            self.numero_dossier,
            self.date_generation
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            self.beneficiaire,
            montant,
            self.statut_conformite(),
        )
    }
}

/// The sealed certificate: canonical contenu plus its integrity hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quitus {
    /// `numero_quitus` doubles as the record id.
    pub contenu: QuitusContenu,
    /// 16 uppercase hex chars (truncated SHA-256 of the canonical string).
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Quitus {
    /// Seal a contenu: compute and embed its hash.
    pub fn seal(contenu: QuitusContenu) -> Self {
        let hash = compute_hash(&contenu);
        Self {
            contenu,
            hash,
            created_at: Utc::now(),
        }
    }

    pub fn numero(&self) -> &str {
        &self.contenu.numero_quitus
    }
}

/// Outcome label persisted for each verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationResultat {
    #[serde(rename = "AUTHENTIQUE")]
    Authentique,
    #[serde(rename = "NON_AUTHENTIQUE")]
    NonAuthentique,
}

impl VerificationResultat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationResultat::Authentique => "AUTHENTIQUE",
            VerificationResultat::NonAuthentique => "NON_AUTHENTIQUE",
        }
    }
}

/// Append-only audit row recording one external verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuitusVerification {
    pub id: Uuid,
    pub numero_quitus: String,
    pub resultat: VerificationResultat,
    pub verified_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Requester metadata captured from the public endpoint.
#[derive(Debug, Clone, Default)]
pub struct Requester {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Compute the integrity hash: SHA-256 of the canonical string, hex,
/// uppercased, truncated to the first 16 characters.
pub fn compute_hash(contenu: &QuitusContenu) -> String {
    let digest = Sha256::digest(contenu.canonical_string().as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02X}", byte));
    }
    hex
}

/// Recompute and compare. Plain equality: this is an integrity check on a
/// publicly known value (it travels inside the QR code), not a secret.
pub fn verify(contenu: &QuitusContenu, provided_hash: &str) -> bool {
    compute_hash(contenu) == provided_hash
}

/// Generate the quitus number:
/// `QUITUS-<numeroDossier>-<year>-<random 3 digits>-<epoch millis>`.
///
/// Uniqueness leans on the millisecond component: a quitus is generated at
/// most once per finalization, and the transition engine's precondition gate
/// precludes sub-millisecond concurrent finalization of one dossier.
pub fn generate_numero(numero_dossier: &str) -> String {
    let now = Utc::now();
    let random: u16 = rand::thread_rng().gen_range(0..1000);
    format!(
        "QUITUS-{}-{}-{:03}-{}",
        numero_dossier,
        now.year(),
        random,
        now.timestamp_millis()
    )
}

/// Verification URL embedded in the QR artifact. The path and query shape
/// are wire contract; QR codes in circulation embed them bit-exactly.
pub fn verification_url(base_url: &str, numero_quitus: &str, hash: &str) -> String {
    format!(
        "{}/verify-quitus/{}?hash={}",
        base_url.trim_end_matches('/'),
        numero_quitus,
        hash
    )
}

/// Render the verification URL as a scannable QR code (SVG document).
pub fn generate_verification_artifact(
    numero_quitus: &str,
    hash: &str,
    base_url: &str,
) -> Result<String, WorkflowError> {
    let url = verification_url(base_url, numero_quitus, hash);
    let code = QrCode::new(url.as_bytes())
        .map_err(|e| WorkflowError::Artifact(format!("QR encoding failed: {e}")))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(240, 240)
        .build())
}

/// Per-verification wire response for the public endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quitus: Option<Quitus>,
}

/// Verifies stored quitus records against a provided hash and audits every
/// attempt.
pub struct QuitusService {
    store: Arc<dyn DossierStore>,
}

impl QuitusService {
    pub fn new(store: Arc<dyn DossierStore>) -> Self {
        Self { store }
    }

    /// Verify the quitus identified by `numero_quitus` against
    /// `provided_hash`.
    ///
    /// Unknown numero is `NotFound` (wrong identifier); a present record
    /// with a non-matching hash is a valid=false outcome (tampering
    /// signal). The two cases carry different messages. Every attempt
    /// against an existing record persists an audit row with the outcome
    /// and requester metadata.
    pub async fn verify_by_numero(
        &self,
        numero_quitus: &str,
        provided_hash: &str,
        requester: Requester,
    ) -> Result<VerificationOutcome, WorkflowError> {
        let quitus = self
            .store
            .load_quitus(numero_quitus)
            .await?
            .ok_or(WorkflowError::NotFound)?;

        let valid = verify(&quitus.contenu, provided_hash);
        let resultat = if valid {
            VerificationResultat::Authentique
        } else {
            VerificationResultat::NonAuthentique
        };

        self.store
            .insert_quitus_verification(&QuitusVerification {
                id: Uuid::new_v4(),
                numero_quitus: numero_quitus.to_string(),
                resultat,
                verified_at: Utc::now(),
                ip: requester.ip,
                user_agent: requester.user_agent,
            })
            .await?;

        tracing::info!(
            numero_quitus,
            resultat = resultat.as_str(),
            "quitus verification attempt"
        );

        Ok(VerificationOutcome {
            valid,
            message: if valid {
                "Quitus authentique".to_string()
            } else {
                "Le hash fourni ne correspond pas au quitus".to_string()
            },
            quitus: valid.then_some(quitus),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_contenu() -> QuitusContenu {
        QuitusContenu {
            numero_quitus: "QUITUS-DOSS-ACGE-20250101-abcd1234-2025-042-1735689600000".into(),
            numero_dossier: "DOSS-ACGE-20250101-abcd1234".into(),
            date_generation: "2025-01-01T12:00:00Z".parse().unwrap(),
            beneficiaire: "Fournisseur SARL".into(),
            montant_ordonnance: Some(Decimal::new(1_500_000, 2)),
            conforme: true,
        }
    }

    #[test]
    fn test_hash_shape() {
        let hash = compute_hash(&sample_contenu());
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash.to_uppercase());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let contenu = sample_contenu();
        assert_eq!(compute_hash(&contenu), compute_hash(&contenu));
    }

    #[test]
    fn test_round_trip_verification() {
        let contenu = sample_contenu();
        let hash = compute_hash(&contenu);
        assert!(verify(&contenu, &hash));
    }

    #[test]
    fn test_any_field_mutation_breaks_verification() {
        let contenu = sample_contenu();
        let hash = compute_hash(&contenu);

        let mut c = contenu.clone();
        c.beneficiaire.push('X');
        assert!(!verify(&c, &hash));

        let mut c = contenu.clone();
        c.montant_ordonnance = Some(Decimal::new(1_500_001, 2));
        assert!(!verify(&c, &hash));

        let mut c = contenu.clone();
        c.conforme = false;
        assert!(!verify(&c, &hash));

        let mut c = contenu;
        c.numero_dossier = "DOSS-ACGE-20250101-abcd1235".into();
        assert!(!verify(&c, &hash));
    }

    #[test]
    fn test_canonical_string_field_order_is_fixed() {
        let canonical = sample_contenu().canonical_string();
        let fields: Vec<&str> = canonical.split('|').collect();
        assert_eq!(fields.len(), 6);
        assert!(fields[0].starts_with("QUITUS-"));
        assert!(fields[1].starts_with("DOSS-ACGE-"));
        assert_eq!(fields[5], "CONFORME");
    }

    #[test]
    fn test_generate_numero_unique_across_milliseconds() {
        // Uniqueness leans on the millisecond component, so spread the
        // calls over distinct milliseconds.
        let mut seen = HashSet::new();
        for _ in 0..20 {
            assert!(seen.insert(generate_numero("DOSS-ACGE-20250101-abcd1234")));
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    }

    #[test]
    fn test_generate_numero_format() {
        let numero = generate_numero("DOSS-ACGE-20250101-abcd1234");
        assert!(numero.starts_with("QUITUS-DOSS-ACGE-20250101-abcd1234-"));
        let tail: Vec<&str> = numero.rsplitn(3, '-').collect();
        // tail is [epoch_millis, random3, rest]
        assert_eq!(tail[1].len(), 3);
        assert!(tail[0].parse::<i64>().is_ok());
    }

    #[test]
    fn test_verification_url_shape() {
        let url = verification_url("https://acge.example", "QUITUS-X-2025-001-1", "ABCD");
        assert_eq!(
            url,
            "https://acge.example/verify-quitus/QUITUS-X-2025-001-1?hash=ABCD"
        );
        // Trailing slash on the base must not double up.
        let url = verification_url("https://acge.example/", "Q", "H");
        assert_eq!(url, "https://acge.example/verify-quitus/Q?hash=H");
    }

    #[test]
    fn test_artifact_is_svg() {
        let svg = generate_verification_artifact("QUITUS-X-2025-001-1", "ABCD1234ABCD1234", "http://localhost:3000").unwrap();
        assert!(svg.contains("<svg"));
    }
}
