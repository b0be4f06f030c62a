//! Postgres store backend (`database` feature).
//!
//! Raw SQL through the non-macro sqlx API. The status transition is one
//! conditional UPDATE whose WHERE clause re-checks the expected statut, so
//! a lost race returns zero rows instead of overwriting newer state.
//!
//! Statut labels are stored in canonical (accented) form; reads still parse
//! the unaccented historical aliases and reject anything outside the closed
//! set as a malformed row.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::dossier::{
    ControleFondValidation, Dossier, DossierUpdate, OperationTypeValidation, StatutChange,
};
use crate::quitus::{Quitus, QuitusContenu, QuitusVerification, VerificationResultat};
use crate::statut::DossierStatut;
use crate::synthese::{SyntheseStatut, SyntheseVerification};

use super::{DossierStore, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Surface unique-constraint rejections as `Conflict` instead of a generic
/// database error.
fn map_write_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::from(e),
    }
}

fn map_dossier(row: &PgRow) -> Result<Dossier, StoreError> {
    let statut_label: String = row.try_get("statut")?;
    let statut: DossierStatut = statut_label
        .parse()
        .map_err(|e| StoreError::Malformed(format!("dossier statut: {e}")))?;

    Ok(Dossier {
        id: row.try_get("id")?,
        numero_dossier: row.try_get("numero_dossier")?,
        statut,
        objet_operation: row.try_get("objet_operation")?,
        beneficiaire: row.try_get("beneficiaire")?,
        montant_ordonnance: row.try_get("montant_ordonnance")?,
        poste_comptable_id: row.try_get("poste_comptable_id")?,
        nature_document_id: row.try_get("nature_document_id")?,
        secretaire_id: row.try_get("secretaire_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        validated_at: row.try_get("validated_at")?,
        validated_definitively_at: row.try_get("validated_definitively_at")?,
        validation_definitive_comment: row.try_get("validation_definitive_comment")?,
        rejection_comment: row.try_get("rejection_comment")?,
    })
}

fn map_synthese(row: &PgRow) -> Result<SyntheseVerification, StoreError> {
    let statut_label: String = row.try_get("statut")?;
    let statut = match statut_label.as_str() {
        "VALIDÉ" | "VALIDE" => SyntheseStatut::Valide,
        "REJETÉ" | "REJETE" => SyntheseStatut::Rejete,
        "EN_COURS" => SyntheseStatut::EnCours,
        other => {
            return Err(StoreError::Malformed(format!(
                "synthese statut: {other}"
            )))
        }
    };

    let total: i32 = row.try_get("total_verifications")?;
    let rejetees: i32 = row.try_get("verifications_rejetees")?;
    if total < 0 || rejetees < 0 {
        return Err(StoreError::Malformed("negative synthese counts".into()));
    }

    let synthese = SyntheseVerification {
        dossier_id: row.try_get("dossier_id")?,
        statut,
        total_verifications: total as u32,
        verifications_rejetees: rejetees as u32,
        updated_at: row.try_get("updated_at")?,
    };
    if !synthese.is_consistent() {
        return Err(StoreError::Malformed(format!(
            "synthese counts contradict statut {} for dossier {}",
            synthese.statut, synthese.dossier_id
        )));
    }
    Ok(synthese)
}

fn map_quitus(row: &PgRow) -> Result<Quitus, StoreError> {
    let contenu_json: serde_json::Value = row.try_get("contenu")?;
    let contenu: QuitusContenu = serde_json::from_value(contenu_json)
        .map_err(|e| StoreError::Malformed(format!("quitus contenu: {e}")))?;
    Ok(Quitus {
        contenu,
        hash: row.try_get("hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_quitus_verification(row: &PgRow) -> Result<QuitusVerification, StoreError> {
    let resultat_label: String = row.try_get("resultat")?;
    let resultat = match resultat_label.as_str() {
        "AUTHENTIQUE" => VerificationResultat::Authentique,
        "NON_AUTHENTIQUE" => VerificationResultat::NonAuthentique,
        other => {
            return Err(StoreError::Malformed(format!(
                "verification resultat: {other}"
            )))
        }
    };
    Ok(QuitusVerification {
        id: row.try_get("id")?,
        numero_quitus: row.try_get("numero_quitus")?,
        resultat,
        verified_at: row.try_get("verified_at")?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
    })
}

#[async_trait]
impl DossierStore for PgStore {
    async fn insert_dossier(&self, dossier: &Dossier) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO acge.dossiers
            (id, numero_dossier, statut, objet_operation, beneficiaire,
             montant_ordonnance, poste_comptable_id, nature_document_id,
             secretaire_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(dossier.id)
        .bind(&dossier.numero_dossier)
        .bind(dossier.statut.as_str())
        .bind(&dossier.objet_operation)
        .bind(&dossier.beneficiaire)
        .bind(dossier.montant_ordonnance)
        .bind(dossier.poste_comptable_id)
        .bind(dossier.nature_document_id)
        .bind(dossier.secretaire_id)
        .bind(dossier.created_at)
        .bind(dossier.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_err)?;
        Ok(())
    }

    async fn load_dossier(&self, id: Uuid) -> Result<Option<Dossier>, StoreError> {
        let row = sqlx::query("SELECT * FROM acge.dossiers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_dossier).transpose()
    }

    async fn find_dossier_by_numero(&self, numero: &str) -> Result<Option<Dossier>, StoreError> {
        let row = sqlx::query("SELECT * FROM acge.dossiers WHERE numero_dossier = $1")
            .bind(numero)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_dossier).transpose()
    }

    async fn transition_dossier(
        &self,
        id: Uuid,
        expected: DossierStatut,
        change: StatutChange,
    ) -> Result<Option<Dossier>, StoreError> {
        let new_statut = change.new_statut.unwrap_or(expected);
        let row = sqlx::query(
            r#"
            UPDATE acge.dossiers SET
                statut = $3,
                updated_at = NOW(),
                validated_at = COALESCE($4, validated_at),
                validated_definitively_at = COALESCE($5, validated_definitively_at),
                validation_definitive_comment = COALESCE($6, validation_definitive_comment),
                rejection_comment = COALESCE($7, rejection_comment)
            WHERE id = $1 AND statut = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new_statut.as_str())
        .bind(change.validated_at)
        .bind(change.validated_definitively_at)
        .bind(change.validation_definitive_comment)
        .bind(change.rejection_comment)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_dossier).transpose()
    }

    async fn update_dossier_fields(
        &self,
        id: Uuid,
        editable: &[DossierStatut],
        update: &DossierUpdate,
    ) -> Result<Option<Dossier>, StoreError> {
        let editable_labels: Vec<String> =
            editable.iter().map(|s| s.as_str().to_string()).collect();
        let row = sqlx::query(
            r#"
            UPDATE acge.dossiers SET
                objet_operation = COALESCE($3, objet_operation),
                beneficiaire = COALESCE($4, beneficiaire),
                montant_ordonnance = COALESCE($5, montant_ordonnance),
                poste_comptable_id = COALESCE($6, poste_comptable_id),
                nature_document_id = COALESCE($7, nature_document_id),
                updated_at = NOW()
            WHERE id = $1 AND statut = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&editable_labels)
        .bind(update.objet_operation.as_deref())
        .bind(update.beneficiaire.as_deref())
        .bind(update.montant_ordonnance)
        .bind(update.poste_comptable_id)
        .bind(update.nature_document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_dossier).transpose()
    }

    async fn insert_operation_type_validation(
        &self,
        record: &OperationTypeValidation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO acge.validations_type_operation
            (id, dossier_id, type_operation_id, nature_operation_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.dossier_id)
        .bind(record.type_operation_id)
        .bind(record.nature_operation_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_controle_fond_validation(
        &self,
        record: &ControleFondValidation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO acge.validations_controle_fond
            (id, dossier_id, controle_fond_id, valide, comment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.dossier_id)
        .bind(record.controle_fond_id)
        .bind(record.valide)
        .bind(&record.comment)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_operation_type_validations(
        &self,
        dossier_id: Uuid,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM acge.validations_type_operation WHERE dossier_id = $1",
        )
        .bind(dossier_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn count_controle_fond_validations(&self, dossier_id: Uuid) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM acge.validations_controle_fond WHERE dossier_id = $1",
        )
        .bind(dossier_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn load_syntheses(
        &self,
        dossier_id: Uuid,
    ) -> Result<Vec<SyntheseVerification>, StoreError> {
        let rows = sqlx::query("SELECT * FROM acge.syntheses_verification WHERE dossier_id = $1")
            .bind(dossier_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_synthese).collect()
    }

    async fn upsert_synthese(&self, synthese: &SyntheseVerification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO acge.syntheses_verification
            (dossier_id, statut, total_verifications, verifications_rejetees, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dossier_id) DO UPDATE SET
                statut = EXCLUDED.statut,
                total_verifications = EXCLUDED.total_verifications,
                verifications_rejetees = EXCLUDED.verifications_rejetees,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(synthese.dossier_id)
        .bind(synthese.statut.as_str())
        .bind(synthese.total_verifications as i32)
        .bind(synthese.verifications_rejetees as i32)
        .bind(synthese.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_quitus(&self, quitus: &Quitus) -> Result<(), StoreError> {
        let contenu = serde_json::to_value(&quitus.contenu)
            .map_err(|e| StoreError::Malformed(format!("quitus contenu: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO acge.quitus (numero_quitus, contenu, hash, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(quitus.numero())
        .bind(contenu)
        .bind(&quitus.hash)
        .bind(quitus.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_err)?;
        Ok(())
    }

    async fn load_quitus(&self, numero_quitus: &str) -> Result<Option<Quitus>, StoreError> {
        let row = sqlx::query("SELECT * FROM acge.quitus WHERE numero_quitus = $1")
            .bind(numero_quitus)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_quitus).transpose()
    }

    async fn insert_quitus_verification(
        &self,
        verification: &QuitusVerification,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO acge.quitus_verifications
            (id, numero_quitus, resultat, verified_at, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(verification.id)
        .bind(&verification.numero_quitus)
        .bind(verification.resultat.as_str())
        .bind(verification.verified_at)
        .bind(&verification.ip)
        .bind(&verification.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_quitus_verifications(
        &self,
        numero_quitus: &str,
    ) -> Result<Vec<QuitusVerification>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM acge.quitus_verifications
            WHERE numero_quitus = $1
            ORDER BY verified_at
            "#,
        )
        .bind(numero_quitus)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_quitus_verification).collect()
    }
}
