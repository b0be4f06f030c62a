//! Persistence Boundary
//!
//! The engine, gate evaluator and quitus service operate exclusively through
//! the [`DossierStore`] trait, enabling pluggable backends: [`MemoryStore`]
//! for tests and POC runs, Postgres behind the `database` feature.
//!
//! Rows crossing this boundary are explicit typed records; a row that fails
//! to map (unknown statut label, inconsistent synthese counts) is rejected
//! with [`StoreError::Malformed`] rather than propagated loosely typed.

use async_trait::async_trait;
use uuid::Uuid;

use crate::dossier::{
    ControleFondValidation, Dossier, DossierUpdate, OperationTypeValidation, StatutChange,
};
use crate::quitus::{Quitus, QuitusVerification};
use crate::statut::DossierStatut;
use crate::synthese::SyntheseVerification;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgStore;

/// Errors surfaced by a store backend. Always handled fail-closed: a store
/// failure denies the operation, it never passes a gate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write. Not an infrastructure
    /// outage: retrying the same write will fail again.
    #[error("constraint conflict: {0}")]
    Conflict(String),

    #[error("malformed row: {0}")]
    Malformed(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence trait for all workflow state.
#[async_trait]
pub trait DossierStore: Send + Sync {
    // ── Dossiers ──

    async fn insert_dossier(&self, dossier: &Dossier) -> Result<(), StoreError>;
    async fn load_dossier(&self, id: Uuid) -> Result<Option<Dossier>, StoreError>;
    async fn find_dossier_by_numero(&self, numero: &str) -> Result<Option<Dossier>, StoreError>;

    /// Conditionally apply a status transition: the write succeeds only if
    /// the stored statut still equals `expected` (optimistic concurrency).
    /// Returns the updated row, or `None` when the row is absent or the
    /// expected statut no longer matches.
    async fn transition_dossier(
        &self,
        id: Uuid,
        expected: DossierStatut,
        change: StatutChange,
    ) -> Result<Option<Dossier>, StoreError>;

    /// Apply field edits, conditional on the current statut being in
    /// `editable`. Returns `None` when the row is absent or not editable.
    async fn update_dossier_fields(
        &self,
        id: Uuid,
        editable: &[DossierStatut],
        update: &DossierUpdate,
    ) -> Result<Option<Dossier>, StoreError>;

    // ── Validation evidence ──

    async fn insert_operation_type_validation(
        &self,
        record: &OperationTypeValidation,
    ) -> Result<(), StoreError>;
    async fn insert_controle_fond_validation(
        &self,
        record: &ControleFondValidation,
    ) -> Result<(), StoreError>;
    async fn count_operation_type_validations(&self, dossier_id: Uuid)
        -> Result<u64, StoreError>;
    async fn count_controle_fond_validations(&self, dossier_id: Uuid) -> Result<u64, StoreError>;

    // ── Synthèse ──

    /// All synthesis rows for a dossier. At most one is expected; callers
    /// surface anything else as a data-integrity anomaly.
    async fn load_syntheses(
        &self,
        dossier_id: Uuid,
    ) -> Result<Vec<SyntheseVerification>, StoreError>;
    async fn upsert_synthese(&self, synthese: &SyntheseVerification) -> Result<(), StoreError>;

    // ── Quitus ──

    async fn insert_quitus(&self, quitus: &Quitus) -> Result<(), StoreError>;
    async fn load_quitus(&self, numero_quitus: &str) -> Result<Option<Quitus>, StoreError>;
    async fn insert_quitus_verification(
        &self,
        verification: &QuitusVerification,
    ) -> Result<(), StoreError>;
    async fn load_quitus_verifications(
        &self,
        numero_quitus: &str,
    ) -> Result<Vec<QuitusVerification>, StoreError>;
}
