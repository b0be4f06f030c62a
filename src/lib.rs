//! ACGE dossier validation workflow.
//!
//! Routes an accounting dossier through the multi-role approval chain:
//! Secretary → Budget Controller (CB) → Authorizing Officer (Ordonnateur) →
//! Accounting Agent (AC). The crate covers the status transition engine,
//! the validation gates in front of each transition, the ordonnateur
//! verification synthesis, and the quitus integrity service that seals and
//! re-verifies the clearance certificate issued at final validation.
//!
//! Surrounding concerns (identity resolution, notification fan-out, cache
//! layers, UI) are consumed or exposed at explicit boundaries: identity as
//! a [`context::RequestContext`] parameter, persistence as the
//! [`store::DossierStore`] trait, side effects as [`effects::Effect`]
//! values dispatched after commit.

pub mod config;
pub mod context;
pub mod dossier;
pub mod effects;
pub mod engine;
pub mod gates;
pub mod quitus;
pub mod statut;
pub mod store;
pub mod synthese;

#[cfg(feature = "server")]
pub mod api;

pub use context::{RequestContext, Role};
pub use dossier::{Dossier, DossierUpdate, NewDossier};
pub use engine::{TransitionEngine, TransitionOutcome};
pub use gates::{GateEvaluator, GateReport};
pub use quitus::{Quitus, QuitusService};
pub use statut::DossierStatut;
pub use store::{DossierStore, MemoryStore, StoreError};
pub use synthese::{SyntheseStatut, SyntheseVerification};

/// Workflow error taxonomy.
///
/// Gate and precondition failures carry enough detail for the caller to
/// act (which gate, which statut). Store failures stay generic toward the
/// caller (full detail goes to the server log) and always deny the
/// operation (fail closed).
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Referenced dossier, synthesis or quitus does not exist.
    #[error("not found")]
    NotFound,

    /// The current statut does not permit the requested transition.
    #[error("operation {operation} not permitted from statut {current}")]
    PreconditionFailed {
        operation: &'static str,
        current: statut::DossierStatut,
    },

    /// Named validation gates are unmet.
    #[error("validation gates not satisfied: {}", missing.join(", "))]
    GateNotSatisfied { missing: Vec<String> },

    /// A gate could not be checked at all (store failure). Fail closed.
    #[error("gate verification failed")]
    GateCheckFailed,

    /// No synthesis row exists for the dossier. Distinct from an existing
    /// but unapproved synthesis.
    #[error("no verification synthesis exists for this dossier")]
    MissingSynthesis,

    /// The synthesis row exists but is not VALIDÉ.
    #[error("verification synthesis is {statut}, not VALIDÉ")]
    SynthesisNotApproved { statut: synthese::SyntheseStatut },

    /// More than one synthesis row for one dossier: a data-integrity
    /// anomaly, never silently resolved.
    #[error("{count} synthesis rows found for dossier {dossier_id}")]
    DuplicateSynthesis { dossier_id: uuid::Uuid, count: usize },

    /// Caller role does not permit the operation.
    #[error("role {role} may not perform {operation}")]
    Unauthorized {
        role: context::Role,
        operation: &'static str,
    },

    /// The terminal transition committed but the quitus could not be
    /// persisted. Carries the effects of the committed transition: the
    /// statut change landed, so caches still need the invalidation signal
    /// even though the caller sees an error.
    #[error("quitus sealing failed after definitive validation: {source}")]
    QuitusSealFailed {
        dossier_id: uuid::Uuid,
        effects: Vec<effects::Effect>,
        #[source]
        source: store::StoreError,
    },

    /// Verification artifact (QR) generation failed.
    #[error("verification artifact error: {0}")]
    Artifact(String),

    /// Underlying store unreachable or returned a malformed row.
    #[error("infrastructure error: {0}")]
    Store(#[from] store::StoreError),
}
