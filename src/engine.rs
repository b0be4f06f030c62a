//! Status Transition Engine
//!
//! The state machine routing a dossier through the approval chain. Every
//! operation re-reads the dossier, re-evaluates its gates at call time
//! (never from a cached read), then commits through a single conditional
//! store write keyed on the statut it loaded. A concurrent transition that
//! lands first invalidates the expectation and the loser fails with
//! `PreconditionFailed` instead of overwriting newer state.
//!
//! Transitions return the effects to perform (notifications, cache
//! invalidation); dispatching them is the caller's concern and their
//! failure never rolls back a committed transition.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{RequestContext, Role};
use crate::dossier::{Dossier, DossierUpdate, NewDossier, StatutChange};
use crate::effects::{Effect, FinalValidationNotice};
use crate::gates::{GateEvaluator, GateReport};
use crate::quitus::{self, Quitus, QuitusContenu};
use crate::statut::DossierStatut;
use crate::store::{DossierStore, StoreError};
use crate::synthese::{self, SyntheseStatut, SyntheseVerification};
use crate::WorkflowError;

const SECRETARIAT: &[Role] = &[Role::Secretaire];
const CONTROLE_BUDGETAIRE: &[Role] = &[Role::ControleurBudgetaire];
const ORDONNANCEMENT: &[Role] = &[Role::Ordonnateur];
const COMPTABILISATION: &[Role] = &[Role::AgentComptable];

/// Result of a committed transition: the updated dossier, the quitus when
/// the transition sealed one, and the side effects left to dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub dossier: Dossier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quitus: Option<Quitus>,
    pub effects: Vec<Effect>,
}

impl TransitionOutcome {
    fn committed(dossier: Dossier) -> Self {
        let effects = vec![Effect::InvalidateCache {
            dossier_id: dossier.id,
        }];
        Self {
            dossier,
            quitus: None,
            effects,
        }
    }
}

/// Read-only status report: current statut plus the gate and synthesis
/// state a reviewer acts on.
#[derive(Debug, Clone, Serialize)]
pub struct DossierStatus {
    pub dossier: Dossier,
    pub gates: GateReport,
    pub synthese: Option<SyntheseVerification>,
    pub is_terminal: bool,
}

/// The workflow state machine over a pluggable store.
pub struct TransitionEngine {
    store: Arc<dyn DossierStore>,
    gates: GateEvaluator,
}

impl TransitionEngine {
    pub fn new(store: Arc<dyn DossierStore>) -> Self {
        let gates = GateEvaluator::new(store.clone());
        Self { store, gates }
    }

    pub fn store(&self) -> &Arc<dyn DossierStore> {
        &self.store
    }

    pub fn gates(&self) -> &GateEvaluator {
        &self.gates
    }

    /// Create a dossier. The statut is always `BROUILLON` regardless of
    /// caller input; the caller becomes the owning secretary.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: NewDossier,
    ) -> Result<Dossier, WorkflowError> {
        authorize(ctx, "create", SECRETARIAT)?;
        let dossier = Dossier::new_draft(input, ctx.user_id);
        self.store.insert_dossier(&dossier).await?;
        tracing::info!(
            dossier_id = %dossier.id,
            numero_dossier = %dossier.numero_dossier,
            "dossier created"
        );
        Ok(dossier)
    }

    /// Submit: `BROUILLON` → `EN_ATTENTE`. No gate.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "submit", SECRETARIAT)?;
        let dossier = self
            .apply_transition(
                "submit",
                dossier_id,
                &[DossierStatut::Brouillon],
                StatutChange::to(DossierStatut::EnAttente),
            )
            .await?;
        Ok(TransitionOutcome::committed(dossier))
    }

    /// CB Validate: `EN_ATTENTE` → `VALIDÉ_CB`, gated on both CB-stage
    /// validation gates.
    pub async fn cb_validate(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "cb_validate", CONTROLE_BUDGETAIRE)?;
        self.require_statut(dossier_id, "cb_validate", &[DossierStatut::EnAttente])
            .await?;

        let report = self.gates.evaluate(dossier_id).await;
        if report.infrastructure_failed() {
            return Err(WorkflowError::GateCheckFailed);
        }
        if !report.can_validate {
            return Err(WorkflowError::GateNotSatisfied {
                missing: report.missing_validations,
            });
        }

        let mut change = StatutChange::to(DossierStatut::ValideCb);
        change.validated_at = Some(Utc::now());
        let dossier = self
            .apply_transition("cb_validate", dossier_id, &[DossierStatut::EnAttente], change)
            .await?;
        Ok(TransitionOutcome::committed(dossier))
    }

    /// CB Reject: `EN_ATTENTE` → `REJETÉ_CB`, recording the rejection
    /// comment. No gate.
    pub async fn cb_reject(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
        comment: Option<String>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "cb_reject", CONTROLE_BUDGETAIRE)?;
        let mut change = StatutChange::to(DossierStatut::RejeteCb);
        change.rejection_comment = comment;
        let dossier = self
            .apply_transition("cb_reject", dossier_id, &[DossierStatut::EnAttente], change)
            .await?;
        Ok(TransitionOutcome::committed(dossier))
    }

    /// Ordonnateur Validate: `VALIDÉ_CB` or `EN_ATTENTE_ORDONNANCEMENT` →
    /// `VALIDÉ_ORDONNATEUR`, gated on the verification synthesis.
    pub async fn ordonnateur_validate(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "ordonnateur_validate", ORDONNANCEMENT)?;
        let allowed = [
            DossierStatut::ValideCb,
            DossierStatut::EnAttenteOrdonnancement,
        ];
        self.require_statut(dossier_id, "ordonnateur_validate", &allowed)
            .await?;
        self.require_synthese_validee(dossier_id).await?;

        let dossier = self
            .apply_transition(
                "ordonnateur_validate",
                dossier_id,
                &allowed,
                StatutChange::to(DossierStatut::ValideOrdonnateur),
            )
            .await?;
        Ok(TransitionOutcome::committed(dossier))
    }

    /// Final (AC) Validate: `VALIDÉ_ORDONNATEUR` → `VALIDÉ_DÉFINITIVEMENT`.
    ///
    /// The synthesis gate is re-read at call time. On commit, the quitus is
    /// sealed over the finalized dossier and the notification event is
    /// returned among the effects.
    pub async fn final_validate(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
        comment: Option<String>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "final_validate", COMPTABILISATION)?;
        self.require_statut(
            dossier_id,
            "final_validate",
            &[DossierStatut::ValideOrdonnateur],
        )
        .await?;
        let synthese = self.require_synthese_validee(dossier_id).await?;

        let validated_at = Utc::now();
        let mut change = StatutChange::to(DossierStatut::ValideDefinitivement);
        change.validated_definitively_at = Some(validated_at);
        change.validation_definitive_comment = comment.clone();
        let dossier = self
            .apply_transition(
                "final_validate",
                dossier_id,
                &[DossierStatut::ValideOrdonnateur],
                change,
            )
            .await?;

        let mut outcome = TransitionOutcome::committed(dossier);
        outcome.effects.insert(
            0,
            Effect::Notification(FinalValidationNotice {
                dossier_id: outcome.dossier.id,
                numero_dossier: outcome.dossier.numero_dossier.clone(),
                objet_operation: outcome.dossier.objet_operation.clone(),
                beneficiaire: outcome.dossier.beneficiaire.clone(),
                poste_comptable_id: outcome.dossier.poste_comptable_id,
                montant: outcome.dossier.montant_ordonnance,
                commentaire: comment,
                validated_at,
            }),
        );

        // The statut is committed at this point; quitus generation happens
        // after the terminal transition, never before it. A sealing failure
        // must not discard the committed transition's effects: the error
        // carries them so callers can still dispatch the cache invalidation.
        match self.generate_quitus(&outcome.dossier, &synthese).await {
            Ok(quitus) => {
                outcome.quitus = Some(quitus);
                Ok(outcome)
            }
            Err(source) => {
                tracing::error!(
                    dossier_id = %outcome.dossier.id,
                    error = %source,
                    "quitus sealing failed after committed definitive validation"
                );
                Err(WorkflowError::QuitusSealFailed {
                    dossier_id: outcome.dossier.id,
                    effects: outcome.effects,
                    source,
                })
            }
        }
    }

    /// Update editable fields. Allowed while the dossier is a draft,
    /// pending, or rejected; only changed fields are written.
    pub async fn update_fields(
        &self,
        ctx: &RequestContext,
        dossier_id: Uuid,
        update: DossierUpdate,
    ) -> Result<TransitionOutcome, WorkflowError> {
        authorize(ctx, "update_fields", SECRETARIAT)?;
        let current = self
            .store
            .load_dossier(dossier_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;
        if !current.statut.is_editable() {
            return Err(WorkflowError::PreconditionFailed {
                operation: "update_fields",
                current: current.statut,
            });
        }

        let editable: Vec<DossierStatut> = DossierStatut::ALL
            .into_iter()
            .filter(DossierStatut::is_editable)
            .collect();
        match self
            .store
            .update_dossier_fields(dossier_id, &editable, &update)
            .await?
        {
            Some(dossier) => Ok(TransitionOutcome::committed(dossier)),
            // Statut left the editable set between read and write.
            None => {
                let current = self
                    .store
                    .load_dossier(dossier_id)
                    .await?
                    .ok_or(WorkflowError::NotFound)?;
                Err(WorkflowError::PreconditionFailed {
                    operation: "update_fields",
                    current: current.statut,
                })
            }
        }
    }

    /// Read-only status report for a dossier.
    pub async fn get_status(&self, dossier_id: Uuid) -> Result<DossierStatus, WorkflowError> {
        let dossier = self
            .store
            .load_dossier(dossier_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;
        let gates = self.gates.evaluate(dossier_id).await;
        let synthese = synthese::get_synthesis(self.store.as_ref(), dossier_id).await?;
        let is_terminal = dossier.statut.is_terminal();
        Ok(DossierStatus {
            dossier,
            gates,
            synthese,
            is_terminal,
        })
    }

    /// Load, check the precondition, and commit through the conditional
    /// write. A `None` from the store means the statut moved concurrently;
    /// re-read and report the fresher statut.
    async fn apply_transition(
        &self,
        operation: &'static str,
        dossier_id: Uuid,
        allowed_from: &[DossierStatut],
        change: StatutChange,
    ) -> Result<Dossier, WorkflowError> {
        let current = self
            .store
            .load_dossier(dossier_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;
        if !allowed_from.contains(&current.statut) {
            return Err(WorkflowError::PreconditionFailed {
                operation,
                current: current.statut,
            });
        }

        match self
            .store
            .transition_dossier(dossier_id, current.statut, change)
            .await?
        {
            Some(dossier) => {
                tracing::info!(
                    %dossier_id,
                    operation,
                    from = %current.statut,
                    to = %dossier.statut,
                    "dossier transition committed"
                );
                Ok(dossier)
            }
            None => {
                let fresher = self
                    .store
                    .load_dossier(dossier_id)
                    .await?
                    .ok_or(WorkflowError::NotFound)?;
                tracing::warn!(
                    %dossier_id,
                    operation,
                    expected = %current.statut,
                    current = %fresher.statut,
                    "transition lost a concurrent race"
                );
                Err(WorkflowError::PreconditionFailed {
                    operation,
                    current: fresher.statut,
                })
            }
        }
    }

    async fn require_statut(
        &self,
        dossier_id: Uuid,
        operation: &'static str,
        allowed: &[DossierStatut],
    ) -> Result<Dossier, WorkflowError> {
        let dossier = self
            .store
            .load_dossier(dossier_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;
        if !allowed.contains(&dossier.statut) {
            return Err(WorkflowError::PreconditionFailed {
                operation,
                current: dossier.statut,
            });
        }
        Ok(dossier)
    }

    /// The ordonnateur-stage gate: the synthesis row must exist (its absence
    /// is `MissingSynthesis`, distinct from an unapproved one) and carry
    /// statut VALIDÉ.
    async fn require_synthese_validee(
        &self,
        dossier_id: Uuid,
    ) -> Result<SyntheseVerification, WorkflowError> {
        let synthese = synthese::get_synthesis(self.store.as_ref(), dossier_id)
            .await?
            .ok_or(WorkflowError::MissingSynthesis)?;
        if synthese.statut != SyntheseStatut::Valide {
            return Err(WorkflowError::SynthesisNotApproved {
                statut: synthese.statut,
            });
        }
        Ok(synthese)
    }

    async fn generate_quitus(
        &self,
        dossier: &Dossier,
        synthese: &SyntheseVerification,
    ) -> Result<Quitus, StoreError> {
        let numero_quitus = quitus::generate_numero(&dossier.numero_dossier);
        let quitus = Quitus::seal(QuitusContenu {
            numero_quitus,
            numero_dossier: dossier.numero_dossier.clone(),
            date_generation: Utc::now(),
            beneficiaire: dossier.beneficiaire.clone(),
            montant_ordonnance: dossier.montant_ordonnance,
            conforme: synthese.verifications_rejetees == 0,
        });
        self.store.insert_quitus(&quitus).await?;
        tracing::info!(
            dossier_id = %dossier.id,
            numero_quitus = quitus.numero(),
            hash = %quitus.hash,
            "quitus sealed"
        );
        Ok(quitus)
    }
}

fn authorize(
    ctx: &RequestContext,
    operation: &'static str,
    allowed: &[Role],
) -> Result<(), WorkflowError> {
    if ctx.has_any_role(allowed) {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized {
            role: ctx.role,
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn engine() -> TransitionEngine {
        TransitionEngine::new(Arc::new(MemoryStore::new()))
    }

    fn ctx(role: Role) -> RequestContext {
        RequestContext::new(Uuid::new_v4(), role)
    }

    fn draft_input() -> NewDossier {
        NewDossier {
            objet_operation: "Achat de fournitures".into(),
            beneficiaire: "Fournisseur SARL".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_requires_secretaire_role() {
        let engine = engine();
        let err = engine
            .create(&ctx(Role::Ordonnateur), draft_input())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized { .. }));

        // Admin is a superset of every role.
        assert!(engine.create(&ctx(Role::Admin), draft_input()).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_from_brouillon_only() {
        let engine = engine();
        let secretaire = ctx(Role::Secretaire);
        let dossier = engine.create(&secretaire, draft_input()).await.unwrap();

        let outcome = engine.submit(&secretaire, dossier.id).await.unwrap();
        assert_eq!(outcome.dossier.statut, DossierStatut::EnAttente);

        // Second submit: statut is no longer BROUILLON.
        let err = engine.submit(&secretaire, dossier.id).await.unwrap_err();
        match err {
            WorkflowError::PreconditionFailed { current, .. } => {
                assert_eq!(current, DossierStatut::EnAttente)
            }
            other => panic!("expected PreconditionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_dossier_is_not_found() {
        let engine = engine();
        let err = engine
            .submit(&ctx(Role::Secretaire), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound));
    }

    #[tokio::test]
    async fn test_update_fields_empty_statuses() {
        let engine = engine();
        let secretaire = ctx(Role::Secretaire);
        let dossier = engine.create(&secretaire, draft_input()).await.unwrap();

        let outcome = engine
            .update_fields(
                &secretaire,
                dossier.id,
                DossierUpdate {
                    beneficiaire: Some("Autre SARL".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.dossier.beneficiaire, "Autre SARL");
        assert_eq!(outcome.dossier.statut, DossierStatut::Brouillon);
    }
}
