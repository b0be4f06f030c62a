//! Validation Gate Evaluator
//!
//! Pure decision function over persisted validation evidence: both the
//! operation-type check and the fond controls must have at least one
//! recorded row before the CB may validate. This evaluator is the single
//! authoritative gate path.
//!
//! Fail-closed: a store failure marks the affected gate unsatisfied and is
//! reported as a distinct verification error, so callers can tell
//! infrastructure failure apart from incomplete workflow.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::DossierStore;

/// Role-readable label for the operation-type gate.
pub const LABEL_TYPE_OPERATION: &str = "Validation du type d'opération";
/// Role-readable label for the fond-controls gate.
pub const LABEL_CONTROLES_FOND: &str = "Contrôles de fond";
/// Label reported when a gate could not be checked at all.
pub const LABEL_ERREUR_VERIFICATION: &str = "Erreur de vérification";

/// Result of evaluating the CB-stage gates for one dossier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GateReport {
    pub has_operation_type_validation: bool,
    pub has_controles_fond_validation: bool,
    /// True only when both gates are satisfied and every check could be
    /// performed.
    pub can_validate: bool,
    /// Fixed labels for unmet gates, in fixed order: operation type first,
    /// fond controls second.
    pub missing_validations: Vec<String>,
    /// Infrastructure failures encountered while checking. Non-empty means
    /// the report is fail-closed, not a statement about workflow progress.
    pub verification_errors: Vec<String>,
}

impl GateReport {
    pub fn infrastructure_failed(&self) -> bool {
        !self.verification_errors.is_empty()
    }
}

/// Evaluates the CB-stage validation gates. Read-only and idempotent.
pub struct GateEvaluator {
    store: Arc<dyn DossierStore>,
}

impl GateEvaluator {
    pub fn new(store: Arc<dyn DossierStore>) -> Self {
        Self { store }
    }

    /// Evaluate both gates for a dossier. A dossier id with no records
    /// simply yields an unsatisfied report; existence of the dossier itself
    /// is the caller's concern.
    pub async fn evaluate(&self, dossier_id: Uuid) -> GateReport {
        let mut report = GateReport::default();

        match self.store.count_operation_type_validations(dossier_id).await {
            Ok(count) => report.has_operation_type_validation = count > 0,
            Err(e) => {
                tracing::error!(%dossier_id, error = %e, "operation-type gate check failed");
                report
                    .verification_errors
                    .push(LABEL_ERREUR_VERIFICATION.to_string());
            }
        }

        match self.store.count_controle_fond_validations(dossier_id).await {
            Ok(count) => report.has_controles_fond_validation = count > 0,
            Err(e) => {
                tracing::error!(%dossier_id, error = %e, "fond-controls gate check failed");
                report
                    .verification_errors
                    .push(LABEL_ERREUR_VERIFICATION.to_string());
            }
        }

        if !report.has_operation_type_validation {
            report
                .missing_validations
                .push(LABEL_TYPE_OPERATION.to_string());
        }
        if !report.has_controles_fond_validation {
            report
                .missing_validations
                .push(LABEL_CONTROLES_FOND.to_string());
        }

        report.can_validate = report.has_operation_type_validation
            && report.has_controles_fond_validation
            && report.verification_errors.is_empty();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dossier::{ControleFondValidation, OperationTypeValidation};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_no_records_means_both_gates_missing_in_order() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = GateEvaluator::new(store);
        let report = evaluator.evaluate(Uuid::new_v4()).await;

        assert!(!report.can_validate);
        assert_eq!(
            report.missing_validations,
            vec![
                LABEL_TYPE_OPERATION.to_string(),
                LABEL_CONTROLES_FOND.to_string()
            ]
        );
        assert!(report.verification_errors.is_empty());
    }

    #[tokio::test]
    async fn test_both_gates_satisfied_by_one_record_each() {
        let store = Arc::new(MemoryStore::new());
        let dossier_id = Uuid::new_v4();
        store
            .insert_operation_type_validation(&OperationTypeValidation::new(
                dossier_id,
                Uuid::new_v4(),
                None,
            ))
            .await
            .unwrap();
        store
            .insert_controle_fond_validation(&ControleFondValidation::new(
                dossier_id,
                Uuid::new_v4(),
                true,
            ))
            .await
            .unwrap();

        let evaluator = GateEvaluator::new(store);
        let report = evaluator.evaluate(dossier_id).await;
        assert!(report.can_validate);
        assert!(report.missing_validations.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fond_control_still_satisfies_gate() {
        // Existence-only semantics: the valide flag is advisory.
        let store = Arc::new(MemoryStore::new());
        let dossier_id = Uuid::new_v4();
        store
            .insert_operation_type_validation(&OperationTypeValidation::new(
                dossier_id,
                Uuid::new_v4(),
                None,
            ))
            .await
            .unwrap();
        store
            .insert_controle_fond_validation(&ControleFondValidation::new(
                dossier_id,
                Uuid::new_v4(),
                false,
            ))
            .await
            .unwrap();

        let evaluator = GateEvaluator::new(store);
        assert!(evaluator.evaluate(dossier_id).await.can_validate);
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let dossier_id = Uuid::new_v4();
        store
            .insert_operation_type_validation(&OperationTypeValidation::new(
                dossier_id,
                Uuid::new_v4(),
                None,
            ))
            .await
            .unwrap();

        let evaluator = GateEvaluator::new(store);
        let first = evaluator.evaluate(dossier_id).await;
        let second = evaluator.evaluate(dossier_id).await;
        assert_eq!(first.can_validate, second.can_validate);
        assert_eq!(first.missing_validations, second.missing_validations);
        assert_eq!(
            first.has_operation_type_validation,
            second.has_operation_type_validation
        );
    }
}
