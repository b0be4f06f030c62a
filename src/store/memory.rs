//! In-memory store backend.
//!
//! Backs tests and POC runs. All maps behind `tokio::sync::RwLock`; the
//! conditional transition write holds the write lock for the whole
//! check-and-set, which gives the same atomicity the Postgres backend gets
//! from a single conditional UPDATE.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dossier::{
    ControleFondValidation, Dossier, DossierUpdate, OperationTypeValidation, StatutChange,
};
use crate::quitus::{Quitus, QuitusVerification};
use crate::statut::DossierStatut;
use crate::synthese::SyntheseVerification;

use super::{DossierStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    dossiers: RwLock<HashMap<Uuid, Dossier>>,
    operation_type_validations: RwLock<Vec<OperationTypeValidation>>,
    controle_fond_validations: RwLock<Vec<ControleFondValidation>>,
    syntheses: RwLock<HashMap<Uuid, SyntheseVerification>>,
    quitus: RwLock<HashMap<String, Quitus>>,
    quitus_verifications: RwLock<Vec<QuitusVerification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DossierStore for MemoryStore {
    async fn insert_dossier(&self, dossier: &Dossier) -> Result<(), StoreError> {
        let mut dossiers = self.dossiers.write().await;
        if dossiers
            .values()
            .any(|d| d.numero_dossier == dossier.numero_dossier)
        {
            return Err(StoreError::Conflict(format!(
                "numero_dossier already exists: {}",
                dossier.numero_dossier
            )));
        }
        dossiers.insert(dossier.id, dossier.clone());
        Ok(())
    }

    async fn load_dossier(&self, id: Uuid) -> Result<Option<Dossier>, StoreError> {
        Ok(self.dossiers.read().await.get(&id).cloned())
    }

    async fn find_dossier_by_numero(&self, numero: &str) -> Result<Option<Dossier>, StoreError> {
        Ok(self
            .dossiers
            .read()
            .await
            .values()
            .find(|d| d.numero_dossier == numero)
            .cloned())
    }

    async fn transition_dossier(
        &self,
        id: Uuid,
        expected: DossierStatut,
        change: StatutChange,
    ) -> Result<Option<Dossier>, StoreError> {
        let mut dossiers = self.dossiers.write().await;
        match dossiers.get_mut(&id) {
            Some(dossier) if dossier.statut == expected => {
                change.apply_to(dossier);
                Ok(Some(dossier.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_dossier_fields(
        &self,
        id: Uuid,
        editable: &[DossierStatut],
        update: &DossierUpdate,
    ) -> Result<Option<Dossier>, StoreError> {
        let mut dossiers = self.dossiers.write().await;
        match dossiers.get_mut(&id) {
            Some(dossier) if editable.contains(&dossier.statut) => {
                update.apply_to(dossier);
                Ok(Some(dossier.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_operation_type_validation(
        &self,
        record: &OperationTypeValidation,
    ) -> Result<(), StoreError> {
        self.operation_type_validations
            .write()
            .await
            .push(record.clone());
        Ok(())
    }

    async fn insert_controle_fond_validation(
        &self,
        record: &ControleFondValidation,
    ) -> Result<(), StoreError> {
        self.controle_fond_validations
            .write()
            .await
            .push(record.clone());
        Ok(())
    }

    async fn count_operation_type_validations(
        &self,
        dossier_id: Uuid,
    ) -> Result<u64, StoreError> {
        Ok(self
            .operation_type_validations
            .read()
            .await
            .iter()
            .filter(|r| r.dossier_id == dossier_id)
            .count() as u64)
    }

    async fn count_controle_fond_validations(&self, dossier_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .controle_fond_validations
            .read()
            .await
            .iter()
            .filter(|r| r.dossier_id == dossier_id)
            .count() as u64)
    }

    async fn load_syntheses(
        &self,
        dossier_id: Uuid,
    ) -> Result<Vec<SyntheseVerification>, StoreError> {
        Ok(self
            .syntheses
            .read()
            .await
            .get(&dossier_id)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn upsert_synthese(&self, synthese: &SyntheseVerification) -> Result<(), StoreError> {
        self.syntheses
            .write()
            .await
            .insert(synthese.dossier_id, synthese.clone());
        Ok(())
    }

    async fn insert_quitus(&self, quitus: &Quitus) -> Result<(), StoreError> {
        let mut map = self.quitus.write().await;
        if map.contains_key(quitus.numero()) {
            return Err(StoreError::Conflict(format!(
                "quitus already exists: {}",
                quitus.numero()
            )));
        }
        map.insert(quitus.numero().to_string(), quitus.clone());
        Ok(())
    }

    async fn load_quitus(&self, numero_quitus: &str) -> Result<Option<Quitus>, StoreError> {
        Ok(self.quitus.read().await.get(numero_quitus).cloned())
    }

    async fn insert_quitus_verification(
        &self,
        verification: &QuitusVerification,
    ) -> Result<(), StoreError> {
        self.quitus_verifications
            .write()
            .await
            .push(verification.clone());
        Ok(())
    }

    async fn load_quitus_verifications(
        &self,
        numero_quitus: &str,
    ) -> Result<Vec<QuitusVerification>, StoreError> {
        Ok(self
            .quitus_verifications
            .read()
            .await
            .iter()
            .filter(|v| v.numero_quitus == numero_quitus)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dossier::NewDossier;

    fn draft() -> Dossier {
        Dossier::new_draft(
            NewDossier {
                objet_operation: "Objet".into(),
                beneficiaire: "Beneficiaire".into(),
                ..Default::default()
            },
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_transition_requires_expected_statut() {
        let store = MemoryStore::new();
        let dossier = draft();
        store.insert_dossier(&dossier).await.unwrap();

        // Wrong expectation: no write.
        let out = store
            .transition_dossier(
                dossier.id,
                DossierStatut::EnAttente,
                StatutChange::to(DossierStatut::ValideCb),
            )
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(
            store.load_dossier(dossier.id).await.unwrap().unwrap().statut,
            DossierStatut::Brouillon
        );

        // Matching expectation: committed.
        let out = store
            .transition_dossier(
                dossier.id,
                DossierStatut::Brouillon,
                StatutChange::to(DossierStatut::EnAttente),
            )
            .await
            .unwrap();
        assert_eq!(out.unwrap().statut, DossierStatut::EnAttente);
    }

    #[tokio::test]
    async fn test_numero_dossier_uniqueness_enforced() {
        let store = MemoryStore::new();
        let dossier = draft();
        store.insert_dossier(&dossier).await.unwrap();

        let mut duplicate = draft();
        duplicate.numero_dossier = dossier.numero_dossier.clone();
        let err = store.insert_dossier(&duplicate).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_fields_respects_editable_set() {
        let store = MemoryStore::new();
        let mut dossier = draft();
        dossier.statut = DossierStatut::ValideCb;
        store.insert_dossier(&dossier).await.unwrap();

        let update = DossierUpdate {
            beneficiaire: Some("Autre".into()),
            ..Default::default()
        };
        let out = store
            .update_dossier_fields(dossier.id, &[DossierStatut::Brouillon], &update)
            .await
            .unwrap();
        assert!(out.is_none());
    }
}
