//! Side Effects
//!
//! The engine never performs notifications or cache invalidation inline: a
//! successful transition returns the effects to run, and a dispatcher
//! executes them after the commit. A failing sink is logged and dropped;
//! it can never roll back a committed transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured event emitted on successful final validation, fanned out to
/// the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalValidationNotice {
    pub dossier_id: Uuid,
    pub numero_dossier: String,
    pub objet_operation: String,
    pub beneficiaire: String,
    pub poste_comptable_id: Option<Uuid>,
    pub montant: Option<Decimal>,
    pub commentaire: Option<String>,
    pub validated_at: DateTime<Utc>,
}

/// A side effect produced by a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Effect {
    /// Fan out the final-validation event.
    Notification(FinalValidationNotice),
    /// Caches scoped to this dossier are stale.
    InvalidateCache { dossier_id: Uuid },
}

/// Executes effects after a transition has committed.
#[async_trait]
pub trait EffectSink: Send + Sync {
    /// Deliver one effect. Implementations own their error handling; a
    /// failure here must never surface into the transition result.
    async fn deliver(&self, effect: &Effect);
}

/// Default sink: structured log records only. Real deployments plug in a
/// notification dispatcher and cache layer here.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl EffectSink for TracingSink {
    async fn deliver(&self, effect: &Effect) {
        match effect {
            Effect::Notification(notice) => {
                tracing::info!(
                    dossier_id = %notice.dossier_id,
                    numero_dossier = %notice.numero_dossier,
                    beneficiaire = %notice.beneficiaire,
                    "final validation notification"
                );
            }
            Effect::InvalidateCache { dossier_id } => {
                tracing::info!(%dossier_id, "cache invalidation signal");
            }
        }
    }
}

/// Deliver all effects in order through one sink.
pub async fn dispatch_all(sink: &dyn EffectSink, effects: &[Effect]) {
    for effect in effects {
        sink.deliver(effect).await;
    }
}
