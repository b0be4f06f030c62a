//! REST API routes (`server` feature)
//!
//! Thin HTTP surface over the transition engine and quitus service.
//!
//! Authentication is out of scope: a middleware layer upstream resolves the
//! caller and injects a [`RequestContext`] extension; the one route without
//! it is the public quitus verification endpoint, whose path and query
//! shape (`/verify-quitus/{numero}?hash=...`) are wire contract; QR codes
//! in circulation embed them.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::dossier::{DossierUpdate, NewDossier};
use crate::effects::{dispatch_all, EffectSink, TracingSink};
use crate::engine::{TransitionEngine, TransitionOutcome};
use crate::quitus::{QuitusService, Requester};
use crate::store::DossierStore;
use crate::WorkflowError;

/// Shared state for the workflow routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransitionEngine>,
    pub quitus: Arc<QuitusService>,
    pub sink: Arc<dyn EffectSink>,
}

impl AppState {
    pub fn new(store: Arc<dyn DossierStore>) -> Self {
        Self {
            engine: Arc::new(TransitionEngine::new(store.clone())),
            quitus: Arc::new(QuitusService::new(store)),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EffectSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Build the workflow router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/dossiers", post(create_dossier))
        .route("/api/dossiers/:id", get(get_dossier_status))
        .route("/api/dossiers/:id", patch(update_dossier))
        .route("/api/dossiers/:id/submit", post(submit))
        .route("/api/dossiers/:id/validate-cb", post(validate_cb))
        .route("/api/dossiers/:id/reject-cb", post(reject_cb))
        .route(
            "/api/dossiers/:id/validate-ordonnateur",
            post(validate_ordonnateur),
        )
        .route(
            "/api/dossiers/:id/validate-definitif",
            post(validate_definitif),
        )
        // Public verification endpoint; exact path shape is wire contract.
        .route("/verify-quitus/:numero_quitus", get(verify_quitus))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_validations: Option<Vec<String>>,
}

fn error_response(err: WorkflowError) -> (StatusCode, Json<ErrorBody>) {
    let (status, missing) = match &err {
        WorkflowError::NotFound => (StatusCode::NOT_FOUND, None),
        WorkflowError::PreconditionFailed { .. }
        | WorkflowError::MissingSynthesis
        | WorkflowError::SynthesisNotApproved { .. }
        | WorkflowError::DuplicateSynthesis { .. } => (StatusCode::CONFLICT, None),
        WorkflowError::GateNotSatisfied { missing } => {
            (StatusCode::CONFLICT, Some(missing.clone()))
        }
        WorkflowError::Unauthorized { .. } => (StatusCode::FORBIDDEN, None),
        WorkflowError::GateCheckFailed
        | WorkflowError::QuitusSealFailed { .. }
        | WorkflowError::Artifact(_)
        | WorkflowError::Store(_) => {
            // Full detail stays in the server log.
            tracing::error!(error = %err, "request failed on infrastructure");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal error".to_string(),
                    missing_validations: None,
                }),
            );
        }
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            missing_validations: missing,
        }),
    )
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorBody>)>;

fn spawn_effects(state: &AppState, outcome: &TransitionOutcome) {
    let sink = state.sink.clone();
    let effects = outcome.effects.clone();
    tokio::spawn(async move {
        dispatch_all(sink.as_ref(), &effects).await;
    });
}

async fn create_dossier(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(input): Json<NewDossier>,
) -> ApiResult<crate::Dossier> {
    let dossier = state
        .engine
        .create(&ctx, input)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(dossier)))
}

async fn get_dossier_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<crate::engine::DossierStatus> {
    let status = state.engine.get_status(id).await.map_err(error_response)?;
    Ok((StatusCode::OK, Json(status)))
}

async fn update_dossier(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(update): Json<DossierUpdate>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state
        .engine
        .update_fields(&ctx, id, update)
        .await
        .map_err(error_response)?;
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

async fn submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state.engine.submit(&ctx, id).await.map_err(error_response)?;
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

async fn validate_cb(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state
        .engine
        .cb_validate(&ctx, id)
        .await
        .map_err(error_response)?;
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

/// Rejection body carrying the CB's comment.
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub commentaire: Option<String>,
}

async fn reject_cb(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectRequest>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state
        .engine
        .cb_reject(&ctx, id, body.commentaire)
        .await
        .map_err(error_response)?;
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

async fn validate_ordonnateur(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state
        .engine
        .ordonnateur_validate(&ctx, id)
        .await
        .map_err(error_response)?;
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

/// Final validation body carrying the AC's comment.
#[derive(Debug, Default, Deserialize)]
pub struct FinalValidateRequest {
    #[serde(default)]
    pub commentaire: Option<String>,
}

async fn validate_definitif(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<FinalValidateRequest>,
) -> ApiResult<TransitionOutcome> {
    let outcome = match state.engine.final_validate(&ctx, id, body.commentaire).await {
        Ok(outcome) => outcome,
        // The transition landed even though sealing failed: dispatch the
        // committed effects before reporting the error.
        Err(WorkflowError::QuitusSealFailed {
            dossier_id,
            effects,
            source,
        }) => {
            let sink = state.sink.clone();
            tokio::spawn(async move {
                dispatch_all(sink.as_ref(), &effects).await;
            });
            return Err(error_response(WorkflowError::QuitusSealFailed {
                dossier_id,
                effects: Vec::new(),
                source,
            }));
        }
        Err(err) => return Err(error_response(err)),
    };
    spawn_effects(&state, &outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub hash: Option<String>,
}

async fn verify_quitus(
    State(state): State<AppState>,
    Path(numero_quitus): Path<String>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> ApiResult<crate::quitus::VerificationOutcome> {
    let Some(hash) = query.hash else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "missing hash parameter".to_string(),
                missing_validations: None,
            }),
        ));
    };

    let requester = Requester {
        ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let outcome = state
        .quitus
        .verify_by_numero(&numero_quitus, &hash, requester)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let store: Arc<dyn DossierStore> = Arc::new(MemoryStore::new());
        create_router(AppState::new(store))
    }

    #[tokio::test]
    async fn test_verify_quitus_without_hash_is_bad_request() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/verify-quitus/QUITUS-X-2025-001-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_verify_quitus_unknown_numero_is_not_found() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/verify-quitus/QUITUS-X-2025-001-1?hash=ABCD1234ABCD1234")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_dossier_via_router() {
        let ctx = RequestContext::new(Uuid::new_v4(), Role::Secretaire);
        let body = serde_json::json!({
            "objet_operation": "Achat de fournitures",
            "beneficiaire": "Fournisseur SARL"
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/dossiers")
            .header("content-type", "application/json")
            .extension(ctx)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
