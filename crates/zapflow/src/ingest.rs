//! Trigger intake: the webhook that turns an external call into a run.
//!
//! The endpoint only records the run and its outbox marker. Execution
//! happens later, in the [`runtime`](crate::runtime), so callers learn
//! whether a trigger was accepted and nothing about how its steps went.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::model::{RunId, UserId, ZapId};
use crate::store::RunStore;

/// Why a trigger was not accepted.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No zap with this id belongs to the user.
    #[error("zap {zap_id} not found for user {user_id}")]
    NotFound { user_id: UserId, zap_id: ZapId },

    /// The zap exists but is switched off.
    #[error("zap {0} is inactive")]
    Inactive(ZapId),

    /// The run store failed; nothing was recorded.
    #[error(transparent)]
    Store(#[from] Error),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::NotFound { .. } | IngestError::Inactive(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "not found or inactive" })),
            )
                .into_response(),
            IngestError::Store(e) => {
                error!(error = %e, "Failed to record trigger");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Validates triggers and records them as runs.
#[derive(Debug, Clone)]
pub struct IngestService<S: RunStore> {
    store: S,
}

impl<S: RunStore> IngestService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Accept a trigger for `zap_id` on behalf of `user_id`.
    ///
    /// The zap must exist, belong to `user_id` and be active. On success the
    /// run and its outbox marker are written in one transaction and the new
    /// run id is returned without waiting for any step to execute. Rejected
    /// triggers write nothing.
    pub async fn ingest(
        &self,
        user_id: &UserId,
        zap_id: &ZapId,
        payload: Value,
    ) -> Result<RunId, IngestError> {
        let zap = self
            .store
            .find_zap(zap_id)
            .await?
            .filter(|zap| &zap.user_id == user_id)
            .ok_or_else(|| IngestError::NotFound {
                user_id: user_id.clone(),
                zap_id: zap_id.clone(),
            })?;

        if !zap.active {
            return Err(IngestError::Inactive(zap.id));
        }

        let run_id = self.store.create_run_with_marker(zap_id, payload).await?;
        info!(run_id = %run_id, zap_id = %zap_id, "Trigger accepted");
        Ok(run_id)
    }
}

/// HTTP routes for the ingestion service.
///
/// | Method | Path                                  |
/// |--------|---------------------------------------|
/// | `POST` | `/webhook/catch/:user_id/:zap_id`     |
/// | `GET`  | `/health`                             |
pub fn router<S: RunStore>(service: IngestService<S>) -> Router {
    Router::new()
        .route("/webhook/catch/:user_id/:zap_id", post(catch::<S>))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn catch<S: RunStore>(
    State(service): State<IngestService<S>>,
    Path((user_id, zap_id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, IngestError> {
    let run_id = service
        .ingest(&UserId::new(user_id), &ZapId::new(zap_id), payload)
        .await?;

    Ok(Json(json!({ "message": "received", "runId": run_id })))
}
