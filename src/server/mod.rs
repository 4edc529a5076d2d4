//! HTTP ingress.
//!
//! Routes:
//!
//! - `POST /milestones` (and any method on `/`): create a milestone
//! - `GET /milestones/:id`: read one milestone
//! - `GET /health`: liveness
//! - `GET /metrics`: Prometheus text exposition
//!
//! Creation failures are logged and answered with a bare `500`; callers get
//! no structured error body.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::metrics::metrics_handler;
use crate::milestone::{Claimant, Milestone};
use crate::storage::MilestoneStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn MilestoneStore>,
    claimant: Claimant,
}

impl AppState {
    /// `claimant` is stamped on every milestone this server creates.
    pub fn new(store: Arc<dyn MilestoneStore>, claimant: Claimant) -> Self {
        Self { store, claimant }
    }
}

/// Body of a successful creation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMilestone {
    pub milestone_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", any(create_milestone))
        .route("/milestones", post(create_milestone))
        .route("/milestones/:id", get(get_milestone))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serves until `cancel` fires, then stops accepting connections and lets
/// open requests finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

pub async fn create_milestone(State(state): State<AppState>) -> Response {
    let milestone = Milestone::new(state.claimant.clone());

    match state.store.insert(&milestone).await {
        Ok(()) => {
            info!(milestone_id = %milestone.id, "Milestone created");
            (
                StatusCode::CREATED,
                Json(CreatedMilestone {
                    milestone_id: milestone.id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(milestone_id = %milestone.id, error = %e, "Failed to create milestone");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_milestone(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.fetch(&id).await {
        Ok(Some(milestone)) => Json(milestone).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(milestone_id = %id, error = %e, "Failed to read milestone");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestone::StageStatus;
    use crate::pipeline::{EligibilityQuery, Stage};
    use crate::storage::{InMemoryStore, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(store.clone(), Claimant::new("api-1", 77));

        let response = create_milestone(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreatedMilestone =
            serde_json::from_slice(&body_bytes(response).await).unwrap();

        let stored = store.get(&created.milestone_id).unwrap();
        assert_eq!(stored.claimant, Claimant::new("api-1", 77));
        assert_eq!(stored.retries, 0);
        for stage in Stage::ALL {
            assert_eq!(stored.status(stage), StageStatus::Pending);
        }

        let response = get_milestone(State(state), Path(created.milestone_id.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: Milestone = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_get_missing_is_404() {
        let state = AppState::new(Arc::new(InMemoryStore::new()), Claimant::new("h", 1));
        let response = get_milestone(State(state), Path("nope".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Store that rejects every write.
    struct BrokenStore;

    #[async_trait]
    impl MilestoneStore for BrokenStore {
        async fn insert(&self, _milestone: &Milestone) -> Result<(), StoreError> {
            Err(StoreError::ConnectionFailed("primary down".to_string()))
        }
        async fn fetch(&self, _id: &str) -> Result<Option<Milestone>, StoreError> {
            Err(StoreError::NoReplicas)
        }
        async fn eligible_rows(
            &self,
            _query: &EligibilityQuery,
        ) -> Result<Vec<crate::milestone::RowValues>, StoreError> {
            Ok(Vec::new())
        }
        async fn claim(
            &self,
            _query: &EligibilityQuery,
            _id: &str,
            _claimant: &Claimant,
            _started_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn record_success(
            &self,
            _stage: Stage,
            _id: &str,
            _ended_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn record_failure(
            &self,
            _stage: Stage,
            _id: &str,
            _error: &str,
            _ended_at: DateTime<Utc>,
        ) -> Result<Milestone, StoreError> {
            Err(StoreError::ConnectionFailed("primary down".to_string()))
        }
        async fn override_stage(
            &self,
            _stage: Stage,
            _id: &str,
            _operator: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn requeue_stage(&self, _stage: Stage, _id: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_bare_500() {
        let state = AppState::new(Arc::new(BrokenStore), Claimant::new("h", 1));

        let response = create_milestone(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_bytes(response).await.is_empty());

        let response = get_milestone(State(state), Path("x".to_string())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "ok");
    }
}
