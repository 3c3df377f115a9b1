use axum::extract::State;

use crate::api::v1::dto::{ClassifierStatus, HealthData};
use crate::api::v1::response::ApiResponse;
use crate::api::AppState;

/// `GET /api/v1/health`
///
/// Reports overall service status plus the classifier backend's view of
/// itself. The service stays up (and keeps serving cached results) even
/// when the backend is unavailable; the status field reflects that as
/// "degraded".
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthData> {
    let health = state.engine.health();
    ApiResponse::success(HealthData {
        status: health.status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        classifier: ClassifierStatus {
            status: if health.available {
                "available".to_string()
            } else {
                "unavailable".to_string()
            },
            backend: health.backend,
            model: state.config.classifier.model.clone(),
        },
        supported_types: health.supported_types,
    })
}
