use axum::extract::State;
use chrono::Utc;

use crate::api::v1::dto::StatsData;
use crate::api::v1::response::ApiResponse;
use crate::api::AppState;

/// `GET /api/v1/stats`
///
/// Cache counters, in-flight recognition count, and per-operation latency
/// metrics over the recent window.
pub async fn get_stats(State(state): State<AppState>) -> ApiResponse<StatsData> {
    let stats = state.engine.stats();
    ApiResponse::success(StatsData {
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cache: stats.cache,
        inflight: stats.inflight,
        operations: stats.operations,
    })
}
