use axum::{
    routing::{get, post},
    Router,
};

use crate::api::state::AppState;

use super::handlers;

pub fn v1_router() -> Router<AppState> {
    let recognize = Router::new()
        .route("/{captchaType}", post(handlers::recognize::recognize_base64))
        .route("/{captchaType}/url", post(handlers::recognize::recognize_url))
        .route(
            "/{captchaType}/upload",
            post(handlers::recognize::recognize_upload),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .nest("/recognize", recognize)
}
