use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::ServerState;

use super::{analytics, emails, queue_stats};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        Router::new()
            .route("/", get(|| async { "Triagedesk server" }))
            .nest(
                "/api",
                Router::new()
                    .route("/emails", get(emails::get_all).post(emails::create))
                    .route("/emails/sync", post(emails::sync_demo))
                    .route("/emails/:id", get(emails::get_by_id))
                    .route(
                        "/emails/:id/generate-response",
                        post(emails::generate_response),
                    )
                    .route("/emails/:id/send", post(emails::send))
                    .route("/emails/:id/enqueue", post(emails::enqueue))
                    .route("/queue/stats", get(queue_stats::get_stats))
                    .route("/analytics", get(analytics::get_analytics)),
            )
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
