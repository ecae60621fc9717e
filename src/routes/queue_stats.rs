use axum::{extract::State, Json};

use crate::{queue::QueueStats, ServerState};

/// Polled by the monitoring panel every few seconds.
pub async fn get_stats(State(state): State<ServerState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}
