use axum::{extract::State, Json};

use crate::{error::AppJsonResult, storage::Analytics, ServerState};

pub async fn get_analytics(State(state): State<ServerState>) -> AppJsonResult<Analytics> {
    let analytics = state.store.analytics().await?;
    Ok(Json(analytics))
}
