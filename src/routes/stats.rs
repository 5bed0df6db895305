use axum::{Json, extract::State};

use crate::common::AppState;
use crate::error::AppResult;
use crate::storage::{self, StorageStats};

/// Row counts and file size of the store.
pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<StorageStats>> {
    let stats = storage::stats(&state.db, Some(&state.config.database_path)).await?;
    Ok(Json(stats))
}
