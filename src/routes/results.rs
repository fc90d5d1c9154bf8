use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::internal_error;
use crate::services::runs::RunResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/results", get(list_results).delete(clear_results))
}

pub(crate) async fn list_results(
    State(state): State<AppState>,
) -> Result<Json<Vec<RunResult>>, (StatusCode, String)> {
    let results = state.runs.results().list().await.map_err(internal_error)?;
    Ok(Json(results))
}

pub(crate) async fn clear_results(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.runs.results().clear().await.map_err(internal_error)?;
    tracing::info!("result history cleared");
    Ok(StatusCode::NO_CONTENT)
}
