use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRunsResponse {
    pub active: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/runs", get(list_active_runs))
}

pub(crate) async fn list_active_runs(State(state): State<AppState>) -> Json<ActiveRunsResponse> {
    Json(ActiveRunsResponse {
        active: state.runs.active_runs(),
    })
}
