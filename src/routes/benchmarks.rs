use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::catalog::BenchmarkSummary;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/benchmarks", get(list_benchmarks))
}

pub(crate) async fn list_benchmarks(State(state): State<AppState>) -> Json<Vec<BenchmarkSummary>> {
    Json(state.runs.catalog().summaries())
}
