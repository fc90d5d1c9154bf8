use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::error::internal_error;
use crate::machines::{MachineView, NewMachine};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/machines", get(list_machines).post(create_machine))
        .route("/machines/{id}", delete(delete_machine))
}

pub(crate) async fn list_machines(State(state): State<AppState>) -> Json<Vec<MachineView>> {
    Json(state.machines.list().iter().map(MachineView::from).collect())
}

pub(crate) async fn create_machine(
    State(state): State<AppState>,
    Json(payload): Json<NewMachine>,
) -> Result<(StatusCode, Json<MachineView>), (StatusCode, String)> {
    let machine = state
        .machines
        .create(payload)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    tracing::info!(machine_id = %machine.id, host = %machine.host, "machine registered");
    Ok((StatusCode::CREATED, Json(MachineView::from(&machine))))
}

pub(crate) async fn delete_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = state.machines.delete(id.trim()).map_err(internal_error)?;
    if !removed {
        return Err((StatusCode::NOT_FOUND, "Machine not found".to_string()));
    }
    tracing::info!(machine_id = %id.trim(), "machine removed");
    Ok(StatusCode::NO_CONTENT)
}
