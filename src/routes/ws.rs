use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::services::runs::{Event, RunRequest};
use crate::state::AppState;

/// Control messages accepted on the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    TestConnection { machine_id: String },
    RunBenchmarks(RunRequest),
    Abort { run_id: String },
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.runs.emitter().subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Event>();
    tracing::debug!("observer connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(event) => event,
                    None => break,
                },
                broadcast = events.recv() => match broadcast {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "observer lagged; oldest events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let reply = match message {
                Message::Text(text) => handle_text(&state, text.as_str()),
                Message::Close(_) => break,
                _ => None,
            };
            if let Some(event) = reply {
                if reply_tx.send(event).is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!("observer disconnected");
}

/// Handles one inbound frame. The returned event goes to the requesting socket only.
pub(crate) fn handle_text(state: &AppState, text: &str) -> Option<Event> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => dispatch(state, message),
        Err(err) => {
            tracing::debug!(error = %err, "malformed control message");
            Some(Event::Error {
                message: format!("Invalid message: {err}"),
            })
        }
    }
}

pub(crate) fn dispatch(state: &AppState, message: ClientMessage) -> Option<Event> {
    match message {
        ClientMessage::TestConnection { machine_id } => {
            let Some(machine) = state.machines.get(machine_id.trim()) else {
                return Some(Event::Error {
                    message: format!("Unknown machine {machine_id}"),
                });
            };
            let runs = state.runs.clone();
            tokio::spawn(async move {
                runs.test_connection(&machine).await;
            });
            None
        }
        ClientMessage::RunBenchmarks(request) => start_run(state, request),
        ClientMessage::Abort { run_id } => {
            state.runs.abort(run_id.trim());
            None
        }
    }
}

fn start_run(state: &AppState, mut request: RunRequest) -> Option<Event> {
    request.run_id = request.run_id.trim().to_string();
    if request.run_id.is_empty() {
        return Some(Event::Error {
            message: "runId is required".to_string(),
        });
    }
    let (machines, missing) = state.machines.resolve(&request.machine_ids);

    let run_id = request.run_id.clone();
    match state.runs.start_run(request, machines) {
        Ok(handle) => {
            // Only an accepted run gets these lines; a rejected id may belong to a live run.
            for machine_id in missing {
                tracing::warn!(run_id = %run_id, machine_id = %machine_id, "unknown machine dropped from run");
                state.runs.emitter().emit(Event::Output {
                    run_id: run_id.clone(),
                    machine_id: machine_id.clone(),
                    text: format!("Unknown machine {machine_id}; skipped\n"),
                });
            }
            tokio::spawn(async move {
                if let Err(err) = handle.await {
                    tracing::error!(run_id = %run_id, error = %err, "run task failed");
                }
            });
            None
        }
        Err(err) => {
            tracing::warn!(run_id = %run_id, error = %err, "run rejected");
            Some(Event::Error {
                message: err.to_string(),
            })
        }
    }
}
