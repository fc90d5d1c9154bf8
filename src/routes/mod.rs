pub mod benchmarks;
pub mod health;
pub mod machines;
pub mod results;
pub mod runs;
pub mod ws;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
            HeaderValue::from_static("http://localhost:5173"),
        ])
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(ws::router())
        .nest(
            "/api",
            Router::new()
                .merge(machines::router())
                .merge(benchmarks::router())
                .merge(results::router())
                .merge(runs::router()),
        )
        .layer(cors)
        .with_state(state)
}
