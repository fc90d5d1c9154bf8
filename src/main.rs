use anyhow::{Context, Result};
use bench_orchestrator::services::runs::ssh::Ssh2Shell;
use bench_orchestrator::{cli, config, routes, state};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind bench-orchestrator listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to bind bench-orchestrator listener on {addr}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = config::OrchestratorConfig::from_env()?;
    config.apply_args(&args);
    if !config.benchmarks_dir.is_dir() {
        tracing::warn!(
            path = %config.benchmarks_dir.display(),
            "benchmark directory not found; deployments will fail until it exists"
        );
    }

    let state = state::AppState::new(config.clone(), Arc::new(Ssh2Shell))?;
    let runs = state.runs.clone();
    tracing::info!(
        machines = state.machines.list().len(),
        benchmarks = runs.catalog().benchmarks.len(),
        results = %runs.results().path().display(),
        "state loaded"
    );

    let app = routes::router(state);
    let addr = config.bind_addr();
    let listener = bind_listener(&addr).await?;
    tracing::info!(bind = %addr, "bench-orchestrator listening");

    let mut http_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!(active = runs.active_runs().len(), "shutdown signal received; aborting runs");
        }
        served = &mut http_handle => {
            served.context("HTTP server task failed")??;
        }
    }

    runs.abort_all();
    // Aborted runs still persist their partial results before deregistering.
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while !runs.active_runs().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    http_handle.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;
    use anyhow::Result;

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                // Sandbox environments can block binding attempts.
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        let message = err.to_string().to_lowercase();
        if message.contains("operation not permitted") {
            return Ok(());
        }
        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));

        drop(listener);
        Ok(())
    }
}
