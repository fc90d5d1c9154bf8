use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub http_host: String,
    pub http_port: u16,

    pub data_dir: PathBuf,
    pub benchmarks_dir: PathBuf,
    pub remote_dir: String,
    pub catalog_path: Option<PathBuf>,

    pub timeouts: PhaseTimeouts,
    pub event_buffer: usize,
}

/// Per-phase limits applied by the task sequencer.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimeouts {
    pub connect: Duration,
    pub deploy: Duration,
    pub setup: Duration,
    pub benchmark: Duration,
    pub network_benchmark: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            deploy: Duration::from_secs(300),
            setup: Duration::from_secs(300),
            benchmark: Duration::from_secs(600),
            network_benchmark: Duration::from_secs(120),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = PhaseTimeouts::default();

        let http_host = env_string("BENCH_HTTP_HOST", Some("127.0.0.1".to_string()))?;
        let http_port = env_u64("BENCH_HTTP_PORT", Some(3000))?;
        let http_port = u16::try_from(http_port).context("invalid BENCH_HTTP_PORT")?;

        let data_dir = PathBuf::from(env_string("BENCH_DATA_DIR", Some("./data".to_string()))?);
        let benchmarks_dir = PathBuf::from(env_string(
            "BENCH_BENCHMARKS_DIR",
            Some("./benchmarks".to_string()),
        )?);
        let remote_dir = env_string("BENCH_REMOTE_DIR", Some("remote-bench".to_string()))?;
        validate_dir_name(&remote_dir).context("invalid BENCH_REMOTE_DIR")?;
        let catalog_path = env_optional("BENCH_CATALOG_PATH").map(PathBuf::from);

        let timeouts = PhaseTimeouts {
            connect: env_seconds("BENCH_CONNECT_TIMEOUT_SECONDS", defaults.connect)?,
            deploy: env_seconds("BENCH_DEPLOY_TIMEOUT_SECONDS", defaults.deploy)?,
            setup: env_seconds("BENCH_SETUP_TIMEOUT_SECONDS", defaults.setup)?,
            benchmark: env_seconds("BENCH_BENCHMARK_TIMEOUT_SECONDS", defaults.benchmark)?,
            network_benchmark: env_seconds(
                "BENCH_NETWORK_TIMEOUT_SECONDS",
                defaults.network_benchmark,
            )?,
        };

        let event_buffer = env_u64("BENCH_EVENT_BUFFER", Some(1024))?.max(16) as usize;

        Ok(Self {
            http_host,
            http_port,
            data_dir,
            benchmarks_dir,
            remote_dir,
            catalog_path,
            timeouts,
            event_buffer,
        })
    }

    /// Command-line flags win over the environment.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            self.http_host = host.to_string();
        }
        if let Some(port) = args.port.filter(|v| *v != 0) {
            self.http_port = port;
        }
        if let Some(dir) = args.data_dir.as_ref() {
            self.data_dir = dir.clone();
        }
        if let Some(dir) = args.benchmarks_dir.as_ref() {
            self.benchmarks_dir = dir.clone();
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn machines_path(&self) -> PathBuf {
        self.data_dir.join("machines.json")
    }

    pub fn results_path(&self) -> PathBuf {
        self.data_dir.join("results.jsonl")
    }
}

pub(crate) fn validate_dir_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("directory name is required"));
    }
    if trimmed.starts_with('.') {
        return Err(anyhow!("directory name must not start with '.'"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(anyhow!("directory name contains unsupported characters"));
    }
    Ok(())
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_seconds(key: &str, default: Duration) -> Result<Duration> {
    let secs = env_u64(key, Some(default.as_secs()))?;
    if secs == 0 {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
