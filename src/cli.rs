use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bench-orchestrator",
    version,
    about = "Run benchmarks on remote machines over SSH"
)]
pub struct Args {
    /// Address to bind (overrides BENCH_HTTP_HOST)
    #[arg(long)]
    pub host: Option<String>,
    /// Port to bind (overrides BENCH_HTTP_PORT)
    #[arg(long)]
    pub port: Option<u16>,
    /// Directory for the machine registry and result log
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Local benchmark tree deployed to every machine
    #[arg(long)]
    pub benchmarks_dir: Option<PathBuf>,
}
