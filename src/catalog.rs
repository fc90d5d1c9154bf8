use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Placeholder replaced with the target machine's host in network benchmarks.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Turns ping's rtt summary into a RESULT line in seconds. Exits non-zero when no
/// summary is printed, so total packet loss or an unresolvable host fails the benchmark.
const PING_SUMMARY_AWK: &str = r#"awk -F'/' '/^(rtt|round-trip)/ {printf "RESULT:network_latency:%.6f\n", $5 / 1000; found=1} END {exit !found}'"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkKind {
    #[default]
    Command,
    /// Timed from the orchestrator: connect plus a no-op command.
    SshOverhead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
    #[serde(default)]
    pub run_command: String,
    #[serde(default)]
    pub needs_target: bool,
    #[serde(default)]
    pub kind: BenchmarkKind,
}

impl BenchmarkDefinition {
    /// Command line for this benchmark, with `{target}` filled in when a target is given.
    pub fn command_for(&self, target_host: Option<&str>) -> String {
        match target_host {
            Some(host) => self.run_command.replace(TARGET_PLACEHOLDER, host),
            None => self.run_command.clone(),
        }
    }
}

/// Public listing shape (no commands).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub needs_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
    pub benchmarks: Vec<BenchmarkDefinition>,
}

impl BenchmarkCatalog {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog: BenchmarkCatalog = serde_json::from_str(&contents)
            .with_context(|| format!("Catalog {} is invalid JSON", path.display()))?;
        tracing::info!(
            path = %path.display(),
            benchmarks = catalog.benchmarks.len(),
            "loaded benchmark catalog"
        );
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&BenchmarkDefinition> {
        self.benchmarks.iter().find(|def| def.id == id)
    }

    pub fn summaries(&self) -> Vec<BenchmarkSummary> {
        self.benchmarks
            .iter()
            .map(|def| BenchmarkSummary {
                id: def.id.clone(),
                name: def.name.clone(),
                category: def.category.clone(),
                description: def.description.clone(),
                needs_target: def.needs_target,
            })
            .collect()
    }

    pub fn builtin() -> Self {
        let def = |id: &str,
                   name: &str,
                   category: &str,
                   description: &str,
                   setup: Option<&str>,
                   run: &str| BenchmarkDefinition {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            setup_command: setup.map(str::to_string),
            run_command: run.to_string(),
            needs_target: false,
            kind: BenchmarkKind::Command,
        };

        let mut benchmarks = vec![
            def(
                "python_ml_training",
                "Python ML Training",
                "python",
                "Random forest cross-validation with scikit-learn",
                None,
                "python3 python/ml_training.py",
            ),
            def(
                "python_data_processing",
                "Python Data Processing",
                "python",
                "pandas group-by and join workload",
                None,
                "python3 python/data_processing.py",
            ),
            def(
                "python_async_io",
                "Python Async I/O",
                "python",
                "aiohttp server under 10k concurrent requests",
                None,
                "python3 python/async_io.py",
            ),
            def(
                "rust_matrix_multiply",
                "Rust Matrix Multiply",
                "rust",
                "Dense matrix multiplication",
                Some("cd rust/matrix_multiply && cargo build --release --quiet"),
                "cd rust/matrix_multiply && cargo run --release --quiet",
            ),
            def(
                "rust_web_server_load",
                "Rust Web Server Load",
                "rust",
                "Local HTTP server load test",
                Some("cd rust/web_server_load && cargo build --release --quiet"),
                "cd rust/web_server_load && cargo run --release --quiet",
            ),
            def(
                "rust_compile_bench",
                "Rust Compile",
                "rust",
                "Clean release build of a small crate",
                None,
                "cd rust/compile_bench && cargo clean --quiet && cargo build --release --quiet",
            ),
            def(
                "cpp_raytracer",
                "C++ Raytracer",
                "cpp",
                "Single-threaded raytracer",
                Some("g++ -O2 -o cpp/raytracer cpp/raytracer.cpp"),
                "./cpp/raytracer",
            ),
            def(
                "cpp_sorting",
                "C++ Parallel Sorting",
                "cpp",
                "Parallel sort of a large integer array",
                Some("g++ -O2 -pthread -o cpp/sorting cpp/sorting.cpp"),
                "./cpp/sorting",
            ),
            def(
                "cpp_compile_bench",
                "C++ Compile",
                "cpp",
                "Compile and run a multi-file C++ project",
                None,
                "cd cpp/compile_bench && g++ -O2 -o compile_bench main.cpp math_lib.cpp container_lib.cpp string_lib.cpp && ./compile_bench",
            ),
        ];

        let mut latency = def(
            "network_latency",
            "Network Latency",
            "network",
            "Average ICMP round trip to the peer machine",
            None,
            &format!("ping -c 10 {TARGET_PLACEHOLDER} | {PING_SUMMARY_AWK}"),
        );
        latency.needs_target = true;
        benchmarks.push(latency);

        let mut overhead = def(
            "ssh_overhead",
            "SSH Overhead",
            "network",
            "Connect plus no-op command round trip",
            None,
            "true",
        );
        overhead.needs_target = true;
        overhead.kind = BenchmarkKind::SshOverhead;
        benchmarks.push(overhead);

        Self {
            setup_command: Some(
                "python3 -m pip install --user --quiet numpy pandas scikit-learn aiohttp".to_string(),
            ),
            benchmarks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn target_placeholder_is_substituted() {
        let catalog = BenchmarkCatalog::builtin();
        let latency = catalog.get("network_latency").expect("network_latency");
        let command = latency.command_for(Some("10.0.0.7"));
        assert!(command.starts_with("ping -c 10 10.0.0.7 "));
        assert!(!command.contains(TARGET_PLACEHOLDER));
    }

    fn summarize_ping(output: &str) -> Option<(bool, String)> {
        let script = format!("printf '%s' \"$PING_OUTPUT\" | {PING_SUMMARY_AWK}");
        let out = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .env("PING_OUTPUT", output)
            .output()
            .ok()?;
        Some((out.status.success(), String::from_utf8_lossy(&out.stdout).into_owned()))
    }

    #[test]
    fn ping_summary_requires_round_trip_line() {
        let healthy = "64 bytes from 10.0.0.7: icmp_seq=1 ttl=64 time=0.412 ms\n\
                       --- 10.0.0.7 ping statistics ---\n\
                       10 packets transmitted, 10 received, 0% packet loss, time 9012ms\n\
                       rtt min/avg/max/mdev = 0.301/0.412/0.530/0.061 ms\n";
        let Some((ok, stdout)) = summarize_ping(healthy) else {
            return;
        };
        assert!(ok);
        assert_eq!(
            crate::services::runs::parse::parse_result(&stdout, "network_latency"),
            Some(0.000412)
        );

        let bsd = "round-trip min/avg/max/stddev = 1.000/2.000/3.000/0.500 ms\n";
        let (ok, stdout) = summarize_ping(bsd).unwrap();
        assert!(ok);
        assert!(stdout.starts_with("RESULT:network_latency:0.002000"));

        let lossy = "--- 10.0.0.7 ping statistics ---\n\
                     10 packets transmitted, 0 received, 100% packet loss, time 9208ms\n";
        for output in [lossy, ""] {
            let (ok, stdout) = summarize_ping(output).unwrap();
            assert!(!ok, "summary of {output:?} should fail");
            assert!(!stdout.contains("RESULT:"));
        }
    }

    #[test]
    fn builtin_ids_are_unique() {
        let catalog = BenchmarkCatalog::builtin();
        let mut ids: Vec<_> = catalog.benchmarks.iter().map(|b| b.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(
            catalog.get("ssh_overhead").map(|b| b.kind),
            Some(BenchmarkKind::SshOverhead)
        );
    }

    #[test]
    fn load_reads_json_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "setupCommand": "make deps",
                "benchmarks": [
                    {{"id": "noop", "name": "Noop", "category": "system", "runCommand": "true"}}
                ]
            }}"#
        )
        .unwrap();
        let catalog = BenchmarkCatalog::load(Some(file.path())).unwrap();
        assert_eq!(catalog.setup_command.as_deref(), Some("make deps"));
        let noop = catalog.get("noop").unwrap();
        assert!(!noop.needs_target);
        assert_eq!(noop.kind, BenchmarkKind::Command);
        assert_eq!(catalog.summaries().len(), 1);
    }
}
