use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{OrchestratorConfig, PhaseTimeouts};
use crate::error::SessionError;
use crate::machines::{Machine, MachineAuth};
use crate::services::runs::session::{ConnectionCloser, RemoteShell, ShellConnection};
use crate::state::AppState;

/// App state rooted in `dir` with the builtin catalog and a fake fleet.
pub fn test_state(dir: &Path, fake: &FakeShell) -> AppState {
    let benchmarks_dir = dir.join("benchmarks");
    std::fs::create_dir_all(benchmarks_dir.join("cpp")).unwrap();
    std::fs::write(benchmarks_dir.join("cpp/sorting.cpp"), "int main() {}\n").unwrap();
    let config = OrchestratorConfig {
        http_host: "127.0.0.1".to_string(),
        http_port: 0,
        data_dir: dir.join("data"),
        benchmarks_dir,
        remote_dir: "remote-bench".to_string(),
        catalog_path: None,
        timeouts: PhaseTimeouts::default(),
        event_buffer: 1024,
    };
    AppState::new(config, fake.shell()).unwrap()
}

pub fn test_machine(id: &str, host: &str) -> Machine {
    Machine {
        id: id.to_string(),
        name: format!("machine-{id}"),
        host: host.to_string(),
        port: 22,
        username: "bench".to_string(),
        auth: MachineAuth::Password {
            password: "pw".to_string(),
        },
    }
}

/// Canned behaviour for commands matching a pattern.
#[derive(Debug, Clone, Default)]
pub struct Script {
    chunks: Vec<String>,
    exit_code: i32,
    delay: Duration,
}

impl Script {
    pub fn output<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn sleep(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }
}

struct Rule {
    host: Option<String>,
    pattern: String,
    script: Script,
}

#[derive(Default)]
struct FakeState {
    rules: Vec<Rule>,
    unreachable: HashSet<String>,
    commands: Vec<(String, String)>,
    stdin_bytes: HashMap<String, usize>,
    connects: usize,
    closed: usize,
}

/// In-process stand-in for an SSH fleet. Unscripted commands succeed silently.
#[derive(Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<FakeState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shell(&self) -> Arc<dyn RemoteShell> {
        Arc::new(self.clone())
    }

    /// Applies to every host; the first matching rule wins, host rules before global ones.
    pub fn script(&self, pattern: &str, script: Script) {
        self.push_rule(None, pattern, script);
    }

    pub fn script_for(&self, host: &str, pattern: &str, script: Script) {
        self.push_rule(Some(host.to_string()), pattern, script);
    }

    pub fn unreachable(&self, host: &str) {
        self.state.lock().unwrap().unreachable.insert(host.to_string());
    }

    fn push_rule(&self, host: Option<String>, pattern: &str, script: Script) {
        self.state.lock().unwrap().rules.push(Rule {
            host,
            pattern: pattern.to_string(),
            script,
        });
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn stdin_bytes(&self, host: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .stdin_bytes
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn script_for_command(&self, host: &str, command: &str) -> Script {
        let state = self.state.lock().unwrap();
        let host_rule = state
            .rules
            .iter()
            .find(|rule| rule.host.as_deref() == Some(host) && command.contains(&rule.pattern));
        let global_rule = || {
            state
                .rules
                .iter()
                .find(|rule| rule.host.is_none() && command.contains(&rule.pattern))
        };
        host_rule
            .or_else(global_rule)
            .map(|rule| rule.script.clone())
            .unwrap_or_default()
    }
}

impl RemoteShell for FakeShell {
    fn connect(
        &self,
        machine: &Machine,
        _timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, SessionError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(&machine.host) {
            return Err(SessionError::Network(format!(
                "Failed to open TCP connection: {} refused",
                machine.host
            )));
        }
        state.connects += 1;
        Ok(Box::new(FakeConnection {
            host: machine.host.clone(),
            shell: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct FakeConnection {
    host: String,
    shell: FakeShell,
    closed: Arc<AtomicBool>,
}

impl FakeConnection {
    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Network("connection closed".to_string()));
        }
        Ok(())
    }
}

impl ShellConnection for FakeConnection {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<i32, SessionError> {
        self.check_open()?;
        {
            let mut state = self.shell.state.lock().unwrap();
            state.commands.push((self.host.clone(), command.to_string()));
            if let Some(payload) = stdin {
                *state.stdin_bytes.entry(self.host.clone()).or_default() += payload.len();
            }
        }
        let script = self.shell.script_for_command(&self.host, command);

        let started = Instant::now();
        while started.elapsed() < script.delay {
            self.check_open()?;
            std::thread::sleep(Duration::from_millis(5));
        }
        for chunk in &script.chunks {
            self.check_open()?;
            sink(chunk.as_bytes());
        }
        Ok(script.exit_code)
    }

    fn closer(&self) -> ConnectionCloser {
        let closed = self.closed.clone();
        let state = self.shell.state.clone();
        ConnectionCloser::new(move || {
            if !closed.swap(true, Ordering::SeqCst) {
                state.lock().unwrap().closed += 1;
            }
        })
    }

    fn host_key_fingerprint(&self) -> Option<String> {
        Some("SHA256:fake".to_string())
    }
}
