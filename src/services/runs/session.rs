use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::machines::Machine;

/// Prints `key=value` lines describing the host; works on Linux and macOS.
pub(super) const INTROSPECTION_COMMAND: &str = "printf 'cores=%s\\n' \"$(nproc 2>/dev/null || sysctl -n hw.ncpu 2>/dev/null)\"; \
printf 'memory_kb=%s\\n' \"$(awk '/^MemTotal:/ {print $2}' /proc/meminfo 2>/dev/null || echo $(( $(sysctl -n hw.memsize 2>/dev/null || echo 0) / 1024 )))\"; \
printf 'os=%s\\n' \"$( (. /etc/os-release 2>/dev/null && echo \"$PRETTY_NAME\") || sw_vers -productName 2>/dev/null || uname -s)\"; \
printf 'kernel=%s\\n' \"$(uname -r)\"";

const NOOP_COMMAND: &str = "true";

/// Opens authenticated connections. Implementations block; callers run them on the blocking pool.
pub trait RemoteShell: Send + Sync + 'static {
    fn connect(
        &self,
        machine: &Machine,
        timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, SessionError>;
}

/// One open connection able to run one command.
pub trait ShellConnection: Send + 'static {
    /// Feeds `stdin` (if any), then streams combined stdout/stderr into `sink` until the
    /// command exits. Returns the exit status.
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<i32, SessionError>;

    /// Handle that tears the transport down from another thread.
    fn closer(&self) -> ConnectionCloser;

    fn host_key_fingerprint(&self) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct ConnectionCloser(Arc<dyn Fn() + Send + Sync>);

impl ConnectionCloser {
    pub fn new(close: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(close))
    }

    pub fn close(&self) {
        (self.0)();
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub captured: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub info: ConnectionInfo,
    pub connect_time: Duration,
}

/// Connected, not yet used. `exec` consumes it: one session runs exactly one command.
pub struct ConnectedSession {
    conn: Box<dyn ShellConnection>,
    closer: ConnectionCloser,
    machine_id: String,
    connect_time: Duration,
}

impl std::fmt::Debug for ConnectedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedSession")
            .field("machine_id", &self.machine_id)
            .field("connect_time", &self.connect_time)
            .finish()
    }
}

/// Connects to `machine`. Never retries. Refuses to start once `cancel` has fired.
pub async fn connect(
    shell: &Arc<dyn RemoteShell>,
    machine: &Machine,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ConnectedSession, SessionError> {
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }
    let started = Instant::now();
    let task_shell = shell.clone();
    let task_machine = machine.clone();
    let mut handle =
        tokio::task::spawn_blocking(move || task_shell.connect(&task_machine, timeout));

    let conn = tokio::select! {
        // The detached connect finishes on its own and its connection is dropped unused.
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        joined = &mut handle => joined
            .map_err(|err| SessionError::Network(format!("connect task failed: {err}")))??,
    };

    let closer = conn.closer();
    Ok(ConnectedSession {
        conn,
        closer,
        machine_id: machine.id.clone(),
        connect_time: started.elapsed(),
    })
}

impl ConnectedSession {
    pub fn connect_time(&self) -> Duration {
        self.connect_time
    }

    pub fn host_key_fingerprint(&self) -> Option<String> {
        self.conn.host_key_fingerprint()
    }

    /// Runs `command`, forwarding each output chunk to `on_output` in arrival order.
    ///
    /// Timeout and cancellation race the command; whichever wins closes the connection so
    /// the remote process dies with it. A non-zero exit is `SessionError::Remote`.
    pub async fn exec(
        self,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
        cancel: &CancellationToken,
        on_output: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ExecOutput, SessionError> {
        let ConnectedSession {
            mut conn,
            closer,
            machine_id,
            ..
        } = self;
        if cancel.is_cancelled() {
            closer.close();
            return Err(SessionError::Cancelled);
        }

        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let owned_command = command.to_string();
        let mut handle = tokio::task::spawn_blocking(move || {
            let mut sink = |chunk: &[u8]| {
                let _ = tx.send(chunk.to_vec());
            };
            conn.exec(&owned_command, stdin.as_deref(), &mut sink)
        });

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut captured = String::new();
        let mut forward = |chunk: Vec<u8>, captured: &mut String| {
            let text = String::from_utf8_lossy(&chunk);
            on_output(&text);
            captured.push_str(&text);
        };

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(machine_id = %machine_id, "cancelling remote command");
                    closer.close();
                    return Err(SessionError::Cancelled);
                }
                _ = &mut deadline => {
                    tracing::warn!(machine_id = %machine_id, timeout_secs = timeout.as_secs(), "remote command timed out");
                    closer.close();
                    return Err(SessionError::Timeout(timeout));
                }
                Some(chunk) = rx.recv() => forward(chunk, &mut captured),
                joined = &mut handle => {
                    break joined.map_err(|err| {
                        SessionError::Network(format!("exec task failed: {err}"))
                    });
                }
            }
        };
        while let Ok(chunk) = rx.try_recv() {
            forward(chunk, &mut captured);
        }

        let exit_code = exit??;
        if exit_code != 0 {
            return Err(SessionError::Remote { exit_code });
        }
        Ok(ExecOutput {
            captured,
            exit_code,
            elapsed: started.elapsed(),
        })
    }
}

/// Health check: connect, introspect the host, report latency. Not tied to any run.
pub async fn test_connection(
    shell: &Arc<dyn RemoteShell>,
    machine: &Machine,
    timeout: Duration,
) -> Result<ConnectionReport, SessionError> {
    let cancel = CancellationToken::new();
    let session = connect(shell, machine, timeout, &cancel).await?;
    let connect_time = session.connect_time();
    let fingerprint = session.host_key_fingerprint();
    let output = session
        .exec(INTROSPECTION_COMMAND, None, timeout, &cancel, &mut |_| {})
        .await?;
    let mut info = parse_introspection(&output.captured);
    info.host_key_fingerprint = fingerprint;
    Ok(ConnectionReport { info, connect_time })
}

/// Seconds for connect + no-op command. This is the `ssh_overhead` measurement itself.
pub async fn measure_overhead(
    shell: &Arc<dyn RemoteShell>,
    machine: &Machine,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<f64, SessionError> {
    let started = Instant::now();
    let session = connect(shell, machine, timeout, cancel).await?;
    session
        .exec(NOOP_COMMAND, None, timeout, cancel, &mut |_| {})
        .await?;
    Ok(started.elapsed().as_secs_f64())
}

pub(super) fn parse_introspection(output: &str) -> ConnectionInfo {
    let mut info = ConnectionInfo::default();
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "cores" => info.cores = value.parse().ok(),
            "memory_kb" => {
                info.memory_mb = value
                    .parse::<u64>()
                    .ok()
                    .filter(|kb| *kb > 0)
                    .map(|kb| kb / 1024);
            }
            "os" => info.os = Some(value.to_string()),
            "kernel" => info.kernel = Some(value.to_string()),
            _ => {}
        }
    }
    info
}
