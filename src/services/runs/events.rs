use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::session::ConnectionInfo;
use super::types::RunResult;

/// Everything observers see, serialized as `{"type": "...", ...camelCase fields}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    ConnectionResult {
        machine_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<ConnectionInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connect_time_ms: Option<u64>,
    },
    Output {
        run_id: String,
        machine_id: String,
        text: String,
    },
    BenchmarkStart {
        run_id: String,
        machine_id: String,
        benchmark_id: String,
        name: String,
    },
    BenchmarkResult {
        run_id: String,
        machine_id: String,
        benchmark_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        seconds: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Progress {
        run_id: String,
        completed: usize,
        total: usize,
    },
    RunComplete {
        run_id: String,
        results: RunResult,
    },
    Error {
        message: String,
    },
}

/// Broadcast fan-out to every connected observer.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // No observers is fine; events are transient.
        let _ = self.tx.send(event);
    }
}

/// Run-wide completed/total counter. Increments and their events are emitted under one lock
/// so observers always see a non-decreasing `completed`.
pub struct ProgressTracker {
    run_id: String,
    total: usize,
    completed: Mutex<usize>,
    emitter: EventEmitter,
}

impl ProgressTracker {
    pub fn new(run_id: String, total: usize, emitter: EventEmitter) -> Self {
        Self {
            run_id,
            total,
            completed: Mutex::new(0),
            emitter,
        }
    }

    pub fn completed(&self) -> usize {
        *self.lock()
    }

    pub fn advance(&self) {
        let mut completed = self.lock();
        if *completed >= self.total {
            return;
        }
        *completed += 1;
        self.emitter.emit(Event::Progress {
            run_id: self.run_id.clone(),
            completed: *completed,
            total: self.total,
        });
    }

    /// Jumps to the total at run end; tasks nobody executed still count as finished.
    pub fn settle(&self) {
        let mut completed = self.lock();
        if *completed >= self.total {
            return;
        }
        *completed = self.total;
        self.emitter.emit(Event::Progress {
            run_id: self.run_id.clone(),
            completed: self.total,
            total: self.total,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        match self.completed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Emitter bound to one machine within one run.
#[derive(Clone)]
pub struct MachineEvents {
    run_id: String,
    machine_id: String,
    emitter: EventEmitter,
    progress: Arc<ProgressTracker>,
}

impl MachineEvents {
    pub fn new(
        run_id: String,
        machine_id: String,
        emitter: EventEmitter,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            run_id,
            machine_id,
            emitter,
            progress,
        }
    }

    pub fn output(&self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.emitter.emit(Event::Output {
            run_id: self.run_id.clone(),
            machine_id: self.machine_id.clone(),
            text,
        });
    }

    /// One human-readable line in the machine's output stream.
    pub fn line(&self, message: impl AsRef<str>) {
        self.output(format!("{}\n", message.as_ref().trim_end()));
    }

    pub fn benchmark_start(&self, benchmark_id: &str, name: &str) {
        self.emitter.emit(Event::BenchmarkStart {
            run_id: self.run_id.clone(),
            machine_id: self.machine_id.clone(),
            benchmark_id: benchmark_id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn benchmark_result(&self, benchmark_id: &str, outcome: Result<f64, String>) {
        let (seconds, error) = match outcome {
            Ok(seconds) => (Some(seconds), None),
            Err(error) => (None, Some(error)),
        };
        self.emitter.emit(Event::BenchmarkResult {
            run_id: self.run_id.clone(),
            machine_id: self.machine_id.clone(),
            benchmark_id: benchmark_id.to_string(),
            seconds,
            error,
        });
    }

    pub fn advance_progress(&self) {
        self.progress.advance();
    }
}
