mod aggregate;
mod coordinator;
pub mod deploy;
pub mod events;
pub mod parse;
mod sequencer;
pub mod session;
pub mod ssh;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::catalog::BenchmarkCatalog;
use crate::config::PhaseTimeouts;
use crate::results::ResultStore;
use deploy::Deployer;
use events::EventEmitter;
use session::RemoteShell;

pub use events::Event;
pub use types::{MachineSummary, RunRequest, RunResult, SequencerPhase};

/// Starts runs, tracks the active ones, and routes aborts to them.
#[derive(Clone)]
pub struct RunCoordinator {
    shell: Arc<dyn RemoteShell>,
    deployer: Deployer,
    catalog: Arc<BenchmarkCatalog>,
    results: Arc<ResultStore>,
    emitter: EventEmitter,
    timeouts: PhaseTimeouts,
    runs: Arc<Mutex<HashMap<String, Arc<RunState>>>>,
}

/// Abort signal shared by every sequencer of one run.
#[derive(Debug, Default)]
pub struct RunState {
    aborted: AtomicBool,
    cancel: CancellationToken,
}

impl RunState {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
