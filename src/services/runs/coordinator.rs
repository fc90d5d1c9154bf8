use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::aggregate::RunAggregator;
use super::deploy::Deployer;
use super::events::{Event, EventEmitter, ProgressTracker};
use super::sequencer::{RunContext, TaskSequencer};
use super::session::{self, RemoteShell};
use super::types::{RunRequest, RunResult};
use super::{RunCoordinator, RunState};
use crate::catalog::BenchmarkCatalog;
use crate::config::PhaseTimeouts;
use crate::error::RunError;
use crate::machines::Machine;
use crate::results::ResultStore;

impl RunCoordinator {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        deployer: Deployer,
        catalog: Arc<BenchmarkCatalog>,
        results: Arc<ResultStore>,
        emitter: EventEmitter,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            shell,
            deployer,
            catalog,
            results,
            emitter,
            timeouts,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn catalog(&self) -> &BenchmarkCatalog {
        &self.catalog
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    fn runs_lock(&self) -> MutexGuard<'_, HashMap<String, Arc<RunState>>> {
        match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering run registry from poisoned lock");
                poisoned.into_inner()
            }
        }
    }

    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs_lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registers the run and spawns its sequencers. The run is deregistered before
    /// `run_complete` is emitted; the handle yields the aggregated result after that.
    pub fn start_run(
        &self,
        request: RunRequest,
        machines: Vec<Machine>,
    ) -> Result<JoinHandle<RunResult>, RunError> {
        let run_id = request.run_id;
        if machines.is_empty() {
            return Err(RunError::NoMachines(run_id));
        }
        let state = Arc::new(RunState::default());
        {
            let mut runs = self.runs_lock();
            if runs.contains_key(&run_id) {
                return Err(RunError::DuplicateRun(run_id));
            }
            runs.insert(run_id.clone(), state.clone());
        }

        tracing::info!(
            run_id = %run_id,
            machines = machines.len(),
            benchmarks = request.benchmark_ids.len(),
            "starting run"
        );
        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            coordinator
                .execute(run_id, machines, request.benchmark_ids, state)
                .await
        }))
    }

    async fn execute(
        self,
        run_id: String,
        machines: Vec<Machine>,
        benchmark_ids: Vec<String>,
        state: Arc<RunState>,
    ) -> RunResult {
        let total = benchmark_ids.len() * machines.len();
        let progress = Arc::new(ProgressTracker::new(
            run_id.clone(),
            total,
            self.emitter.clone(),
        ));
        self.emitter.emit(Event::Progress {
            run_id: run_id.clone(),
            completed: 0,
            total,
        });

        let ctx = Arc::new(RunContext {
            run_id: run_id.clone(),
            machines: machines.clone(),
            benchmark_ids,
            state,
            progress: progress.clone(),
            emitter: self.emitter.clone(),
            shell: self.shell.clone(),
            deployer: self.deployer.clone(),
            catalog: self.catalog.clone(),
            timeouts: self.timeouts,
        });
        let handles = machines
            .iter()
            .map(|machine| tokio::spawn(TaskSequencer::new(ctx.clone(), machine.clone()).run()));

        let mut aggregator = RunAggregator::new(&run_id, &machines);
        for (machine, joined) in machines.iter().zip(join_all(handles).await) {
            match joined {
                Ok(outcome) => {
                    tracing::info!(
                        run_id = %run_id,
                        machine_id = %outcome.machine_id,
                        phase = %outcome.phase,
                        measured = outcome.results.len(),
                        "sequencer finished"
                    );
                    aggregator.record(outcome);
                }
                Err(err) => tracing::error!(
                    run_id = %run_id,
                    machine_id = %machine.id,
                    error = %err,
                    "sequencer task failed"
                ),
            }
        }

        progress.settle();
        let result = aggregator.finish();
        if let Err(err) = self.results.append(&result).await {
            tracing::error!(run_id = %run_id, error = %err, "failed to persist run result");
        }
        self.runs_lock().remove(&run_id);
        self.emitter.emit(Event::RunComplete {
            run_id: run_id.clone(),
            results: result.clone(),
        });
        tracing::info!(
            run_id = %run_id,
            measurements = result.measurement_count(),
            "run complete"
        );
        result
    }

    /// Flags the run aborted and interrupts its in-flight commands. Unknown ids are ignored.
    pub fn abort(&self, run_id: &str) -> bool {
        let state = self.runs_lock().get(run_id).cloned();
        match state {
            Some(state) => {
                tracing::info!(run_id = %run_id, "aborting run");
                state.abort();
                true
            }
            None => {
                tracing::debug!(run_id = %run_id, "abort for unknown run ignored");
                false
            }
        }
    }

    pub fn abort_all(&self) {
        let states: Vec<Arc<RunState>> = self.runs_lock().values().cloned().collect();
        for state in states {
            state.abort();
        }
    }

    /// Connects, introspects and emits a `connection_result` for the machine.
    pub async fn test_connection(&self, machine: &Machine) -> Event {
        let event = match session::test_connection(&self.shell, machine, self.timeouts.connect)
            .await
        {
            Ok(report) => Event::ConnectionResult {
                machine_id: machine.id.clone(),
                success: true,
                info: Some(report.info),
                error: None,
                connect_time_ms: Some(report.connect_time.as_millis() as u64),
            },
            Err(err) => {
                tracing::info!(machine_id = %machine.id, error = %err, "connection test failed");
                Event::ConnectionResult {
                    machine_id: machine.id.clone(),
                    success: false,
                    info: None,
                    error: Some(err.to_string()),
                    connect_time_ms: None,
                }
            }
        };
        self.emitter.emit(event.clone());
        event
    }
}
