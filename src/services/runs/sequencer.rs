use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::deploy::Deployer;
use super::events::{EventEmitter, MachineEvents, ProgressTracker};
use super::parse::parse_result;
use super::session::{self, ExecOutput, RemoteShell};
use super::types::{MachineOutcome, SequencerPhase};
use super::RunState;
use crate::catalog::{BenchmarkCatalog, BenchmarkDefinition, BenchmarkKind};
use crate::config::PhaseTimeouts;
use crate::error::SessionError;
use crate::machines::Machine;

/// Everything the sequencers of one run share.
pub(super) struct RunContext {
    pub run_id: String,
    pub machines: Vec<Machine>,
    pub benchmark_ids: Vec<String>,
    pub state: Arc<RunState>,
    pub progress: Arc<ProgressTracker>,
    pub emitter: EventEmitter,
    pub shell: Arc<dyn RemoteShell>,
    pub deployer: Deployer,
    pub catalog: Arc<BenchmarkCatalog>,
    pub timeouts: PhaseTimeouts,
}

impl RunContext {
    /// Network benchmarks aim at the first other machine in the run.
    fn target_for(&self, machine_id: &str) -> Option<&Machine> {
        self.machines.iter().find(|machine| machine.id != machine_id)
    }
}

/// Drives one machine through deploy, setup and its benchmark list.
pub(super) struct TaskSequencer {
    ctx: Arc<RunContext>,
    machine: Machine,
    events: MachineEvents,
    phase: SequencerPhase,
    results: BTreeMap<String, f64>,
}

impl TaskSequencer {
    pub fn new(ctx: Arc<RunContext>, machine: Machine) -> Self {
        let events = MachineEvents::new(
            ctx.run_id.clone(),
            machine.id.clone(),
            ctx.emitter.clone(),
            ctx.progress.clone(),
        );
        Self {
            ctx,
            machine,
            events,
            phase: SequencerPhase::Deploying,
            results: BTreeMap::new(),
        }
    }

    pub async fn run(mut self) -> MachineOutcome {
        tracing::info!(
            run_id = %self.ctx.run_id,
            machine_id = %self.machine.id,
            host = %self.machine.host,
            "sequencer started"
        );
        if self.deploy().await {
            self.transition(SequencerPhase::SettingUp);
            self.setup().await;
            self.transition(SequencerPhase::RunningBenchmarks);
            self.run_benchmarks().await;
            if !self.phase.is_terminal() {
                self.transition(SequencerPhase::Done);
            }
        }
        MachineOutcome {
            machine_id: self.machine.id,
            phase: self.phase,
            results: self.results,
        }
    }

    fn transition(&mut self, next: SequencerPhase) {
        tracing::debug!(
            run_id = %self.ctx.run_id,
            machine_id = %self.machine.id,
            from = %self.phase,
            to = %next,
            "sequencer transition"
        );
        self.phase = next;
    }

    async fn deploy(&mut self) -> bool {
        if self.ctx.state.is_aborted() {
            self.events.line("Run aborted before deployment");
            self.transition(SequencerPhase::Aborted);
            return false;
        }
        self.events
            .line(format!("Deploying benchmarks to {}...", self.machine.host));
        let events = self.events.clone();
        let outcome = self
            .ctx
            .deployer
            .deploy(
                &self.ctx.shell,
                &self.machine,
                &self.ctx.timeouts,
                self.ctx.state.cancel_token(),
                &mut |text: &str| events.output(text),
            )
            .await;
        match outcome {
            Ok(strategy) => {
                tracing::info!(
                    run_id = %self.ctx.run_id,
                    machine_id = %self.machine.id,
                    ?strategy,
                    "benchmarks deployed"
                );
                self.events.line("Deployment complete");
                true
            }
            Err(err) if err.is_cancelled() => {
                self.events.line("Deployment aborted");
                self.transition(SequencerPhase::Aborted);
                false
            }
            Err(err) => {
                tracing::warn!(
                    run_id = %self.ctx.run_id,
                    machine_id = %self.machine.id,
                    error = %err,
                    "deployment failed"
                );
                self.events.line(format!("Deployment failed: {err}"));
                self.transition(SequencerPhase::Failed);
                false
            }
        }
    }

    /// Global dependency install. Failures are reported and tolerated.
    async fn setup(&mut self) {
        let Some(command) = self.ctx.catalog.setup_command.clone() else {
            return;
        };
        self.events.line("Installing dependencies...");
        match self.run_remote(&command, self.ctx.timeouts.setup).await {
            Ok(_) => self.events.line("Dependencies installed"),
            Err(SessionError::Cancelled) => {}
            Err(err) => self
                .events
                .line(format!("Warning: dependency setup failed ({err}); continuing")),
        }
    }

    async fn run_benchmarks(&mut self) {
        let benchmark_ids = self.ctx.benchmark_ids.clone();
        for benchmark_id in &benchmark_ids {
            if self.ctx.state.is_aborted() {
                self.events.line("Run aborted; skipping remaining benchmarks");
                self.transition(SequencerPhase::Aborted);
                return;
            }

            let Some(def) = self.ctx.catalog.get(benchmark_id).cloned() else {
                self.events
                    .line(format!("Unknown benchmark {benchmark_id}; skipping"));
                self.events
                    .benchmark_result(benchmark_id, Err("unknown benchmark".to_string()));
                self.events.advance_progress();
                continue;
            };

            let target = if def.needs_target {
                match self.ctx.target_for(&self.machine.id) {
                    Some(target) => Some(target.clone()),
                    None => {
                        self.events.line(format!(
                            "Skipping {}: needs at least two machines",
                            def.name
                        ));
                        self.events.advance_progress();
                        continue;
                    }
                }
            } else {
                None
            };

            self.events.benchmark_start(&def.id, &def.name);
            let outcome = self.run_benchmark(&def, target.as_ref()).await;
            let cancelled = matches!(&outcome, Err(err) if err.is_cancelled());
            match outcome {
                Ok(seconds) => {
                    self.events
                        .line(format!("{} finished in {seconds:.3}s", def.name));
                    self.events.benchmark_result(&def.id, Ok(seconds));
                    self.results.insert(def.id.clone(), seconds);
                }
                Err(err) => {
                    tracing::warn!(
                        run_id = %self.ctx.run_id,
                        machine_id = %self.machine.id,
                        benchmark_id = %def.id,
                        error = %err,
                        "benchmark failed"
                    );
                    self.events.line(format!("{} failed: {err}", def.name));
                    self.events.benchmark_result(&def.id, Err(err.to_string()));
                }
            }
            self.events.advance_progress();

            if cancelled {
                self.events.line("Run aborted; skipping remaining benchmarks");
                self.transition(SequencerPhase::Aborted);
                return;
            }
        }
    }

    async fn run_benchmark(
        &self,
        def: &BenchmarkDefinition,
        target: Option<&Machine>,
    ) -> Result<f64, SessionError> {
        if def.kind == BenchmarkKind::SshOverhead {
            // Measured against this machine itself; the target only gates eligibility.
            return session::measure_overhead(
                &self.ctx.shell,
                &self.machine,
                self.ctx.timeouts.network_benchmark,
                self.ctx.state.cancel_token(),
            )
            .await;
        }

        if let Some(setup) = &def.setup_command {
            self.events.line(format!("Preparing {}...", def.name));
            match self.run_remote(setup, self.ctx.timeouts.setup).await {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => self
                    .events
                    .line(format!("Warning: setup for {} failed ({err})", def.name)),
            }
        }

        let command = def.command_for(target.map(|machine| machine.host.as_str()));
        let timeout = if def.needs_target {
            self.ctx.timeouts.network_benchmark
        } else {
            self.ctx.timeouts.benchmark
        };
        let output = self.run_remote(&command, timeout).await?;
        Ok(match parse_result(&output.captured, &def.id) {
            Some(seconds) => seconds,
            None => {
                tracing::debug!(
                    machine_id = %self.machine.id,
                    benchmark_id = %def.id,
                    "no RESULT line; using wall-clock time"
                );
                output.elapsed.as_secs_f64()
            }
        })
    }

    /// Fresh session per command, run from inside the deployed tree.
    async fn run_remote(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SessionError> {
        let cancel = self.ctx.state.cancel_token();
        let session =
            session::connect(&self.ctx.shell, &self.machine, self.ctx.timeouts.connect, cancel)
                .await?;
        let full_command = format!("{} && {}", self.ctx.deployer.cd_prefix(), command);
        let events = self.events.clone();
        session
            .exec(&full_command, None, timeout, cancel, &mut |text: &str| {
                events.output(text)
            })
            .await
    }
}
