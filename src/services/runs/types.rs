use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub run_id: String,
    pub machine_ids: Vec<String>,
    pub benchmark_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSummary {
    pub name: String,
    pub host: String,
}

/// One finished run: machine-id -> benchmark-id -> seconds. Missing entries mean failed or skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
    pub timestamp: String,
    pub machines: BTreeMap<String, MachineSummary>,
    pub benchmarks: BTreeMap<String, BTreeMap<String, f64>>,
}

impl RunResult {
    pub fn measurement_count(&self) -> usize {
        self.benchmarks.values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerPhase {
    Deploying,
    SettingUp,
    RunningBenchmarks,
    Done,
    Failed,
    Aborted,
}

impl SequencerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SequencerPhase::Done | SequencerPhase::Failed | SequencerPhase::Aborted
        )
    }
}

impl fmt::Display for SequencerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequencerPhase::Deploying => "deploying",
            SequencerPhase::SettingUp => "setting_up",
            SequencerPhase::RunningBenchmarks => "running_benchmarks",
            SequencerPhase::Done => "done",
            SequencerPhase::Failed => "failed",
            SequencerPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What one machine's sequencer hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct MachineOutcome {
    pub machine_id: String,
    pub phase: SequencerPhase,
    pub results: BTreeMap<String, f64>,
}
