use chrono::Utc;
use std::collections::BTreeMap;

use super::types::{MachineOutcome, MachineSummary, RunResult};
use crate::machines::Machine;

/// Collects per-machine outcomes into the run's result. Every participating machine gets an
/// entry, possibly empty.
pub(super) struct RunAggregator {
    run_id: String,
    machines: BTreeMap<String, MachineSummary>,
    benchmarks: BTreeMap<String, BTreeMap<String, f64>>,
}

impl RunAggregator {
    pub fn new(run_id: &str, machines: &[Machine]) -> Self {
        let summaries = machines
            .iter()
            .map(|machine| {
                (
                    machine.id.clone(),
                    MachineSummary {
                        name: machine.name.clone(),
                        host: machine.host.clone(),
                    },
                )
            })
            .collect();
        let benchmarks = machines
            .iter()
            .map(|machine| (machine.id.clone(), BTreeMap::new()))
            .collect();
        Self {
            run_id: run_id.to_string(),
            machines: summaries,
            benchmarks,
        }
    }

    pub fn record(&mut self, outcome: MachineOutcome) {
        if !self.machines.contains_key(&outcome.machine_id) {
            tracing::warn!(
                run_id = %self.run_id,
                machine_id = %outcome.machine_id,
                "dropping outcome for a machine outside the run"
            );
            return;
        }
        self.benchmarks
            .entry(outcome.machine_id)
            .or_default()
            .extend(outcome.results);
    }

    pub fn finish(self) -> RunResult {
        RunResult {
            id: self.run_id,
            timestamp: Utc::now().to_rfc3339(),
            machines: self.machines,
            benchmarks: self.benchmarks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runs::types::SequencerPhase;
    use crate::test_support::test_machine;

    #[test]
    fn every_machine_gets_an_entry() {
        let machines = vec![test_machine("m1", "a"), test_machine("m2", "b")];
        let mut aggregator = RunAggregator::new("r1", &machines);
        aggregator.record(MachineOutcome {
            machine_id: "m1".to_string(),
            phase: SequencerPhase::Done,
            results: BTreeMap::from([("cpp_sorting".to_string(), 1.5)]),
        });
        aggregator.record(MachineOutcome {
            machine_id: "m2".to_string(),
            phase: SequencerPhase::Failed,
            results: BTreeMap::new(),
        });

        let result = aggregator.finish();
        assert_eq!(result.id, "r1");
        assert_eq!(result.benchmarks["m1"]["cpp_sorting"], 1.5);
        assert!(result.benchmarks["m2"].is_empty());
        assert_eq!(result.machines["m2"].host, "b");
        assert_eq!(result.measurement_count(), 1);
    }

    #[test]
    fn outcomes_for_unknown_machines_are_ignored() {
        let machines = vec![test_machine("m1", "a")];
        let mut aggregator = RunAggregator::new("r1", &machines);
        aggregator.record(MachineOutcome {
            machine_id: "ghost".to_string(),
            phase: SequencerPhase::Done,
            results: BTreeMap::from([("x".to_string(), 1.0)]),
        });
        let result = aggregator.finish();
        assert_eq!(result.benchmarks.len(), 1);
        assert_eq!(result.measurement_count(), 0);
    }
}
