//! Ordered, fail-fast stage execution.
use crate::stage::{Stage, StageReport, StageStatus};
use crate::store::RecordStore;
use serde::Serialize;
use std::time::Instant;

/// Terminal outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Stage `index` reported a fatal failure; later stages did not run.
    Halted { index: usize, stage: String },
    /// Another run holds the lock. Nothing was touched.
    AlreadyRunning,
}

pub struct StageRunner {
    stages: Vec<Box<dyn Stage>>,
}

impl StageRunner {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        StageRunner { stages }
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| stage.name().to_string())
            .collect()
    }

    /// Run every stage in order against `store`, stopping at the first fatal
    /// failure. Partial failures never stop the run.
    pub fn run(&mut self, store: &mut dyn RecordStore) -> (RunOutcome, Vec<StageReport>) {
        let mut reports = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let started = Instant::now();
            tracing::info!(stage = stage.name(), index, "stage started");
            let report = stage.run(store);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let status = report.status;
            tracing::info!(
                stage = %report.stage,
                status = %status,
                advanced = report.advanced,
                failed = report.failed,
                skipped = report.skipped,
                parked = report.parked,
                elapsed_ms,
                "stage finished"
            );
            reports.push(report);
            if status == StageStatus::FatalFailure {
                let name = stage.name().to_string();
                tracing::error!(stage = %name, index, "stage failed fatally, halting run");
                return (RunOutcome::Halted { index, stage: name }, reports);
            }
        }
        (RunOutcome::Completed, reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Stub {
        name: &'static str,
        status: StageStatus,
        runs: Rc<Cell<usize>>,
    }

    impl Stage for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&mut self, _store: &mut dyn RecordStore) -> StageReport {
            self.runs.set(self.runs.get() + 1);
            let mut report = StageReport::new(self.name);
            report.status = self.status;
            report
        }
    }

    fn stubs(statuses: &[StageStatus]) -> (Vec<Box<dyn Stage>>, Vec<Rc<Cell<usize>>>) {
        const NAMES: [&str; 6] = [
            "ingest",
            "detect_language",
            "transcribe",
            "cleanup",
            "summarize",
            "publish",
        ];
        let counters: Vec<_> = statuses.iter().map(|_| Rc::new(Cell::new(0))).collect();
        let stages = statuses
            .iter()
            .zip(&counters)
            .enumerate()
            .map(|(i, (status, runs))| {
                Box::new(Stub {
                    name: NAMES[i],
                    status: *status,
                    runs: runs.clone(),
                }) as Box<dyn Stage>
            })
            .collect();
        (stages, counters)
    }

    #[test]
    fn fatal_stage_halts_the_run() {
        let (stages, counters) = stubs(&[
            StageStatus::AllProcessed,
            StageStatus::FatalFailure,
            StageStatus::AllProcessed,
        ]);
        let mut runner = StageRunner::new(stages);
        let (outcome, reports) = runner.run(&mut MemoryStore::new());

        assert_eq!(
            outcome,
            RunOutcome::Halted {
                index: 1,
                stage: "detect_language".to_string()
            }
        );
        assert_eq!(reports.len(), 2);
        let runs: Vec<usize> = counters.iter().map(|c| c.get()).collect();
        assert_eq!(runs, vec![1, 1, 0]);
    }

    #[test]
    fn partial_failure_does_not_halt() {
        let (stages, counters) = stubs(&[
            StageStatus::PartialFailure,
            StageStatus::AllProcessed,
            StageStatus::PartialFailure,
        ]);
        let mut runner = StageRunner::new(stages);
        let (outcome, reports) = runner.run(&mut MemoryStore::new());

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(reports.len(), 3);
        assert!(counters.iter().all(|c| c.get() == 1));
    }

    #[test]
    fn next_run_starts_again_at_the_first_stage() {
        let (stages, counters) = stubs(&[StageStatus::AllProcessed, StageStatus::FatalFailure]);
        let mut runner = StageRunner::new(stages);
        let mut store = MemoryStore::new();
        runner.run(&mut store);
        runner.run(&mut store);
        assert_eq!(counters[0].get(), 2);
        assert_eq!(runner.stage_names(), vec!["ingest", "detect_language"]);
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let halted = RunOutcome::Halted {
            index: 3,
            stage: "cleanup".to_string(),
        };
        let json = serde_json::to_value(&halted).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"kind": "halted", "index": 3, "stage": "cleanup"})
        );
    }
}
