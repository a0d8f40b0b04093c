//! Stage contract and the generic driver for record-by-record phases.
use crate::record::{self, Applied, ApplyError, Outcome, RetryPolicy, Status, WorkItem};
use crate::store::RecordStore;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// Aggregate result a stage hands to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    AllProcessed,
    /// Some records failed; the batch still ran to the end.
    PartialFailure,
    /// The stage could not operate at all.
    FatalFailure,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllProcessed => write!(f, "all_processed"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::FatalFailure => write!(f, "fatal_failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    pub advanced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub parked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        StageReport {
            stage: stage.to_string(),
            status: StageStatus::AllProcessed,
            advanced: 0,
            failed: 0,
            skipped: 0,
            parked: 0,
            error: None,
        }
    }

    pub fn fatal(mut self, error: &anyhow::Error) -> Self {
        self.status = StageStatus::FatalFailure;
        self.error = Some(format!("{error:#}"));
        self
    }

    fn settle(mut self) -> Self {
        if self.status != StageStatus::FatalFailure && self.failed > 0 {
            self.status = StageStatus::PartialFailure;
        }
        self
    }
}

pub trait Stage {
    fn name(&self) -> &str;
    fn run(&mut self, store: &mut dyn RecordStore) -> StageReport;
}

/// One processing phase that claims records in a single input status.
pub trait RecordProcessor {
    fn name(&self) -> &'static str;
    fn input(&self) -> Status;

    /// Reachability check run once before the batch. An error here is fatal
    /// for the stage.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Do the external work for one record. Never fails the batch.
    fn process(&mut self, item: &WorkItem) -> Outcome;
}

/// Drives a [`RecordProcessor`] over its eligible records.
pub struct RecordStage<P> {
    processor: P,
    policy: RetryPolicy,
}

impl<P: RecordProcessor> RecordStage<P> {
    pub fn new(processor: P, policy: RetryPolicy) -> Self {
        RecordStage { processor, policy }
    }
}

impl<P: RecordProcessor> Stage for RecordStage<P> {
    fn name(&self) -> &str {
        self.processor.name()
    }

    fn run(&mut self, store: &mut dyn RecordStore) -> StageReport {
        let name = self.processor.name();
        let input = self.processor.input();
        let mut report = StageReport::new(name);

        if let Err(err) = self.processor.prepare() {
            tracing::error!(stage = name, error = %format!("{err:#}"), "stage cannot run");
            return report.fatal(&err);
        }
        let eligible = match record::select_eligible(store, input, self.policy) {
            Ok(eligible) => eligible,
            Err(err) => {
                tracing::error!(stage = name, error = %format!("{err:#}"), "select eligible records");
                return report.fatal(&err);
            }
        };
        for item in &eligible.parked {
            tracing::warn!(
                stage = name,
                record_id = item.id,
                filename = %item.filename,
                attempts = item.attempts,
                "record parked after repeated failures"
            );
        }
        report.parked = eligible.parked.len();
        if eligible.ready.is_empty() {
            tracing::info!(stage = name, input = %input, "no eligible records");
            return report;
        }
        tracing::info!(stage = name, count = eligible.ready.len(), "processing records");

        for item in eligible.ready {
            let missing = item.missing_inputs(input);
            let outcome = if missing.is_empty() {
                self.processor.process(&item)
            } else {
                let fields: Vec<&str> = missing.iter().map(|field| field.as_str()).collect();
                Outcome::Skip(format!("missing {}", fields.join(", ")))
            };
            match record::apply(store, &item, input, outcome) {
                Ok(Applied::Advanced(updated)) => {
                    report.advanced += 1;
                    tracing::info!(
                        stage = name,
                        record_id = updated.id,
                        filename = %updated.filename,
                        status = %updated.status,
                        "record advanced"
                    );
                }
                Ok(Applied::Failed(updated)) => {
                    report.failed += 1;
                    tracing::warn!(
                        stage = name,
                        record_id = updated.id,
                        filename = %updated.filename,
                        attempts = updated.attempts,
                        error = %updated.error_message,
                        "record failed"
                    );
                }
                Ok(Applied::Skipped(reason)) => {
                    report.skipped += 1;
                    tracing::info!(
                        stage = name,
                        record_id = item.id,
                        filename = %item.filename,
                        reason = %reason,
                        "record not ready, skipped"
                    );
                }
                Err(ApplyError::Transition(err)) => {
                    report.failed += 1;
                    tracing::error!(
                        stage = name,
                        record_id = item.id,
                        error = %err,
                        "rejected transition"
                    );
                    // Keep the rejection on the record so `recap status` lists it.
                    let rejected = Outcome::Fail(format!("rejected transition: {err}"));
                    match record::apply(store, &item, input, rejected) {
                        Ok(_) => {}
                        Err(ApplyError::Transition(err)) => {
                            tracing::error!(
                                stage = name,
                                record_id = item.id,
                                error = %err,
                                "could not record rejected transition"
                            );
                        }
                        Err(ApplyError::Store(err)) => {
                            tracing::error!(
                                stage = name,
                                record_id = item.id,
                                error = %format!("{err:#}"),
                                "record store write failed"
                            );
                            return report.fatal(&err);
                        }
                    }
                }
                Err(ApplyError::Store(err)) => {
                    tracing::error!(
                        stage = name,
                        record_id = item.id,
                        error = %format!("{err:#}"),
                        "record store write failed"
                    );
                    return report.fatal(&err);
                }
            }
        }
        report.settle()
    }
}
