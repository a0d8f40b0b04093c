//! Entry point: lock, initialize, run every stage, release.
use crate::cascade::ModelCascade;
use crate::collab::{
    AudioSource, CommandLanguageModel, CommandSpeech, DirectorySource, HttpLanguageModel,
    LanguageModel, MarkdownPublisher, Publisher, SpeechToText,
};
use crate::config::{Config, LmBackend};
use crate::lock::{Acquire, LockManager};
use crate::record::RetryPolicy;
use crate::runner::{RunOutcome, StageRunner};
use crate::stage::{RecordStage, Stage, StageReport};
use crate::stages::{Cleanup, DetectLanguage, Ingest, Publish, Summarize, Transcribe};
use crate::store::{JsonStore, RecordStore};
use crate::util::now_epoch_ms;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::env;
use std::path::Path;
use std::rc::Rc;

/// Summary of one invocation, printed by `recap run --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub started_at_epoch_ms: u128,
    pub stages: Vec<String>,
    pub reports: Vec<StageReport>,
    pub outcome: RunOutcome,
}

/// Live handles to the external services, shared by the stages that use them.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Rc<dyn AudioSource>,
    pub speech: Rc<dyn SpeechToText>,
    pub lm: Rc<dyn LanguageModel>,
    pub publisher: Rc<dyn Publisher>,
}

impl Collaborators {
    /// Connect every adapter the config names. Anything missing here is an
    /// initialization failure and no stage runs.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = DirectorySource::new(config.inbox_dir()).context("open audio inbox")?;
        require_program(&config.speech.command, "speech.command")?;
        let speech = CommandSpeech::new(config.speech.command.clone(), config.speech_timeout());
        let lm: Rc<dyn LanguageModel> = match config.lm.backend {
            LmBackend::Http => {
                let endpoint = config
                    .lm
                    .endpoint
                    .clone()
                    .ok_or_else(|| anyhow!("lm.endpoint is required for the http backend"))?;
                let key_var = config
                    .lm
                    .api_key_env
                    .as_deref()
                    .ok_or_else(|| anyhow!("lm.api_key_env is required for the http backend"))?;
                let api_key = env::var(key_var)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
                    .ok_or_else(|| anyhow!("language model API key missing: set {key_var}"))?;
                Rc::new(HttpLanguageModel::new(
                    endpoint,
                    api_key,
                    config.lm.temperature,
                    config.lm_timeout(),
                ))
            }
            LmBackend::Command => {
                let command = config
                    .lm
                    .command
                    .clone()
                    .ok_or_else(|| anyhow!("lm.command is required for the command backend"))?;
                require_program(&command, "lm.command")?;
                Rc::new(CommandLanguageModel::new(command, config.lm_timeout()))
            }
        };
        Ok(Collaborators {
            source: Rc::new(source),
            speech: Rc::new(speech),
            lm,
            publisher: Rc::new(MarkdownPublisher::new(config.output_dir())),
        })
    }
}

/// Fail early when the program a command line starts with cannot be found.
fn require_program(command: &str, field: &str) -> Result<()> {
    let argv = shell_words::split(command).with_context(|| format!("parse {field}"))?;
    let program = argv
        .first()
        .ok_or_else(|| anyhow!("{field} must name a program"))?;
    if program.contains(std::path::MAIN_SEPARATOR) {
        if Path::new(program).is_file() {
            return Ok(());
        }
        return Err(anyhow!("{field}: {program} does not exist"));
    }
    which::which(program)
        .map(|_| ())
        .with_context(|| format!("{field}: {program} not found on PATH"))
}

/// The fixed stage order of a run.
pub fn build_stages(config: &Config, collaborators: &Collaborators) -> Result<Vec<Box<dyn Stage>>> {
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
    };
    let cleanup_cascade =
        ModelCascade::new(config.cleanup_models.clone()).context("cleanup_models")?;
    let summary_cascade =
        ModelCascade::new(config.summary_models.clone()).context("summary_models")?;
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(Ingest::new(collaborators.source.clone())),
        Box::new(RecordStage::new(
            DetectLanguage::new(collaborators.source.clone(), collaborators.speech.clone()),
            policy,
        )),
        Box::new(RecordStage::new(
            Transcribe::new(collaborators.source.clone(), collaborators.speech.clone()),
            policy,
        )),
        Box::new(RecordStage::new(
            Cleanup::new(collaborators.lm.clone(), cleanup_cascade),
            policy,
        )),
        Box::new(RecordStage::new(
            Summarize::new(collaborators.lm.clone(), summary_cascade)?,
            policy,
        )),
        Box::new(RecordStage::new(
            Publish::new(collaborators.publisher.clone()),
            policy,
        )),
    ];
    Ok(stages)
}

/// Run the configured pipeline once.
pub fn run_pipeline(config: &Config) -> Result<PipelineRun> {
    let lock = LockManager::new(config.lock_path());
    execute(&lock, || {
        let collaborators = Collaborators::from_config(config)?;
        let store = JsonStore::open(&config.store_path())?;
        let runner = StageRunner::new(build_stages(config, &collaborators)?);
        Ok((runner, store))
    })
}

/// Hold the run lock around `init` and the stage runner.
///
/// `init` runs only after the lock is held. When another run holds it, this
/// returns an `AlreadyRunning` summary and touches nothing. The lock is
/// released on every exit path, including errors from `init` and panics.
pub fn execute<S, F>(lock: &LockManager, init: F) -> Result<PipelineRun>
where
    S: RecordStore,
    F: FnOnce() -> Result<(StageRunner, S)>,
{
    let guard = match lock.acquire()? {
        Acquire::Acquired(guard) => guard,
        Acquire::AlreadyRunning => {
            tracing::info!(lock = %lock.path().display(), "another run is active, nothing to do");
            return Ok(PipelineRun {
                started_at_epoch_ms: now_epoch_ms()?,
                stages: Vec::new(),
                reports: Vec::new(),
                outcome: RunOutcome::AlreadyRunning,
            });
        }
    };
    let started_at_epoch_ms = now_epoch_ms()?;
    tracing::info!(lock = %lock.path().display(), "run lock acquired");

    let (mut runner, mut store) = init().context("initialize pipeline")?;
    let stages = runner.stage_names();
    let (outcome, reports) = runner.run(&mut store);
    match &outcome {
        RunOutcome::Completed => tracing::info!("pipeline completed"),
        RunOutcome::Halted { stage, .. } => {
            tracing::error!(stage = %stage, "pipeline halted")
        }
        RunOutcome::AlreadyRunning => {}
    }
    guard.release()?;
    Ok(PipelineRun {
        started_at_epoch_ms,
        stages,
        reports,
        outcome,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
