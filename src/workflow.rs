//! Command handlers behind the CLI.
use crate::cli::{InitArgs, RunArgs, StatusArgs, UnlockArgs};
use crate::config::{self, default_config, load_config, write_config, DEFAULT_CONFIG_FILE};
use crate::lock::LockManager;
use crate::logging;
use crate::pipeline::run_pipeline;
use crate::runner::RunOutcome;
use crate::status::{build_status, render_text};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code of a run that halted on a fatal stage failure.
const HALTED_EXIT_CODE: u8 = 2;

pub fn run_init(args: InitArgs) -> Result<()> {
    let path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if path.is_file() && !args.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        ));
    }
    write_config(&path, &default_config())?;
    let config = load_config(&path)?;
    let inbox = config.inbox_dir();
    fs::create_dir_all(&inbox).with_context(|| format!("create inbox {}", inbox.display()))?;
    println!("wrote {}", path.display());
    println!("drop recordings into {}", inbox.display());
    Ok(())
}

pub fn run_run(args: RunArgs) -> Result<ExitCode> {
    let path = config::config_path(args.config.as_deref());
    let config = load_config(&path)?;
    let _log = logging::init(Some(&config.log_path()))?;
    tracing::info!(config = %path.display(), "run starting");

    let run = match run_pipeline(&config) {
        Ok(run) => run,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run aborted before the first stage");
            return Err(err);
        }
    };
    if args.json {
        let text = serde_json::to_string_pretty(&run).context("serialize run summary")?;
        println!("{text}");
    }
    Ok(match run.outcome {
        RunOutcome::Halted { .. } => ExitCode::from(HALTED_EXIT_CODE),
        RunOutcome::Completed | RunOutcome::AlreadyRunning => ExitCode::SUCCESS,
    })
}

pub fn run_status(args: StatusArgs) -> Result<()> {
    let path = config::config_path(args.config.as_deref());
    let config = load_config(&path)?;
    let summary = build_status(&config)?;
    if args.json {
        let text = serde_json::to_string_pretty(&summary).context("serialize status")?;
        println!("{text}");
    } else {
        print!("{}", render_text(&summary));
    }
    Ok(())
}

pub fn run_unlock(args: UnlockArgs) -> Result<()> {
    let path = config::config_path(args.config.as_deref());
    let config = load_config(&path)?;
    let _log = logging::init(None)?;
    let lock = LockManager::new(config.lock_path());
    match lock.inspect()? {
        None => println!("no lock marker at {}", lock.path().display()),
        Some(info) => {
            lock.release()?;
            let pid = info
                .map(|info| info.pid.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(lock = %lock.path().display(), pid = %pid, "lock marker removed by operator");
            println!("removed {} (held by pid {pid})", lock.path().display());
        }
    }
    Ok(())
}
