//! CLI argument parsing for the recording pipeline.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "recap",
    version,
    about = "Turn audio recordings into published meeting summaries",
    after_help = "Commands:\n  init      Write a default recap.json\n  run       Run every pipeline stage once (safe to schedule; overlapping runs exit quietly)\n  status    Count records per status and show the run lock\n  unlock    Remove a lock left behind by a killed run\n\nExamples:\n  recap init --config /srv/recap/recap.json\n  recap run --config /srv/recap/recap.json\n  recap status --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Run(RunArgs),
    Status(StatusArgs),
    Unlock(UnlockArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Write a default config file")]
pub struct InitArgs {
    /// Config file to write (default: ./recap.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run the pipeline once under the single-run lock")]
pub struct RunArgs {
    /// Config file (default: ./recap.json, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Summarize records and lock state")]
pub struct StatusArgs {
    /// Config file (default: ./recap.json, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Remove the run lock marker")]
pub struct UnlockArgs {
    /// Config file (default: ./recap.json, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
