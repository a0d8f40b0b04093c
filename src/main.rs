use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cascade;
mod cli;
mod collab;
mod config;
mod lock;
mod logging;
mod pipeline;
mod process;
mod record;
mod runner;
mod stage;
mod stages;
mod status;
mod store;
mod util;
mod workflow;

use cli::{Command, RootArgs};

fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();

    match args.command {
        Command::Init(args) => workflow::run_init(args).map(|()| ExitCode::SUCCESS),
        Command::Run(args) => workflow::run_run(args),
        Command::Status(args) => workflow::run_status(args).map(|()| ExitCode::SUCCESS),
        Command::Unlock(args) => workflow::run_unlock(args).map(|()| ExitCode::SUCCESS),
    }
}
