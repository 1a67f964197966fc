use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod compose;
mod config;
mod console;
mod orchestrator;
mod readiness;

use cli::{CheckArgs, Command, ProjectArgs, RestartArgs, RootArgs, StatusArgs};
use compose::{CommandFailed, DockerCompose};
use config::{resolve_config, ConfigOverrides, RestartConfig};
use console::{color_enabled, Console};
use orchestrator::{
    check_data_file, print_report, report_missing_data_file, Orchestrator, Outcome,
};
use readiness::SystemClock;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    let verbose = match &args.command {
        Command::Restart(args) => args.project.verbose,
        Command::Status(args) => args.project.verbose,
        Command::Check(args) => args.project.verbose,
    };
    init_tracing(verbose);

    let result = match args.command {
        Command::Restart(args) => cmd_restart(&args),
        Command::Status(args) => cmd_status(&args),
        Command::Check(args) => cmd_check(&args),
    };
    match result {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(passthrough_code(&err))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "error" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Exit code of the collaborator command behind `err`, or 1.
fn passthrough_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CommandFailed>()
        .and_then(|failed| failed.code)
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status_byte(code))
}

/// Codes outside 0..=255 cannot be reported and collapse to 1.
fn exit_status_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn load_project_config(project: &ProjectArgs, overrides: &ConfigOverrides) -> Result<RestartConfig> {
    let config = resolve_config(project.config.as_deref(), &project.project_dir, overrides)?;
    if project.verbose {
        eprintln!(
            "scada-restart: project {} (simulation {}, bridge {}, data {})",
            project.project_dir.display(),
            config.simulation_unit,
            config.bridge_unit,
            config.data_file
        );
    }
    Ok(config)
}

fn cmd_restart(args: &RestartArgs) -> Result<i32> {
    let project = &args.project;
    let config = load_project_config(project, &args.overrides())?;
    let mut group = DockerCompose::from_config(&config, &project.project_dir)?;
    let clock = SystemClock::new();
    let console = Console::new(io::stdout().lock(), color_enabled(project.no_color));

    let report = Orchestrator::new(&mut group, &clock, console, &config, &project.project_dir)
        .run()?;

    if let Some(out) = &args.report {
        write_json(out, &report)?;
        if project.verbose {
            eprintln!("scada-restart: wrote run report to {}", out.display());
        }
    }
    Ok(report.exit_code)
}

fn cmd_status(args: &StatusArgs) -> Result<i32> {
    let project = &args.project;
    let config = load_project_config(project, &args.overrides())?;
    let mut group = DockerCompose::from_config(&config, &project.project_dir)?;
    let mut console = Console::new(io::stdout().lock(), color_enabled(project.no_color));
    print_report(
        &mut group,
        &mut console,
        &config.bridge_unit,
        config.log_tail_lines,
    )?;
    Ok(0)
}

fn cmd_check(args: &CheckArgs) -> Result<i32> {
    let project = &args.project;
    let config = load_project_config(project, &project.overrides())?;
    let mut console = Console::new(io::stdout().lock(), color_enabled(project.no_color));
    match check_data_file(&config, &project.project_dir) {
        Ok(path) => {
            console.ok(&format!("Data file present: {}", path.display()))?;
            Ok(0)
        }
        Err(missing) => {
            report_missing_data_file(&mut console, &config, &missing)?;
            Ok(Outcome::MissingDataFile.exit_code(config.distinct_exit_codes))
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize run report")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
