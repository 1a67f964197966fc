//! CLI argument parsing for the restart workflow.
//!
//! The CLI stays thin: it collects overrides and hands them to the config
//! layer so the orchestrator only sees a resolved `RestartConfig`.
use crate::config::ConfigOverrides;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "scada-restart",
    version,
    about = "Staged restart of the SUMO/Modbus SCADA container stack",
    after_help = "Commands:\n  restart  Tear down, rebuild the bridge, and bring units up in order\n  status   Print the unit status table and the bridge log tail\n  check    Verify the simulation data file is in place\n\nExamples:\n  scada-restart restart --project-dir ./sumo-modbus-scada\n  scada-restart restart --distinct-exit-codes --report /tmp/restart.json\n  scada-restart status --tail 50",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Restart(RestartArgs),
    Status(StatusArgs),
    Check(CheckArgs),
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Directory holding the compose file and the data directory
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// Config file (defaults to <project-dir>/scada-restart.json if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Compose command, e.g. "docker compose" or "docker-compose"
    #[arg(long, value_name = "CMD")]
    pub compose_command: Option<String>,

    /// Compose file passed with -f
    #[arg(long, value_name = "FILE")]
    pub compose_file: Option<String>,

    /// Required data file, relative to the project directory
    #[arg(long, value_name = "REL")]
    pub data_file: Option<String>,

    /// Emit a verbose transcript of the workflow
    #[arg(long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl ProjectArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            compose_command: self.compose_command.clone(),
            compose_file: self.compose_file.clone(),
            data_file: self.data_file.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// Full teardown, rebuild, and staged bring-up.
#[derive(Parser, Debug)]
#[command(about = "Restart the stack: teardown, prune, rebuild, staged start, report")]
pub struct RestartArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Seconds to wait for the simulation unit to run
    #[arg(long, value_name = "SECS")]
    pub sim_timeout: Option<u64>,

    /// Seconds to wait for the bridge unit to run
    #[arg(long, value_name = "SECS")]
    pub bridge_timeout: Option<u64>,

    /// Seconds to wait for the remaining units to run
    #[arg(long, value_name = "SECS")]
    pub rest_timeout: Option<u64>,

    /// Milliseconds between readiness polls
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Exit 2 for a missing data file and 3 for a failed simulation start
    #[arg(long)]
    pub distinct_exit_codes: bool,

    /// Modbus TCP endpoint to probe once the bridge starts (host:port)
    #[arg(long, value_name = "ADDR")]
    pub bridge_probe: Option<String>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl RestartArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            sim_timeout_secs: self.sim_timeout,
            bridge_timeout_secs: self.bridge_timeout,
            rest_timeout_secs: self.rest_timeout,
            poll_interval_ms: self.poll_interval_ms,
            distinct_exit_codes: self.distinct_exit_codes,
            bridge_probe: self.bridge_probe.clone(),
            ..self.project.overrides()
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Print the unit status table and the bridge log tail")]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Number of bridge log lines to show
    #[arg(long, value_name = "N")]
    pub tail: Option<usize>,
}

impl StatusArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_tail_lines: self.tail,
            ..self.project.overrides()
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Check that the simulation data file is in place")]
pub struct CheckArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}
