//! Container-group collaborator.
//!
//! `ContainerGroup` is the seam between the orchestrator and whatever manages
//! the units. `DockerCompose` drives a compose CLI in the project directory.
use crate::config::RestartConfig;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Instant;
use thiserror::Error;

/// Lifecycle operations the restart sequence needs from the container tool.
pub trait ContainerGroup {
    /// Stop and remove every unit, optionally with its volumes.
    fn teardown(&mut self, remove_volumes: bool) -> Result<()>;
    /// Remove unused container resources.
    fn prune_unused(&mut self) -> Result<()>;
    fn build(&mut self, unit: &str, no_cache: bool) -> Result<()>;
    fn start(&mut self, unit: &str) -> Result<()>;
    fn start_all(&mut self) -> Result<()>;
    /// Names of every unit declared in the service definition.
    fn declared_units(&mut self) -> Result<BTreeSet<String>>;
    /// Names of the units currently running.
    fn list_running(&mut self) -> Result<BTreeSet<String>>;
    /// Human-readable status table.
    fn status(&mut self) -> Result<String>;
    /// Log output for `unit`; `None` returns the whole log.
    fn logs(&mut self, unit: &str, tail: Option<usize>) -> Result<String>;
}

/// A collaborator command exited unsuccessfully.
///
/// Carries the exit code so the process can surface it unchanged. `stderr`
/// is only captured for query commands; mutating commands write theirs
/// straight to the terminal.
#[derive(Debug, Error)]
#[error("`{command}` failed with {}{}", describe_code(.code), describe_stderr(.stderr))]
pub struct CommandFailed {
    pub command: String,
    pub code: Option<i32>,
    pub stderr: String,
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, Copy)]
enum Streams {
    /// Straight to the terminal, so long builds show progress.
    Passthrough,
    /// Collected for parsing or printing.
    Capture,
}

impl Streams {
    fn stdio(self) -> Stdio {
        match self {
            Streams::Passthrough => Stdio::inherit(),
            Streams::Capture => Stdio::piped(),
        }
    }
}

/// Compose CLI invoked as a child process per operation.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    compose: Vec<String>,
    prune: Vec<String>,
    compose_file: Option<String>,
    project_dir: PathBuf,
}

impl DockerCompose {
    pub fn from_config(config: &RestartConfig, project_dir: &Path) -> Result<Self> {
        let compose = parse_command(&config.compose_command, "compose command")?;
        let prune = parse_command(&config.prune_command, "prune command")?;
        Ok(Self {
            compose,
            prune,
            compose_file: config.compose_file.clone(),
            project_dir: project_dir.to_path_buf(),
        })
    }

    /// Full argv for a compose subcommand, including the `-f` file if set.
    pub fn compose_argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv = self.compose.clone();
        if let Some(file) = &self.compose_file {
            argv.push("-f".to_string());
            argv.push(file.clone());
        }
        argv.extend(args.iter().map(|arg| arg.to_string()));
        argv
    }

    /// Run a mutating subcommand; its progress goes to the terminal.
    fn run_compose(&self, args: &[&str]) -> Result<()> {
        let argv = self.compose_argv(args);
        self.run(&argv, Streams::Passthrough).map(drop)
    }

    fn capture_compose(&self, args: &[&str]) -> Result<String> {
        let argv = self.compose_argv(args);
        self.run(&argv, Streams::Capture)
    }

    fn run(&self, argv: &[String], mode: Streams) -> Result<String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty container command"))?;
        let resolved = resolve_program(program);
        let start = Instant::now();
        let output = Command::new(&resolved)
            .args(args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(mode.stdio())
            .stderr(mode.stdio())
            .output()
            .with_context(|| format!("spawn {}", resolved.display()))?;
        let elapsed_ms = start.elapsed().as_millis();

        tracing::info!(
            elapsed_ms,
            program = %program,
            args = ?args,
            status = ?output.status.code(),
            "container command complete"
        );

        check_output(argv, output)
    }
}

fn check_output(argv: &[String], output: Output) -> Result<String> {
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        return Err(CommandFailed {
            command: shell_words::join(argv),
            code: output.status.code(),
            stderr,
        }
        .into());
    }
    if !stderr.trim().is_empty() {
        // Compose reports progress on stderr even when it succeeds.
        tracing::debug!(stderr = %stderr.trim(), "container command stderr");
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn parse_command(raw: &str, label: &str) -> Result<Vec<String>> {
    let words = shell_words::split(raw).with_context(|| format!("parse {label}: {raw}"))?;
    if words.is_empty() {
        return Err(anyhow!("{label} is empty"));
    }
    Ok(words)
}

/// Resolve bare program names through PATH; paths are used as given.
fn resolve_program(program: &str) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    which::which(program).unwrap_or_else(|_| PathBuf::from(program))
}

/// Parse `--services` style output (one name per line) into unit names.
pub fn parse_unit_names(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl ContainerGroup for DockerCompose {
    fn teardown(&mut self, remove_volumes: bool) -> Result<()> {
        let args: &[&str] = if remove_volumes {
            &["down", "-v"]
        } else {
            &["down"]
        };
        self.run_compose(args)
    }

    fn prune_unused(&mut self) -> Result<()> {
        self.run(&self.prune, Streams::Passthrough).map(drop)
    }

    fn build(&mut self, unit: &str, no_cache: bool) -> Result<()> {
        let mut args = vec!["build"];
        if no_cache {
            args.push("--no-cache");
        }
        args.push(unit);
        self.run_compose(&args)
    }

    fn start(&mut self, unit: &str) -> Result<()> {
        self.run_compose(&["up", "-d", unit])
    }

    fn start_all(&mut self) -> Result<()> {
        self.run_compose(&["up", "-d"])
    }

    fn declared_units(&mut self) -> Result<BTreeSet<String>> {
        let text = self.capture_compose(&["config", "--services"])?;
        Ok(parse_unit_names(&text))
    }

    fn list_running(&mut self) -> Result<BTreeSet<String>> {
        let text = self.capture_compose(&["ps", "--services", "--filter", "status=running"])?;
        Ok(parse_unit_names(&text))
    }

    fn status(&mut self) -> Result<String> {
        self.capture_compose(&["ps"])
    }

    fn logs(&mut self, unit: &str, tail: Option<usize>) -> Result<String> {
        let tail = tail.map(|lines| lines.to_string());
        let mut args = vec!["logs", "--no-color"];
        if let Some(tail) = tail.as_deref() {
            args.push("--tail");
            args.push(tail);
        }
        args.push(unit);
        self.capture_compose(&args)
    }
}
