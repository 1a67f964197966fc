//! Staged restart of the simulation/bridge stack.
//!
//! The sequence is linear and fail-fast. Only two conditions end a run early
//! with a distinguished outcome: a missing data file and a simulation unit
//! that never reaches the running list. Any collaborator error outside the
//! best-effort teardown/prune steps is returned to the caller unchanged.
use crate::compose::ContainerGroup;
use crate::config::RestartConfig;
use crate::console::Console;
use crate::readiness::{tcp_reachable, wait_until, Clock, Readiness};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Numbered stages shown in progress banners.
pub const STAGE_COUNT: u8 = 5;

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    MissingDataFile,
    SimulationFailedToStart,
}

impl Outcome {
    /// Process exit code. Both failures share code 1 unless `distinct` is set.
    pub fn exit_code(self, distinct: bool) -> i32 {
        match (self, distinct) {
            (Outcome::Success, _) => 0,
            (_, false) => 1,
            (Outcome::MissingDataFile, true) => 2,
            (Outcome::SimulationFailedToStart, true) => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Teardown,
    Prune,
    Precheck,
    Rebuild,
    StartSim,
    VerifySim,
    StartBridge,
    StartRest,
    Report,
}

impl Stage {
    /// Banner number; the bring-up sub-steps share stage 5.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Stage::Teardown => Some(1),
            Stage::Prune => Some(2),
            Stage::Precheck => Some(3),
            Stage::Rebuild => Some(4),
            Stage::StartSim | Stage::VerifySim | Stage::StartBridge | Stage::StartRest => Some(5),
            Stage::Report => None,
        }
    }
}

/// Timing and notes for one executed stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Machine-readable summary of a finished run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub exit_code: i32,
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    #[cfg(test)]
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }
}

/// Path of the required data file, or the missing path when absent.
pub fn check_data_file(config: &RestartConfig, project_dir: &Path) -> Result<PathBuf, PathBuf> {
    let path = config.data_path(project_dir);
    if path.is_file() {
        Ok(path)
    } else {
        Err(path)
    }
}

/// Print the missing-data-file diagnostic.
pub fn report_missing_data_file<W: Write>(
    console: &mut Console<W>,
    config: &RestartConfig,
    missing: &Path,
) -> Result<()> {
    console.fail(&format!("Data file {} not found", config.data_file))?;
    console.hint(&format!("expected at {}", missing.display()))?;
    let data_dir = missing
        .parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| ".".to_string());
    console.hint(&format!(
        "copy the simulation scenario files into {data_dir} and rerun"
    ))?;
    Ok(())
}

/// Final status table plus the bridge log tail.
pub fn print_report<G, W>(
    group: &mut G,
    console: &mut Console<W>,
    bridge_unit: &str,
    tail: usize,
) -> Result<()>
where
    G: ContainerGroup + ?Sized,
    W: Write,
{
    console.heading("Unit status")?;
    let status = group.status().context("query unit status")?;
    console.block(&status)?;
    console.heading(&format!("Last {tail} log lines of {bridge_unit}"))?;
    let logs = group
        .logs(bridge_unit, Some(tail))
        .with_context(|| format!("read {bridge_unit} logs"))?;
    console.block(&logs)?;
    Ok(())
}

/// Drives one restart over a container group.
pub struct Orchestrator<'a, G: ?Sized, C: ?Sized, W: Write> {
    group: &'a mut G,
    clock: &'a C,
    console: Console<W>,
    config: &'a RestartConfig,
    project_dir: &'a Path,
    records: Vec<StageRecord>,
}

impl<'a, G, C, W> Orchestrator<'a, G, C, W>
where
    G: ContainerGroup + ?Sized,
    C: Clock + ?Sized,
    W: Write,
{
    pub fn new(
        group: &'a mut G,
        clock: &'a C,
        console: Console<W>,
        config: &'a RestartConfig,
        project_dir: &'a Path,
    ) -> Self {
        Self {
            group,
            clock,
            console,
            config,
            project_dir,
            records: Vec::new(),
        }
    }

    /// Run the full sequence.
    ///
    /// `Ok` carries the outcome, including the two distinguished failures;
    /// `Err` is a pass-through collaborator failure.
    pub fn run(mut self) -> Result<RunReport> {
        let outcome = self.sequence()?;
        let exit_code = outcome.exit_code(self.config.distinct_exit_codes);
        tracing::info!(?outcome, exit_code, "restart finished");
        Ok(RunReport {
            outcome,
            exit_code,
            stages: self.records,
        })
    }

    fn sequence(&mut self) -> Result<Outcome> {
        self.teardown()?;
        self.prune()?;
        if !self.precheck()? {
            return Ok(Outcome::MissingDataFile);
        }
        self.rebuild()?;
        self.start_simulation()?;
        if !self.verify_simulation()? {
            return Ok(Outcome::SimulationFailedToStart);
        }
        self.start_bridge()?;
        self.start_rest()?;
        self.report()?;
        Ok(Outcome::Success)
    }

    fn banner(&mut self, stage: Stage, title: &str) -> Result<()> {
        if let Some(ordinal) = stage.ordinal() {
            self.console.stage(ordinal, STAGE_COUNT, title)?;
        }
        tracing::debug!(?stage, "stage start");
        Ok(())
    }

    fn record(&mut self, stage: Stage, started: Duration, note: Option<String>) {
        let elapsed = self.clock.now().saturating_sub(started);
        self.records.push(StageRecord {
            stage,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            note,
        });
    }

    fn teardown(&mut self) -> Result<()> {
        let started = self.clock.now();
        self.banner(Stage::Teardown, "Stopping units and removing volumes")?;
        let note = match self.group.teardown(true) {
            Ok(()) => {
                self.console.ok("Units stopped")?;
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "teardown failed; continuing");
                self.console.warn(&format!("Teardown failed, continuing: {err}"))?;
                Some(err.to_string())
            }
        };
        self.record(Stage::Teardown, started, note);
        Ok(())
    }

    fn prune(&mut self) -> Result<()> {
        let started = self.clock.now();
        self.banner(Stage::Prune, "Pruning unused container resources")?;
        let note = match self.group.prune_unused() {
            Ok(()) => {
                self.console.ok("Unused resources pruned")?;
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "prune failed; continuing");
                self.console.warn(&format!("Prune failed, continuing: {err}"))?;
                Some(err.to_string())
            }
        };
        self.record(Stage::Prune, started, note);
        Ok(())
    }

    fn precheck(&mut self) -> Result<bool> {
        let started = self.clock.now();
        self.banner(Stage::Precheck, "Checking simulation data file")?;
        let found = match check_data_file(self.config, self.project_dir) {
            Ok(path) => {
                self.console
                    .ok(&format!("Data file present: {}", path.display()))?;
                true
            }
            Err(missing) => {
                tracing::warn!(path = %missing.display(), "data file missing");
                report_missing_data_file(&mut self.console, self.config, &missing)?;
                false
            }
        };
        let note = (!found).then(|| format!("missing {}", self.config.data_file));
        self.record(Stage::Precheck, started, note);
        Ok(found)
    }

    fn rebuild(&mut self) -> Result<()> {
        let started = self.clock.now();
        let bridge = self.config.bridge_unit.clone();
        self.banner(Stage::Rebuild, &format!("Rebuilding {bridge} without cache"))?;
        self.group
            .build(&bridge, true)
            .with_context(|| format!("rebuild {bridge}"))?;
        self.console.ok(&format!("{bridge} image rebuilt"))?;
        self.record(Stage::Rebuild, started, None);
        Ok(())
    }

    fn start_simulation(&mut self) -> Result<()> {
        let started = self.clock.now();
        let sim = self.config.simulation_unit.clone();
        self.banner(Stage::StartSim, &format!("Starting {sim}"))?;
        self.group
            .start(&sim)
            .with_context(|| format!("start {sim}"))?;
        self.record(Stage::StartSim, started, None);
        Ok(())
    }

    fn verify_simulation(&mut self) -> Result<bool> {
        let started = self.clock.now();
        let sim = self.config.simulation_unit.clone();
        let readiness =
            self.wait_for_units(std::slice::from_ref(&sim), self.config.sim_timeout())?;
        let waited = readiness.waited();
        if readiness.is_ready() {
            self.console
                .ok(&format!("{sim} running after {}", format_wait(waited)))?;
            self.record(Stage::VerifySim, started, None);
            return Ok(true);
        }

        tracing::warn!(
            unit = %sim,
            waited_ms = waited.as_millis(),
            "simulation unit not running"
        );
        self.console
            .fail(&format!("{sim} is not running after {}", format_wait(waited)))?;
        self.console.heading(&format!("{sim} logs"))?;
        match self.group.logs(&sim, None) {
            Ok(logs) => self.console.block(&logs)?,
            Err(err) => {
                tracing::warn!(error = %err, unit = %sim, "could not read logs");
                self.console.warn(&format!("Could not read {sim} logs: {err}"))?;
            }
        }
        self.console.hint(&format!(
            "inspect the {sim} logs above and fix the simulation before rerunning"
        ))?;
        self.record(Stage::VerifySim, started, Some(format!("{sim} not running")));
        Ok(false)
    }

    fn start_bridge(&mut self) -> Result<()> {
        let started = self.clock.now();
        let bridge = self.config.bridge_unit.clone();
        self.banner(Stage::StartBridge, &format!("Starting {bridge}"))?;
        self.group
            .start(&bridge)
            .with_context(|| format!("start {bridge}"))?;
        let readiness =
            self.wait_for_units(std::slice::from_ref(&bridge), self.config.bridge_timeout())?;
        let mut note = None;
        if readiness.is_ready() {
            self.console.ok(&format!("{bridge} running"))?;
        } else {
            tracing::warn!(unit = %bridge, "bridge not running within budget");
            self.console.warn(&format!(
                "{bridge} not reported running after {}",
                format_wait(readiness.waited())
            ))?;
            note = Some(format!("{bridge} not running"));
        }
        if let Some(probe_note) = self.probe_bridge()? {
            note = Some(probe_note);
        }
        self.record(Stage::StartBridge, started, note);
        Ok(())
    }

    /// Poll the Modbus endpoint, if configured. Returns a note when the
    /// endpoint stays out of reach; an unresolvable address counts as that.
    fn probe_bridge(&mut self) -> Result<Option<String>> {
        let Some(raw) = self.config.bridge_probe.clone() else {
            return Ok(None);
        };
        let addr = match self.config.probe_addr() {
            Ok(Some(addr)) => addr,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(probe = %raw, error = %err, "modbus endpoint unresolvable");
                self.console
                    .warn(&format!("Modbus endpoint {raw} not resolvable: {err:#}"))?;
                return Ok(Some(format!("{raw} unresolvable")));
            }
        };
        let probe = wait_until(
            self.clock,
            self.config.bridge_timeout(),
            self.config.poll_interval(),
            || Ok(tcp_reachable(addr, PROBE_CONNECT_TIMEOUT)),
        )?;
        if probe.is_ready() {
            self.console.ok(&format!("Modbus endpoint {addr} reachable"))?;
            return Ok(None);
        }
        tracing::warn!(%addr, "modbus endpoint unreachable");
        self.console
            .warn(&format!("Modbus endpoint {addr} not reachable"))?;
        Ok(Some(format!("{addr} unreachable")))
    }

    fn start_rest(&mut self) -> Result<()> {
        let started = self.clock.now();
        self.banner(Stage::StartRest, "Starting remaining units")?;
        self.group.start_all().context("start remaining units")?;
        let declared: Vec<String> = self
            .group
            .declared_units()
            .context("list declared units")?
            .into_iter()
            .collect();
        let readiness = self.wait_for_units(&declared, self.config.rest_timeout())?;
        let note = if readiness.is_ready() {
            self.console
                .ok(&format!("All {} units running", declared.len()))?;
            None
        } else {
            let running = self.group.list_running().context("list running units")?;
            let missing = missing_units(&declared, &running);
            tracing::warn!(?missing, "units not running within budget");
            self.console
                .warn(&format!("Not running yet: {}", missing.join(", ")))?;
            Some(format!("not running: {}", missing.join(", ")))
        };
        self.record(Stage::StartRest, started, note);
        Ok(())
    }

    fn report(&mut self) -> Result<()> {
        let started = self.clock.now();
        print_report(
            &mut *self.group,
            &mut self.console,
            &self.config.bridge_unit,
            self.config.log_tail_lines,
        )?;
        self.record(Stage::Report, started, None);
        Ok(())
    }

    fn wait_for_units(&mut self, units: &[String], timeout: Duration) -> Result<Readiness> {
        let group = &mut *self.group;
        let readiness = wait_until(self.clock, timeout, self.config.poll_interval(), || {
            let running = group.list_running().context("list running units")?;
            Ok(missing_units(units, &running).is_empty())
        })?;
        tracing::info!(
            ?units,
            ready = readiness.is_ready(),
            polls = readiness.polls(),
            waited_ms = readiness.waited().as_millis(),
            "readiness wait finished"
        );
        Ok(readiness)
    }
}

fn missing_units(expected: &[String], running: &BTreeSet<String>) -> Vec<String> {
    expected
        .iter()
        .filter(|unit| !running.contains(*unit))
        .cloned()
        .collect()
}

fn format_wait(waited: Duration) -> String {
    format!("{:.1}s", waited.as_secs_f64())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
