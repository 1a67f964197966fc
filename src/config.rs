//! Restart configuration.
//!
//! Loads the project-owned `scada-restart.json`, fills defaults, and applies
//! CLI overrides so the orchestrator only ever sees a validated config.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the project directory.
pub const PROJECT_CONFIG_FILE: &str = "scada-restart.json";
/// Environment fallback for the compose command.
pub const COMPOSE_COMMAND_ENV: &str = "SCADA_RESTART_COMPOSE";

pub const DEFAULT_COMPOSE_COMMAND: &str = "docker compose";
pub const DEFAULT_PRUNE_COMMAND: &str = "docker system prune -f";
pub const DEFAULT_DATA_FILE: &str = "data/simulation.sumocfg";
pub const DEFAULT_SIMULATION_UNIT: &str = "sumo";
pub const DEFAULT_BRIDGE_UNIT: &str = "modbus-bridge";

/// Effective restart settings.
///
/// Every field has a default so a missing or partial config file still
/// describes the stock SUMO/Modbus stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartConfig {
    pub compose_command: String,
    pub prune_command: String,
    pub compose_file: Option<String>,
    pub data_file: String,
    pub simulation_unit: String,
    pub bridge_unit: String,
    pub sim_timeout_secs: u64,
    pub bridge_timeout_secs: u64,
    pub rest_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub log_tail_lines: usize,
    pub distinct_exit_codes: bool,
    /// Modbus TCP endpoint polled after the bridge starts, e.g. `localhost:5020`.
    pub bridge_probe: Option<String>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            compose_command: DEFAULT_COMPOSE_COMMAND.to_string(),
            prune_command: DEFAULT_PRUNE_COMMAND.to_string(),
            compose_file: None,
            data_file: DEFAULT_DATA_FILE.to_string(),
            simulation_unit: DEFAULT_SIMULATION_UNIT.to_string(),
            bridge_unit: DEFAULT_BRIDGE_UNIT.to_string(),
            sim_timeout_secs: 10,
            bridge_timeout_secs: 5,
            rest_timeout_secs: 5,
            poll_interval_ms: 500,
            log_tail_lines: 20,
            distinct_exit_codes: false,
            bridge_probe: None,
        }
    }
}

impl RestartConfig {
    pub fn sim_timeout(&self) -> Duration {
        Duration::from_secs(self.sim_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn data_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.data_file)
    }

    /// Resolve the probe address; `None` when no probe is configured.
    pub fn probe_addr(&self) -> Result<Option<SocketAddr>> {
        let Some(raw) = self.bridge_probe.as_deref() else {
            return Ok(None);
        };
        let addr = raw
            .to_socket_addrs()
            .with_context(|| format!("resolve bridge probe address {raw}"))?
            .next()
            .ok_or_else(|| anyhow!("bridge probe address {raw} resolved to nothing"))?;
        Ok(Some(addr))
    }
}

/// Values the CLI may set on top of the file config.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub compose_command: Option<String>,
    pub compose_file: Option<String>,
    pub data_file: Option<String>,
    pub sim_timeout_secs: Option<u64>,
    pub bridge_timeout_secs: Option<u64>,
    pub rest_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub log_tail_lines: Option<usize>,
    pub distinct_exit_codes: bool,
    pub bridge_probe: Option<String>,
}

/// Load a config file as-is.
pub fn load_config(path: &Path) -> Result<RestartConfig> {
    read_config(path).map(|loaded| loaded.config)
}

/// A parsed config file and the env-overridable keys it set itself.
struct LoadedConfig {
    config: RestartConfig,
    sets_compose_command: bool,
}

fn read_config(path: &Path) -> Result<LoadedConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse restart config JSON {}", path.display()))?;
    let sets_compose_command = value.get("compose_command").is_some();
    let config: RestartConfig = serde_json::from_value(value)
        .with_context(|| format!("parse restart config JSON {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        sets_compose_command,
    })
}

/// Find the config file to use, if any.
///
/// An explicit path must exist; the implicit locations are optional.
pub fn locate_config(explicit: Option<&Path>, project_dir: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(anyhow!("config file not found at {}", path.display()));
        }
        return Ok(Some(path.to_path_buf()));
    }
    let project_config = project_dir.join(PROJECT_CONFIG_FILE);
    if project_config.is_file() {
        return Ok(Some(project_config));
    }
    let user_config = dirs::config_dir().map(|dir| dir.join("scada-restart").join("config.json"));
    Ok(user_config.filter(|path| path.is_file()))
}

/// Build the effective config: file (or defaults), then env, then CLI.
pub fn resolve_config(
    explicit: Option<&Path>,
    project_dir: &Path,
    overrides: &ConfigOverrides,
) -> Result<RestartConfig> {
    resolve_config_with_env(
        explicit,
        project_dir,
        overrides,
        std::env::var(COMPOSE_COMMAND_ENV).ok(),
    )
}

fn resolve_config_with_env(
    explicit: Option<&Path>,
    project_dir: &Path,
    overrides: &ConfigOverrides,
    compose_env: Option<String>,
) -> Result<RestartConfig> {
    let mut config = match locate_config(explicit, project_dir)? {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading restart config");
            let loaded = read_config(&path)?;
            if loaded.sets_compose_command {
                loaded.config
            } else {
                apply_compose_env(loaded.config, compose_env)
            }
        }
        None => apply_compose_env(RestartConfig::default(), compose_env),
    };
    apply_overrides(&mut config, overrides);
    validate_config(&config)?;
    Ok(config)
}

fn apply_compose_env(mut config: RestartConfig, env_value: Option<String>) -> RestartConfig {
    if let Some(value) = env_value.filter(|value| !value.trim().is_empty()) {
        config.compose_command = value;
    }
    config
}

pub fn apply_overrides(config: &mut RestartConfig, overrides: &ConfigOverrides) {
    if let Some(value) = &overrides.compose_command {
        config.compose_command = value.clone();
    }
    if let Some(value) = &overrides.compose_file {
        config.compose_file = Some(value.clone());
    }
    if let Some(value) = &overrides.data_file {
        config.data_file = value.clone();
    }
    if let Some(value) = overrides.sim_timeout_secs {
        config.sim_timeout_secs = value;
    }
    if let Some(value) = overrides.bridge_timeout_secs {
        config.bridge_timeout_secs = value;
    }
    if let Some(value) = overrides.rest_timeout_secs {
        config.rest_timeout_secs = value;
    }
    if let Some(value) = overrides.poll_interval_ms {
        config.poll_interval_ms = value;
    }
    if let Some(value) = overrides.log_tail_lines {
        config.log_tail_lines = value;
    }
    if overrides.distinct_exit_codes {
        config.distinct_exit_codes = true;
    }
    if let Some(value) = &overrides.bridge_probe {
        config.bridge_probe = Some(value.clone());
    }
}

/// Reject configs the orchestrator cannot act on.
pub fn validate_config(config: &RestartConfig) -> Result<()> {
    for (label, command) in [
        ("compose_command", &config.compose_command),
        ("prune_command", &config.prune_command),
    ] {
        let words = shell_words::split(command)
            .with_context(|| format!("parse {label}: {command}"))?;
        if words.is_empty() {
            return Err(anyhow!("{label} must be non-empty"));
        }
    }
    for (label, unit) in [
        ("simulation_unit", &config.simulation_unit),
        ("bridge_unit", &config.bridge_unit),
    ] {
        if unit.trim().is_empty() {
            return Err(anyhow!("{label} must be non-empty"));
        }
    }
    if config.simulation_unit == config.bridge_unit {
        return Err(anyhow!(
            "simulation_unit and bridge_unit must differ (both {:?})",
            config.bridge_unit
        ));
    }
    validate_relative_path(&config.data_file, "data_file")?;
    if config.poll_interval_ms == 0 {
        return Err(anyhow!("poll_interval_ms must be greater than zero"));
    }
    if let Some(probe) = config.bridge_probe.as_deref() {
        let (host, port) = probe
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("bridge_probe must be host:port (got {probe:?})"))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(anyhow!("bridge_probe must be host:port (got {probe:?})"));
        }
    }
    Ok(())
}

fn validate_relative_path(rel: &str, label: &str) -> Result<()> {
    if rel.trim().is_empty() {
        return Err(anyhow!("{label} must be non-empty"));
    }
    let path = Path::new(rel);
    if path.is_absolute() {
        return Err(anyhow!("{label} must be relative to the project directory"));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(anyhow!("{label} must not contain '..' segments"));
    }
    Ok(())
}
