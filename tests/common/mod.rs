//! Shared test infrastructure for integration tests.
//!
//! Each fixture is a throwaway project directory with a fake `docker`
//! script standing in for the compose CLI. The script appends every
//! invocation to a log so tests can assert on command order.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const DATA_FILE: &str = "data/simulation.sumocfg";

const FAKE_DOCKER: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_DOCKER_LOG"
for last; do :; done
case "$*" in
  *"build"*)
    if [ -n "$FAKE_BUILD_EXIT" ]; then
      echo "failed to solve: simulated" >&2
      exit "$FAKE_BUILD_EXIT"
    fi
    ;;
  *"ps --services --filter status=running"*)
    for unit in $FAKE_RUNNING; do echo "$unit"; done
    ;;
  *"config --services"*)
    echo sumo; echo modbus-bridge; echo scada-hmi
    ;;
  *" logs "*)
    echo "log line from $last"
    ;;
  *" ps")
    echo "NAME STATUS"
    for unit in $FAKE_RUNNING; do echo "$unit running"; done
    ;;
esac
exit 0
"#;

/// Units reported running by the fake compose CLI on a healthy stack.
pub const HEALTHY: &str = "sumo modbus-bridge scada-hmi";

pub struct StackFixture {
    pub dir: TempDir,
    log: PathBuf,
    running: String,
    build_exit: Option<i32>,
}

impl StackFixture {
    /// Project with a compose stand-in and the data file in place.
    pub fn healthy() -> Self {
        let fixture = Self::without_data();
        fixture.write_data_file();
        fixture
    }

    pub fn without_data() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let docker = dir.path().join("bin").join("docker");
        fs::create_dir_all(docker.parent().expect("bin dir")).expect("create bin dir");
        fs::write(&docker, FAKE_DOCKER).expect("write fake docker");
        let log = dir.path().join("docker.log");

        // Run through sh so the freshly written script is never exec'd directly.
        let docker_word = format!(
            "sh {}",
            shell_words::quote(&docker.display().to_string())
        );
        let config = serde_json::json!({
            "compose_command": format!("{docker_word} compose"),
            "prune_command": format!("{docker_word} system prune -f"),
            "poll_interval_ms": 20,
        });
        fs::write(
            dir.path().join("scada-restart.json"),
            serde_json::to_string_pretty(&config).expect("serialize config"),
        )
        .expect("write config");

        Self {
            dir,
            log,
            running: HEALTHY.to_string(),
            build_exit: None,
        }
    }

    pub fn with_running(mut self, units: &str) -> Self {
        self.running = units.to_string();
        self
    }

    pub fn with_failing_build(mut self, code: i32) -> Self {
        self.build_exit = Some(code);
        self
    }

    pub fn write_data_file(&self) {
        let path = self.path().join(DATA_FILE);
        fs::create_dir_all(path.parent().expect("data dir")).expect("create data dir");
        fs::write(path, "<configuration/>").expect("write data file");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run the binary with `args` against this project.
    pub fn run(&self, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_scada-restart"));
        command
            .args(args)
            .arg("--project-dir")
            .arg(self.path())
            .arg("--no-color")
            .env("FAKE_DOCKER_LOG", &self.log)
            .env("FAKE_RUNNING", &self.running)
            .env_remove("SCADA_RESTART_COMPOSE")
            .env_remove("RUST_LOG");
        match self.build_exit {
            Some(code) => command.env("FAKE_BUILD_EXIT", code.to_string()),
            None => command.env_remove("FAKE_BUILD_EXIT"),
        };
        command.output().expect("run scada-restart")
    }

    /// Fake compose invocations, one per line, without the program path.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
