mod docker_runner;
mod process_runner;
mod runner;

use docker_runner::DockerRunner;
use process_runner::ProcessRunner;
pub use runner::SandboxRunner;

use std::time::Duration;

use anyhow::Result;

use crate::config::SandboxConfig;

/// Resource bounds applied to one sandbox run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub wall_time: Duration,
    pub memory_kb: u64,
}

impl ExecutionLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            wall_time: Duration::from_millis(config.time_limit_ms),
            memory_kb: config.memory_limit_kb,
        }
    }
}

/// Outcome of one sandbox run.
///
/// Timeouts and memory kills are in-band results carrying whatever output the
/// program managed to produce; a non-zero exit code is a normal result, not
/// an error. Only a failure to launch the sandbox at all surfaces as `Err`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub wall_time: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to launch sandbox: {0}")]
    Launch(String),
}

/// Creates a sandbox runner based on what the host provides.
///
/// Prefers docker-isolated execution (no network, cpu and memory caps). When
/// docker is not available, falls back to direct host-process execution with
/// an address-space rlimit, which bounds resources but does not isolate the
/// filesystem.
pub fn create_sandbox_runner(id: u8, config: &SandboxConfig) -> Result<Box<dyn SandboxRunner>> {
    let have_docker = std::process::Command::new("which")
        .arg("docker")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);

    if have_docker {
        log::info!("Creating DockerRunner {id} (container isolation)");
        let runner = DockerRunner::build(id, config)?;
        Ok(Box::new(runner))
    } else {
        log::warn!("Creating ProcessRunner {id} (docker unavailable, no filesystem isolation)");
        let runner = ProcessRunner::build(id, config)?;
        Ok(Box::new(runner))
    }
}
