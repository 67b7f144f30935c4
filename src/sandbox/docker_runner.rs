use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::time::timeout;

use crate::config::SandboxConfig;

use super::{ExecutionLimits, ExecutionOutput, SandboxError, SandboxRunner};

// Exit code reported for containers terminated by SIGKILL, which is what the
// kernel OOM killer and `docker kill` both deliver.
const EXIT_SIGKILL: i32 = 137;

/// Executes submissions inside a throwaway docker container.
///
/// The workspace directory is volume-mounted read-write at `/code`; the
/// container gets no network, half a cpu, and the configured memory cap.
/// Stdout and stderr are redirected to files inside the workspace so partial
/// output survives a forced kill.
pub struct DockerRunner {
    id: u8,
    work_dir: PathBuf,
    image: String,
    run_counter: AtomicU64,
}

impl SandboxRunner for DockerRunner {
    fn build(id: u8, config: &SandboxConfig) -> Result<Self> {
        let work_dir = std::env::temp_dir().join("arena-docker").join(id.to_string());
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating sandbox workspace {}", work_dir.display()))?;

        log::info!("DockerRunner {id} initialized at {}", work_dir.display());

        Ok(Self {
            id,
            work_dir,
            image: config.docker_image.clone(),
            run_counter: AtomicU64::new(0),
        })
    }

    fn execute(
        &self,
        program: &str,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionOutput, SandboxError> {
        self.reset_work_dir()
            .map_err(|e| SandboxError::Launch(format!("workspace reset failed: {e}")))?;

        fs::write(self.work_dir.join("solution.py"), program)
            .and_then(|_| fs::write(self.work_dir.join("stdin.txt"), stdin))
            .map_err(|e| SandboxError::Launch(format!("writing run files failed: {e}")))?;

        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let container = format!("arena-run-{}-{run_id}", self.id);
        let memory_mb = (limits.memory_kb / 1024).max(16);

        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&container)
            .arg("--network=none")
            .arg("--cpus=0.5")
            .arg(format!("--memory={memory_mb}m"))
            .arg("-i")
            .arg("-v")
            .arg(format!("{}:/code", self.work_dir.display()))
            .arg("-w")
            .arg("/code")
            .arg(&self.image)
            .arg("sh")
            .arg("-c")
            .arg("python solution.py < stdin.txt > stdout.txt 2> stderr.txt")
            // The container's streams land in stdout.txt/stderr.txt; the
            // client's own chatter is discarded so it can never fill a pipe
            // and stall `wait`.
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let start = Instant::now();
        let wait_result = tokio::runtime::Handle::current().block_on(async {
            let mut child = cmd.spawn()?;
            match timeout(limits.wall_time, child.wait()).await {
                Ok(status) => status.map(Some),
                Err(_elapsed) => {
                    // The container keeps running if only the client dies.
                    kill_container(&container).await;
                    let _ = child.wait().await;
                    Ok(None)
                }
            }
        });

        let elapsed = start.elapsed();
        let status = match wait_result {
            Ok(status) => status,
            Err(e) => return Err(SandboxError::Launch(format!("docker spawn failed: {e}"))),
        };

        let stdout = fs::read_to_string(self.work_dir.join("stdout.txt")).unwrap_or_default();
        let stderr = fs::read_to_string(self.work_dir.join("stderr.txt")).unwrap_or_default();

        let (exit_code, timed_out) = match status {
            Some(status) => (status.code(), false),
            None => (None, true),
        };
        let memory_exceeded = !timed_out && exit_code == Some(EXIT_SIGKILL);

        Ok(ExecutionOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            memory_exceeded,
            wall_time: elapsed,
        })
    }
}

impl DockerRunner {
    fn reset_work_dir(&self) -> std::io::Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)
    }
}

async fn kill_container(name: &str) {
    let result = tokio::process::Command::new("docker")
        .args(["kill", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Err(e) = result {
        log::warn!("Failed to kill container {name}: {e}");
    }
}
