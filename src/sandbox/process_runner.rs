use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::config::SandboxConfig;

use super::{ExecutionLimits, ExecutionOutput, SandboxError, SandboxRunner};

/// Fallback runner that executes submissions as direct host processes.
///
/// Provides the wall-clock timeout and an address-space rlimit, but no
/// filesystem or network isolation. Intended for development machines
/// without docker; not for untrusted production traffic.
pub struct ProcessRunner {
    work_dir: PathBuf,
    python: String,
}

impl SandboxRunner for ProcessRunner {
    fn build(id: u8, config: &SandboxConfig) -> Result<Self> {
        let work_dir = std::env::temp_dir()
            .join("arena-process")
            .join(id.to_string());
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating sandbox workspace {}", work_dir.display()))?;

        log::info!("ProcessRunner {id} initialized at {}", work_dir.display());

        Ok(Self {
            work_dir,
            python: config.python_command.clone(),
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

        let source_path = self.work_dir.join("solution.py");
        fs::write(&source_path, program)
            .map_err(|e| SandboxError::Launch(format!("writing program failed: {e}")))?;

        // Redirect to files so partial output survives a forced kill.
        let stdout_path = self.work_dir.join("stdout.txt");
        let stderr_path = self.work_dir.join("stderr.txt");
        let stdout_file = fs::File::create(&stdout_path)
            .map_err(|e| SandboxError::Launch(format!("creating stdout file failed: {e}")))?;
        let stderr_file = fs::File::create(&stderr_path)
            .map_err(|e| SandboxError::Launch(format!("creating stderr file failed: {e}")))?;

        let mut cmd = tokio::process::Command::new(&self.python);
        cmd.arg("solution.py")
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        let address_space_bytes = limits.memory_kb.saturating_mul(1024);
        unsafe {
            cmd.pre_exec(move || {
                let rlim = libc::rlimit {
                    rlim_cur: address_space_bytes,
                    rlim_max: address_space_bytes,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let stdin_payload = stdin.to_string();
        let start = Instant::now();
        let wait_result = tokio::runtime::Handle::current().block_on(async {
            let mut child = cmd.spawn()?;

            if let Some(mut pipe) = child.stdin.take() {
                // A program that never reads stdin may have exited already;
                // a broken pipe here is not a launch fault.
                let _ = pipe.write_all(stdin_payload.as_bytes()).await;
                let _ = pipe.shutdown().await;
            }

            match timeout(limits.wall_time, child.wait()).await {
                Ok(status) => status.map(Some),
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    Ok(None)
                }
            }
        });

        let elapsed = start.elapsed();
        let status = match wait_result {
            Ok(status) => status,
            Err(e) => {
                return Err(SandboxError::Launch(format!(
                    "spawning {} failed: {e}",
                    self.python
                )));
            }
        };

        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();

        let (exit_code, timed_out) = match status {
            Some(status) => (status.code(), false),
            None => (None, true),
        };
        // The rlimit surfaces inside python as MemoryError rather than a
        // distinctive exit status.
        let memory_exceeded = !timed_out && stderr.contains("MemoryError");

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

impl ProcessRunner {
    fn reset_work_dir(&self) -> std::io::Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)
    }
}
