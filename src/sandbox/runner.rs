use anyhow::Result;

use crate::config::SandboxConfig;

use super::{ExecutionLimits, ExecutionOutput, SandboxError};

/// Trait for the different sandbox execution backends.
///
/// A runner owns a private workspace directory that is wiped before every
/// run, so no state leaks between submissions. Each judge worker holds
/// exactly one runner instance; concurrent runs therefore never share a
/// workspace.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new runner instance with the given worker ID.
    fn build(id: u8, config: &SandboxConfig) -> Result<Self>
    where
        Self: Sized;

    /// Executes one complete program against one stdin payload.
    ///
    /// Blocks the calling thread until the program exits or the wall-clock
    /// limit forces termination; callers run this inside `spawn_blocking`.
    fn execute(
        &self,
        program: &str,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionOutput, SandboxError>;
}
