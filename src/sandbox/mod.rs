//! Sandbox lifecycle for judging untrusted code.
//!
//! One sandbox is provisioned per judging attempt, named after the
//! submission so concurrent attempts never collide. Time and memory limits
//! are enforced by the sandbox itself; callers only interpret the
//! [`ExecOutcome`] it reports.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;

pub(crate) use docker::DockerSandbox;
pub(crate) use error::SandboxError;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Parameters for provisioning a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SandboxSpec {
    pub image: String,
    /// Hard memory ceiling in bytes (swap included).
    pub memory_limit_bytes: u64,
    /// Unique name; must embed the submission id.
    pub name: String,
}

/// A provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sandbox {
    pub name: String,
}

/// A command to run inside a sandbox.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecRequest<'a> {
    pub command: &'a [String],
    /// Written to the command's stdin, which is then closed.
    pub input: Option<&'a str>,
    /// Wall-clock limit; `None` runs unbounded (compile step).
    pub time_limit: Option<Duration>,
}

/// How a command inside the sandbox ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExecOutcome {
    /// Exited with status 0.
    Success { stdout: String },
    /// Killed for exceeding the wall-clock limit.
    Timeout,
    /// Killed for exceeding the memory ceiling.
    OutOfMemory,
    /// Any other non-zero exit.
    Failure {
        exit_code: Option<i64>,
        stderr: String,
    },
}

/// Drives isolated execution environments.
#[async_trait]
pub(crate) trait SandboxDriver: Send + Sync {
    /// Provisions a sandbox with an enforced memory ceiling.
    async fn create(&self, spec: &SandboxSpec) -> Result<Sandbox, SandboxError>;

    /// Brings a created sandbox up.
    async fn start(&self, sandbox: &Sandbox) -> Result<(), SandboxError>;

    /// Copies a local file to `remote_path` inside the sandbox.
    async fn copy_file(
        &self,
        sandbox: &Sandbox,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SandboxError>;

    /// Runs a command. Limit violations come back as outcomes, not errors.
    async fn exec(
        &self,
        sandbox: &Sandbox,
        request: ExecRequest<'_>,
    ) -> Result<ExecOutcome, SandboxError>;

    /// Forcibly terminates the sandbox and reclaims its resources.
    async fn kill(&self, sandbox: &Sandbox) -> Result<(), SandboxError>;

    /// Removes sandboxes left behind by a previous worker. Returns the count.
    async fn cleanup_orphaned(&self) -> Result<u32, SandboxError>;
}
