use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::service::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tar::{Builder, Header};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ExecOutcome, ExecRequest, Sandbox, SandboxDriver, SandboxError, SandboxSpec};
use crate::config::SandboxConfig;

/// Label put on every sandbox container so orphans can be found later.
const SANDBOX_LABEL: &str = "autojudge.sandbox";

/// Exit status of coreutils `timeout` when the limit expired.
const EXIT_TIMEOUT: i64 = 124;
/// 128 + SIGTERM, reported when the command itself got the timeout signal.
const EXIT_SIGTERM: i64 = 143;
/// 128 + SIGKILL, from the OOM killer or `timeout --kill-after`.
const EXIT_SIGKILL: i64 = 137;

/// Extra time granted to the outer watchdog beyond the in-sandbox limit.
const WATCHDOG_SLACK: Duration = Duration::from_secs(1);

/// The output stream can close before Docker records the exit code.
const INSPECT_ATTEMPTS: u32 = 10;
const INSPECT_BASE_DELAY: Duration = Duration::from_millis(10);

/// Docker-backed sandboxes driven through the Engine API.
pub(crate) struct DockerSandbox {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerSandbox {
    /// Connects to the local Docker daemon and checks that it answers.
    pub async fn connect(config: SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| SandboxError::docker_unavailable(format!("cannot ping daemon: {e}")))?;

        Ok(Self { docker, config })
    }

    fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.config.kill_grace_ms)
    }

    /// Starts an exec, feeds stdin, and drains stdout/stderr until it ends
    /// or the output cap is hit.
    async fn attach_and_collect(
        &self,
        exec_id: &str,
        stdin_data: Option<&str>,
    ) -> Result<Collected, SandboxError> {
        let started = self
            .docker
            .start_exec(exec_id, None)
            .await
            .map_err(|e| SandboxError::exec_failed(format!("failed to start exec: {e}")))?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = started
        else {
            return Err(SandboxError::exec_failed("exec started detached"));
        };

        let feed = async {
            if let Some(data) = stdin_data {
                input.write_all(data.as_bytes()).await?;
            }
            input.shutdown().await
        };

        let drain = async {
            let mut buffer = OutputBuffer::new(self.config.max_output_bytes);
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(chunk) => {
                        if !buffer.push(chunk) {
                            return Ok(Collected::OutputLimitExceeded);
                        }
                    }
                    Err(e) => {
                        return Err(SandboxError::exec_failed(format!(
                            "error reading exec output: {e}"
                        )))
                    }
                }
            }
            Ok(buffer.finish())
        };

        let (fed, drained) = tokio::join!(feed, drain);
        if let Err(e) = fed {
            // Programs may exit without consuming their input.
            debug!("stdin closed early: {}", e);
        }
        drained
    }
}

#[async_trait]
impl SandboxDriver for DockerSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<Sandbox, SandboxError> {
        debug!("Creating sandbox: {}", spec.name);
        let config = build_container_config(&self.config, spec);

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => SandboxError::image_not_found(&spec.image),
                other => SandboxError::container_failed("create", &spec.name, other.to_string()),
            })?;

        Ok(Sandbox {
            name: spec.name.clone(),
        })
    }

    async fn start(&self, sandbox: &Sandbox) -> Result<(), SandboxError> {
        debug!("Starting sandbox: {}", sandbox.name);
        self.docker
            .start_container::<String>(&sandbox.name, None)
            .await
            .map_err(|e| SandboxError::container_failed("start", &sandbox.name, e.to_string()))
    }

    async fn copy_file(
        &self,
        sandbox: &Sandbox,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SandboxError> {
        let remote = Path::new(remote_path);
        let file_name = remote
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                SandboxError::container_failed("copy", &sandbox.name, "remote path has no file name")
            })?;
        let remote_dir = remote
            .parent()
            .map_or_else(|| "/".to_string(), |p| p.display().to_string());

        let contents = tokio::fs::read(local_path).await.map_err(|e| {
            SandboxError::container_failed(
                "copy",
                &sandbox.name,
                format!("cannot read {}: {e}", local_path.display()),
            )
        })?;
        let archive = tar_single_file(&file_name, &contents)
            .map_err(|e| SandboxError::container_failed("copy", &sandbox.name, e.to_string()))?;

        debug!("Copying {} to {}:{}", local_path.display(), sandbox.name, remote_path);
        self.docker
            .upload_to_container(
                &sandbox.name,
                Some(UploadToContainerOptions {
                    path: remote_dir,
                    ..Default::default()
                }),
                Bytes::from(archive),
            )
            .await
            .map_err(|e| SandboxError::container_failed("copy", &sandbox.name, e.to_string()))
    }

    async fn exec(
        &self,
        sandbox: &Sandbox,
        request: ExecRequest<'_>,
    ) -> Result<ExecOutcome, SandboxError> {
        let command = wrap_with_timeout(request.command, request.time_limit, self.kill_grace());

        let exec = self
            .docker
            .create_exec(
                &sandbox.name,
                CreateExecOptions {
                    cmd: Some(command),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.config.workdir.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::exec_failed(format!("failed to create exec: {e}")))?;

        let started = Instant::now();
        let collect = self.attach_and_collect(&exec.id, request.input);
        let collected = match request.time_limit {
            Some(limit) => {
                let watchdog = limit + self.kill_grace() + WATCHDOG_SLACK;
                if let Ok(collected) = tokio::time::timeout(watchdog, collect).await {
                    collected?
                } else {
                    warn!(
                        "Exec in {} outlived its watchdog of {:?}",
                        sandbox.name, watchdog
                    );
                    return Ok(ExecOutcome::Timeout);
                }
            }
            None => collect.await?,
        };
        let elapsed = started.elapsed();

        let (stdout, stderr) = match collected {
            Collected::Complete { stdout, stderr } => (stdout, stderr),
            Collected::OutputLimitExceeded => {
                warn!(
                    "Exec in {} exceeded the output limit of {} bytes",
                    sandbox.name, self.config.max_output_bytes
                );
                return Ok(ExecOutcome::Failure {
                    exit_code: None,
                    stderr: format!(
                        "output limit of {} bytes exceeded",
                        self.config.max_output_bytes
                    ),
                });
            }
        };

        let docker = &self.docker;
        let exec_id = exec.id.as_str();
        let exit_code = wait_for_exit(|| async move {
            docker
                .inspect_exec(exec_id)
                .await
                .map(|inspect| exit_state(inspect.running, inspect.exit_code))
                .map_err(|e| SandboxError::exec_failed(format!("failed to inspect exec: {e}")))
        })
        .await?;

        debug!(
            "Exec in {} finished after {:?} with exit code {}",
            sandbox.name, elapsed, exit_code
        );
        Ok(classify_exit(exit_code, stdout, stderr, elapsed, request.time_limit))
    }

    async fn kill(&self, sandbox: &Sandbox) -> Result<(), SandboxError> {
        debug!("Removing sandbox: {}", sandbox.name);
        match self
            .docker
            .remove_container(
                &sandbox.name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already gone.
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::container_failed(
                "kill",
                &sandbox.name,
                e.to_string(),
            )),
        }
    }

    async fn cleanup_orphaned(&self) -> Result<u32, SandboxError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: HashMap::from([("label".to_string(), vec![SANDBOX_LABEL.to_string()])]),
                ..Default::default()
            }))
            .await
            .map_err(|e| SandboxError::docker_unavailable(format!("failed to list containers: {e}")))?;

        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            let name = container
                .names
                .and_then(|names| names.into_iter().next())
                .unwrap_or_else(|| id.clone());

            match self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(()) => {
                    info!("Removed orphaned sandbox {}", name);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphaned sandbox {}: {}", name, e),
            }
        }

        Ok(removed)
    }
}

/// Container configuration: idle `sleep infinity` process, no network,
/// no capabilities, and a memory ceiling without extra swap.
fn build_container_config(sandbox: &SandboxConfig, spec: &SandboxSpec) -> ContainerConfig<String> {
    let memory = i64::try_from(spec.memory_limit_bytes).unwrap_or(i64::MAX);
    #[allow(clippy::cast_possible_truncation)]
    let nano_cpus = (sandbox.cpus * 1_000_000_000.0) as i64;

    let mut host_config = HostConfig {
        memory: Some(memory),
        memory_swap: Some(memory),
        nano_cpus: Some(nano_cpus),
        pids_limit: Some(sandbox.pids_limit),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    if sandbox.network_disabled {
        host_config.network_mode = Some("none".to_string());
    }

    ContainerConfig {
        image: Some(spec.image.clone()),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        working_dir: Some(sandbox.workdir.clone()),
        labels: Some(HashMap::from([(SANDBOX_LABEL.to_string(), "true".to_string())])),
        network_disabled: Some(sandbox.network_disabled),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Prefixes the command with coreutils `timeout` when a limit is set.
fn wrap_with_timeout(
    command: &[String],
    time_limit: Option<Duration>,
    kill_grace: Duration,
) -> Vec<String> {
    let Some(limit) = time_limit else {
        return command.to_vec();
    };

    let mut wrapped = vec![
        "timeout".to_string(),
        format!("--kill-after={}", format_seconds(kill_grace)),
        format_seconds(limit),
    ];
    wrapped.extend_from_slice(command);
    wrapped
}

fn format_seconds(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// What draining an exec's output produced.
#[derive(Debug, PartialEq, Eq)]
enum Collected {
    Complete { stdout: String, stderr: String },
    OutputLimitExceeded,
}

/// Accumulates stdout and stderr up to a combined byte cap.
struct OutputBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: u64,
}

impl OutputBuffer {
    fn new(limit: u64) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
        }
    }

    /// Appends a chunk. Returns false once the cap is exceeded.
    fn push(&mut self, chunk: LogOutput) -> bool {
        let (target, message) = match chunk {
            LogOutput::StdOut { message } => (&mut self.stdout, message),
            LogOutput::StdErr { message } => (&mut self.stderr, message),
            _ => return true,
        };
        target.extend_from_slice(&message);
        (self.stdout.len() + self.stderr.len()) as u64 <= self.limit
    }

    fn finish(self) -> Collected {
        Collected::Complete {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// An exec as reported by one inspect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Exited(i64),
    Running,
    /// Stopped, but Docker has no exit code for it.
    Unknown,
}

fn exit_state(running: Option<bool>, exit_code: Option<i64>) -> ExitState {
    match (running, exit_code) {
        (Some(true), _) | (None, None) => ExitState::Running,
        (_, Some(code)) => ExitState::Exited(code),
        (Some(false), None) => ExitState::Unknown,
    }
}

fn inspect_delay(attempt: u32) -> Duration {
    INSPECT_BASE_DELAY * (1u32 << attempt.min(5))
}

/// Polls `inspect` with backoff until the exec has an exit code.
async fn wait_for_exit<F, Fut>(mut inspect: F) -> Result<i64, SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExitState, SandboxError>>,
{
    for attempt in 0..INSPECT_ATTEMPTS {
        match inspect().await? {
            ExitState::Exited(code) => return Ok(code),
            ExitState::Unknown => {
                return Err(SandboxError::exec_failed("exec stopped without an exit code"))
            }
            ExitState::Running => {
                debug!("Exec still running after its output closed, retrying inspect");
                tokio::time::sleep(inspect_delay(attempt)).await;
            }
        }
    }
    Err(SandboxError::exec_failed(format!(
        "exec still running after {INSPECT_ATTEMPTS} inspect attempts"
    )))
}

/// Maps an exec's exit status to an outcome.
fn classify_exit(
    exit_code: i64,
    stdout: String,
    stderr: String,
    elapsed: Duration,
    time_limit: Option<Duration>,
) -> ExecOutcome {
    match exit_code {
        0 => ExecOutcome::Success { stdout },
        EXIT_TIMEOUT | EXIT_SIGTERM if time_limit.is_some() => ExecOutcome::Timeout,
        EXIT_SIGKILL => {
            if time_limit.is_some_and(|limit| elapsed >= limit) {
                ExecOutcome::Timeout
            } else {
                ExecOutcome::OutOfMemory
            }
        }
        // The JVM exits with 1 when its heap is exhausted instead of being killed.
        1 if stderr.contains("java.lang.OutOfMemoryError") => ExecOutcome::OutOfMemory,
        code => ExecOutcome::Failure {
            exit_code: Some(code),
            stderr,
        },
    }
}

/// Packs one file into an in-memory tar archive for upload.
fn tar_single_file(name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut tar = Builder::new(&mut buf);
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, name, contents)?;
        tar.finish()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "gcc:14".to_string(),
            memory_limit_bytes: 256 * 1024 * 1024,
            name: "autojudge_1234".to_string(),
        }
    }

    #[test]
    fn test_container_config_enforces_limits() {
        let config = build_container_config(&SandboxConfig::default(), &spec());
        let host = config.host_config.unwrap();

        assert_eq!(config.image.as_deref(), Some("gcc:14"));
        assert_eq!(config.cmd.unwrap(), vec!["sleep", "infinity"]);
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.cap_drop.unwrap(), vec!["ALL"]);
        assert_eq!(host.security_opt.unwrap(), vec!["no-new-privileges"]);
        assert!(config.labels.unwrap().contains_key(SANDBOX_LABEL));
    }

    #[test]
    fn test_container_config_with_network() {
        let sandbox = SandboxConfig {
            network_disabled: false,
            ..SandboxConfig::default()
        };
        let config = build_container_config(&sandbox, &spec());
        assert!(config.host_config.unwrap().network_mode.is_none());
    }

    #[test]
    fn test_wrap_without_limit_is_unchanged() {
        let command = vec!["g++".to_string(), "main.cpp".to_string()];
        assert_eq!(
            wrap_with_timeout(&command, None, Duration::from_secs(1)),
            command
        );
    }

    #[test]
    fn test_wrap_with_limit() {
        let command = vec!["python3".to_string(), "/app/main.py".to_string()];
        let wrapped = wrap_with_timeout(
            &command,
            Some(Duration::from_millis(1500)),
            Duration::from_secs(1),
        );
        assert_eq!(
            wrapped,
            vec![
                "timeout",
                "--kill-after=1.000s",
                "1.500s",
                "python3",
                "/app/main.py"
            ]
        );
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify_exit(
            0,
            "42\n".to_string(),
            String::new(),
            Duration::from_millis(10),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(
            outcome,
            ExecOutcome::Success {
                stdout: "42\n".to_string()
            }
        );
    }

    #[test]
    fn test_classify_timeout_codes() {
        let limit = Some(Duration::from_secs(1));
        for code in [EXIT_TIMEOUT, EXIT_SIGTERM] {
            let outcome = classify_exit(
                code,
                String::new(),
                String::new(),
                Duration::from_secs(1),
                limit,
            );
            assert_eq!(outcome, ExecOutcome::Timeout);
        }
    }

    #[test]
    fn test_classify_sigkill_before_limit_is_oom() {
        let outcome = classify_exit(
            EXIT_SIGKILL,
            String::new(),
            String::new(),
            Duration::from_millis(200),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(outcome, ExecOutcome::OutOfMemory);
    }

    #[test]
    fn test_classify_sigkill_after_limit_is_timeout() {
        let outcome = classify_exit(
            EXIT_SIGKILL,
            String::new(),
            String::new(),
            Duration::from_millis(2100),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(outcome, ExecOutcome::Timeout);
    }

    #[test]
    fn test_classify_java_heap_exhaustion() {
        let outcome = classify_exit(
            1,
            String::new(),
            "Exception in thread \"main\" java.lang.OutOfMemoryError: Java heap space".to_string(),
            Duration::from_millis(300),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(outcome, ExecOutcome::OutOfMemory);
    }

    #[test]
    fn test_classify_other_failures() {
        let outcome = classify_exit(
            1,
            String::new(),
            "Traceback".to_string(),
            Duration::from_millis(5),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(
            outcome,
            ExecOutcome::Failure {
                exit_code: Some(1),
                stderr: "Traceback".to_string()
            }
        );

        // Without a time limit, a timeout-looking status is just a failure.
        let compile = classify_exit(
            EXIT_TIMEOUT,
            String::new(),
            String::new(),
            Duration::from_millis(5),
            None,
        );
        assert!(matches!(compile, ExecOutcome::Failure { .. }));
    }

    fn stdout(text: &str) -> LogOutput {
        LogOutput::StdOut {
            message: Bytes::from(text.to_string()),
        }
    }

    fn stderr(text: &str) -> LogOutput {
        LogOutput::StdErr {
            message: Bytes::from(text.to_string()),
        }
    }

    #[test]
    fn test_output_buffer_under_limit() {
        let mut buffer = OutputBuffer::new(16);
        assert!(buffer.push(stdout("42\n")));
        assert!(buffer.push(stderr("warn")));
        assert!(buffer.push(stdout("7\n")));
        assert_eq!(
            buffer.finish(),
            Collected::Complete {
                stdout: "42\n7\n".to_string(),
                stderr: "warn".to_string()
            }
        );
    }

    #[test]
    fn test_output_buffer_cap_counts_both_streams() {
        let mut buffer = OutputBuffer::new(8);
        assert!(buffer.push(stdout("1234")));
        assert!(buffer.push(stderr("5678")));
        assert!(!buffer.push(stdout("9")));
    }

    #[test]
    fn test_max_output_default() {
        assert_eq!(SandboxConfig::default().max_output_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_exit_state() {
        assert_eq!(exit_state(Some(false), Some(0)), ExitState::Exited(0));
        assert_eq!(exit_state(None, Some(137)), ExitState::Exited(137));
        assert_eq!(exit_state(Some(true), None), ExitState::Running);
        assert_eq!(exit_state(Some(true), Some(0)), ExitState::Running);
        assert_eq!(exit_state(None, None), ExitState::Running);
        assert_eq!(exit_state(Some(false), None), ExitState::Unknown);
    }

    #[test]
    fn test_inspect_delay_backs_off_and_caps() {
        assert_eq!(inspect_delay(0), Duration::from_millis(10));
        assert_eq!(inspect_delay(1), Duration::from_millis(20));
        assert_eq!(inspect_delay(5), Duration::from_millis(320));
        assert_eq!(inspect_delay(9), Duration::from_millis(320));
    }

    #[tokio::test]
    async fn test_wait_for_exit_retries_while_running() {
        let mut states = vec![
            ExitState::Exited(0),
            ExitState::Running,
            ExitState::Running,
        ];
        let mut calls = 0;
        let code = wait_for_exit(|| {
            calls += 1;
            let state = states.pop().unwrap();
            async move { Ok::<_, SandboxError>(state) }
        })
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_wait_for_exit_without_code_is_an_error() {
        let err = wait_for_exit(|| async { Ok::<_, SandboxError>(ExitState::Unknown) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without an exit code"));
    }

    #[tokio::test]
    async fn test_wait_for_exit_gives_up() {
        let mut calls = 0;
        let err = wait_for_exit(|| {
            calls += 1;
            async { Ok::<_, SandboxError>(ExitState::Running) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, INSPECT_ATTEMPTS);
        assert!(err.to_string().contains("still running"));
    }

    #[test]
    fn test_tar_single_file() {
        let archive = tar_single_file("main.cpp", b"int main() {}").unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let mut entries = reader.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();

        assert_eq!(entry.path().unwrap().to_str(), Some("main.cpp"));
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "int main() {}");
        assert!(entries.next().is_none());
    }
}
