//! Scripted sandbox driver for testing.
//!
//! Runs no code: every `exec` is answered by a closure, and each lifecycle
//! call is recorded so tests can assert on teardown and call order.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ExecOutcome, ExecRequest, Sandbox, SandboxDriver, SandboxError, SandboxSpec};

type Behavior =
    dyn Fn(&[String], Option<&str>, Option<Duration>) -> Result<ExecOutcome, SandboxError>
        + Send
        + Sync;

/// Lifecycle step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Create,
    Start,
    Copy,
}

/// One recorded `exec` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedExec {
    pub command: Vec<String>,
    pub input: Option<String>,
    pub time_limit: Option<Duration>,
}

/// A sandbox driver whose exec results come from a closure.
#[derive(Clone)]
pub(crate) struct MockSandbox {
    behavior: Arc<Behavior>,
    fail_on: Option<Step>,
    fail_kill: bool,
    created: Arc<Mutex<Vec<SandboxSpec>>>,
    copies: Arc<Mutex<Vec<String>>>,
    execs: Arc<Mutex<Vec<RecordedExec>>>,
    kills: Arc<AtomicUsize>,
}

impl MockSandbox {
    /// Create a mock answering every exec with `behavior(command, input, time_limit)`.
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&[String], Option<&str>, Option<Duration>) -> Result<ExecOutcome, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Arc::new(behavior),
            fail_on: None,
            fail_kill: false,
            created: Arc::new(Mutex::new(Vec::new())),
            copies: Arc::new(Mutex::new(Vec::new())),
            execs: Arc::new(Mutex::new(Vec::new())),
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A program that copies stdin to stdout.
    pub fn echo() -> Self {
        Self::new(|_, input, _| {
            Ok(ExecOutcome::Success {
                stdout: input.unwrap_or_default().to_string(),
            })
        })
    }

    /// Make a lifecycle step return an error.
    pub fn failing_at(mut self, step: Step) -> Self {
        self.fail_on = Some(step);
        self
    }

    /// Make `kill` return an error (after counting the call).
    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<SandboxSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<String> {
        self.copies.lock().unwrap().clone()
    }

    pub fn execs(&self) -> Vec<RecordedExec> {
        self.execs.lock().unwrap().clone()
    }

    fn fail(&self, step: Step, name: &str) -> Result<(), SandboxError> {
        if self.fail_on == Some(step) {
            return Err(SandboxError::container_failed("mock", name, format!("{step:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxDriver for MockSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<Sandbox, SandboxError> {
        self.fail(Step::Create, &spec.name)?;
        self.created.lock().unwrap().push(spec.clone());
        Ok(Sandbox {
            name: spec.name.clone(),
        })
    }

    async fn start(&self, sandbox: &Sandbox) -> Result<(), SandboxError> {
        self.fail(Step::Start, &sandbox.name)
    }

    async fn copy_file(
        &self,
        sandbox: &Sandbox,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SandboxError> {
        self.fail(Step::Copy, &sandbox.name)?;
        assert!(local_path.exists(), "staged file must exist while copying");
        self.copies.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    async fn exec(
        &self,
        _sandbox: &Sandbox,
        request: ExecRequest<'_>,
    ) -> Result<ExecOutcome, SandboxError> {
        self.execs.lock().unwrap().push(RecordedExec {
            command: request.command.to_vec(),
            input: request.input.map(String::from),
            time_limit: request.time_limit,
        });
        (self.behavior)(request.command, request.input, request.time_limit)
    }

    async fn kill(&self, sandbox: &Sandbox) -> Result<(), SandboxError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill {
            return Err(SandboxError::container_failed("kill", &sandbox.name, "daemon went away"));
        }
        Ok(())
    }

    async fn cleanup_orphaned(&self) -> Result<u32, SandboxError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox {
            name: "autojudge_test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_echo_returns_input() {
        let mock = MockSandbox::echo();
        let command = vec!["cat".to_string()];
        let outcome = mock
            .exec(
                &sandbox(),
                ExecRequest {
                    command: &command,
                    input: Some("hello"),
                    time_limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::Success {
                stdout: "hello".to_string()
            }
        );
        assert_eq!(mock.execs().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_step() {
        let mock = MockSandbox::echo().failing_at(Step::Start);
        assert!(mock.start(&sandbox()).await.is_err());
        assert!(mock.copy_file(&sandbox(), Path::new("/"), "/app/x").await.is_ok());
    }

    #[tokio::test]
    async fn test_kill_is_counted_even_when_failing() {
        let mock = MockSandbox::echo().failing_kill();
        assert!(mock.kill(&sandbox()).await.is_err());
        assert_eq!(mock.kill_count(), 1);
    }

    #[test]
    fn test_mock_sandbox_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockSandbox>();
    }
}
