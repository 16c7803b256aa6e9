//! Judging orchestrator.
//!
//! Drives one submission through staging, an optional compile step and the
//! ordered test cases, stopping at the first failing case. Every outcome of
//! the contestant's code becomes an [`Answer`]; only infrastructure faults
//! surface as [`JudgeError`]. The sandbox is torn down exactly once on every
//! path after it has been created, and the staged code directory is removed
//! when it goes out of scope.

mod compare;

pub(crate) use compare::outputs_match;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::domain::{Answer, Execution, Problem, Submission};
use crate::language::{LanguageConfig, LanguageRegistry};
use crate::sandbox::{ExecOutcome, ExecRequest, Sandbox, SandboxDriver, SandboxError, SandboxSpec};
use crate::sink::{CreateExecution, ExecutionSink};
use crate::staging::{StagedCode, Stager, StagingError, TestCase};

/// Faults that prevent a judging attempt from producing an answer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum JudgeError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Failed to record execution: {0:#}")]
    Sink(anyhow::Error),
}

/// Terminal state of a judging attempt, before it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Verdict {
    pub answer: Answer,
    pub last_test_case: Option<usize>,
    pub outputs: Vec<String>,
}

impl Verdict {
    fn compilation_error() -> Self {
        Self {
            answer: Answer::CompilationError,
            last_test_case: None,
            outputs: Vec::new(),
        }
    }
}

/// Judges submissions inside sandboxes.
#[derive(Clone)]
pub(crate) struct Judge {
    registry: Arc<LanguageRegistry>,
    stager: Stager,
    sandbox: Arc<dyn SandboxDriver>,
    sink: Arc<dyn ExecutionSink>,
    name_prefix: String,
    workdir: String,
}

impl Judge {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        stager: Stager,
        sandbox: Arc<dyn SandboxDriver>,
        sink: Arc<dyn ExecutionSink>,
        config: &SandboxConfig,
    ) -> Self {
        Self {
            registry,
            stager,
            sandbox,
            sink,
            name_prefix: config.name_prefix.clone(),
            workdir: config.workdir.clone(),
        }
    }

    /// Judges one submission and records exactly one execution for it.
    pub async fn run(
        &self,
        submission: &Submission,
        problem: &Problem,
    ) -> Result<Execution, JudgeError> {
        info!(
            "Running submission: {} for problem: {} with language: {}",
            submission.id, problem.id, submission.language
        );
        let runtime = self.registry.lookup(submission.language);

        let code = self.stager.stage_code(submission).await?;
        debug!("Code file stored at: {}", code.path().display());
        let test_cases = self.stager.load_test_cases(problem).await?;
        debug!("Loaded {} test cases", test_cases.len());

        let spec = SandboxSpec {
            image: runtime.image.clone(),
            memory_limit_bytes: problem.memory_limit_bytes,
            name: format!("{}_{}", self.name_prefix, submission.id),
        };
        let sandbox = self.sandbox.create(&spec).await?;

        let verdict = self
            .judge_in(&sandbox, runtime, &code, problem, &test_cases)
            .await;
        self.teardown(&sandbox).await;
        let verdict = verdict?;

        info!(
            "Submission {} judged: {} (last test case: {:?} of {})",
            submission.id,
            verdict.answer,
            verdict.last_test_case,
            test_cases.len()
        );

        self.sink
            .create(CreateExecution {
                submission_id: submission.id,
                answer: verdict.answer,
                total_test_cases: test_cases.len(),
                last_test_case: verdict.last_test_case,
                input: problem.test_cases.clone(),
                outputs: verdict.outputs,
            })
            .await
            .map_err(JudgeError::Sink)
    }

    /// Everything that happens while the sandbox exists.
    async fn judge_in(
        &self,
        sandbox: &Sandbox,
        runtime: &LanguageConfig,
        code: &StagedCode,
        problem: &Problem,
        test_cases: &[TestCase],
    ) -> Result<Verdict, JudgeError> {
        self.sandbox.start(sandbox).await?;

        let remote = format!("{}/{}", self.workdir.trim_end_matches('/'), code.file_name());
        self.sandbox.copy_file(sandbox, code.path(), &remote).await?;
        let remote_path = Path::new(&remote);

        if let Some(compile) = runtime.compile_command(remote_path) {
            info!("Compiling submission code in {}", sandbox.name);
            let outcome = self
                .sandbox
                .exec(
                    sandbox,
                    ExecRequest {
                        command: &compile,
                        input: None,
                        time_limit: None,
                    },
                )
                .await;
            match outcome {
                Ok(ExecOutcome::Success { .. }) => {}
                Ok(other) => {
                    info!("Compilation failed in {}: {}", sandbox.name, summarize(&other));
                    return Ok(Verdict::compilation_error());
                }
                Err(e) => {
                    info!("Error while compiling submission in {}: {}", sandbox.name, e);
                    return Ok(Verdict::compilation_error());
                }
            }
        }

        let run = runtime.run_command(remote_path, problem.memory_limit_bytes);
        let time_limit = Duration::from_millis(problem.time_limit_ms);
        Ok(self.run_test_cases(sandbox, &run, time_limit, test_cases).await)
    }

    /// Runs cases in order and stops at the first one that does not pass.
    async fn run_test_cases(
        &self,
        sandbox: &Sandbox,
        run: &[String],
        time_limit: Duration,
        test_cases: &[TestCase],
    ) -> Verdict {
        let mut outputs = Vec::with_capacity(test_cases.len());

        for (index, case) in test_cases.iter().enumerate() {
            let outcome = self
                .sandbox
                .exec(
                    sandbox,
                    ExecRequest {
                        command: run,
                        input: Some(case.input.as_str()),
                        time_limit: Some(time_limit),
                    },
                )
                .await;

            let answer = match outcome {
                Ok(ExecOutcome::Success { stdout }) => {
                    let correct = outputs_match(&stdout, &case.expected_output);
                    outputs.push(stdout);
                    if correct {
                        continue;
                    }
                    info!("Test case with index: {} failed", index);
                    Answer::WrongAnswer
                }
                Ok(ExecOutcome::Timeout) => {
                    info!("Test case with index: {} timed out", index);
                    Answer::TimeLimitExceeded
                }
                Ok(ExecOutcome::OutOfMemory) => {
                    info!("Test case with index: {} ran out of memory", index);
                    Answer::MemoryLimitExceeded
                }
                Ok(ExecOutcome::Failure { exit_code, .. }) => {
                    info!(
                        "Test case with index: {} exited with code {:?}",
                        index, exit_code
                    );
                    Answer::RuntimeError
                }
                Err(e) => {
                    info!("Error while running test case with index: {}: {}", index, e);
                    Answer::RuntimeError
                }
            };

            return Verdict {
                answer,
                last_test_case: Some(index),
                outputs,
            };
        }

        info!("All test cases passed");
        Verdict {
            answer: Answer::Accepted,
            last_test_case: test_cases.len().checked_sub(1),
            outputs,
        }
    }

    /// Best-effort sandbox removal; failures never replace the verdict.
    async fn teardown(&self, sandbox: &Sandbox) {
        if let Err(e) = self.sandbox.kill(sandbox).await {
            warn!("Failed to tear down sandbox {}: {}", sandbox.name, e);
        }
    }
}

/// Outcome description without program output.
fn summarize(outcome: &ExecOutcome) -> String {
    match outcome {
        ExecOutcome::Success { .. } => "success".to_string(),
        ExecOutcome::Timeout => "timeout".to_string(),
        ExecOutcome::OutOfMemory => "out of memory".to_string(),
        ExecOutcome::Failure { exit_code, .. } => format!("exit code {exit_code:?}"),
    }
}
