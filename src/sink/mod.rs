//! Execution result sink.
//!
//! The single place where a judging attempt becomes a persisted
//! [`Execution`] and where downstream consumers hear about it.

mod notify;

pub(crate) use notify::{Notifier, Target};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Answer, Attachment, Execution};

/// Everything needed to record one judging attempt.
#[derive(Debug, Clone)]
pub(crate) struct CreateExecution {
    pub submission_id: Uuid,
    pub answer: Answer,
    pub total_test_cases: usize,
    pub last_test_case: Option<usize>,
    pub input: Attachment,
    pub outputs: Vec<String>,
}

impl CreateExecution {
    /// Stamp the command into an immutable execution record.
    pub fn into_execution(self) -> Execution {
        Execution {
            id: Uuid::new_v4(),
            submission_id: self.submission_id,
            answer: self.answer,
            total_test_cases: self.total_test_cases,
            last_test_case: self.last_test_case,
            input: self.input,
            outputs: self.outputs,
            created_at: Utc::now(),
        }
    }
}

/// Persists executions and triggers their notifications.
#[async_trait]
pub(crate) trait ExecutionSink: Send + Sync {
    async fn create(&self, command: CreateExecution) -> Result<Execution>;
}

/// Writes executions as JSON files under `<dir>/<execution id>.json`, with
/// the outputs alongside as `<execution id>.output.csv`.
pub(crate) struct FsExecutionSink {
    dir: PathBuf,
    notifier: Notifier,
}

impl FsExecutionSink {
    pub fn new(dir: impl Into<PathBuf>, notifier: Notifier) -> Self {
        Self {
            dir: dir.into(),
            notifier,
        }
    }
}

#[async_trait]
impl ExecutionSink for FsExecutionSink {
    async fn create(&self, command: CreateExecution) -> Result<Execution> {
        let execution = command.into_execution();

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let record_path = self.dir.join(format!("{}.json", execution.id));
        let record =
            serde_json::to_vec_pretty(&execution).context("Failed to serialize execution")?;
        tokio::fs::write(&record_path, record)
            .await
            .with_context(|| format!("Failed to write execution: {}", record_path.display()))?;

        let output_path = self.dir.join(format!("{}.output.csv", execution.id));
        tokio::fs::write(&output_path, render_outputs(&execution.outputs))
            .await
            .with_context(|| format!("Failed to write outputs: {}", output_path.display()))?;

        info!(
            "Execution {} recorded for submission {}: {}",
            execution.id, execution.submission_id, execution.answer
        );

        self.notifier.notify(&execution).await;
        Ok(execution)
    }
}

/// Outputs joined one per line, the format consumers download.
pub(crate) fn render_outputs(outputs: &[String]) -> String {
    outputs.join("\n")
}
