//! Judge stored submissions.
//!
//! Wires the filesystem store, the Docker sandbox and the execution sink
//! into an [`AutoJudge`], then judges the requested submissions with
//! bounded concurrency.

use anyhow::{Context, Result};
use colored::Colorize;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::autojudge::{AutoJudge, Outcome};
use crate::config::Config;
use crate::judge::{Judge, JudgeError};
use crate::language::LanguageRegistry;
use crate::sandbox::DockerSandbox;
use crate::sink::{FsExecutionSink, Notifier, Target};
use crate::staging::{FsAttachmentStore, Stager};
use crate::store::FsStore;

/// Summary line for a submission that went through the auto-judge.
pub fn format_outcome(id: Uuid, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Judged(execution) | Outcome::Superseded(execution) => {
            let last = execution
                .last_test_case
                .map_or_else(|| "-".to_string(), |i| i.to_string());
            let mut line = format!(
                "{} {} {} (last case: {}, total: {})",
                "✓".green(),
                id,
                execution.answer.to_string().bold(),
                last,
                execution.total_test_cases
            );
            if matches!(outcome, Outcome::Superseded(_)) {
                line.push_str(&format!(" {}", "[status changed while judging]".dimmed()));
            }
            line
        }
        Outcome::Skipped(status) => {
            format!("{} {} skipped (status {:?})", "ℹ".blue(), id, status)
        }
    }
}

/// Summary line for a submission that could not be judged.
pub fn format_failure(id: Uuid, error: &anyhow::Error) -> String {
    let mut line = format!("{} {} failed: {:#}", "✗".red(), id, error);
    if let Some(hint) = sandbox_hint(error) {
        line.push_str("\n  ");
        line.push_str(hint);
    }
    line
}

fn sandbox_hint(error: &anyhow::Error) -> Option<&'static str> {
    let sandbox_error = error.chain().find_map(|cause| match cause.downcast_ref::<JudgeError>() {
        Some(JudgeError::Sandbox(e)) => Some(e),
        _ => None,
    })?;

    if sandbox_error.is_image_not_found() {
        Some("Run `autojudge image pull` to fetch sandbox images.")
    } else if sandbox_error.is_docker_unavailable() {
        Some("Is the Docker daemon still running?")
    } else {
        None
    }
}

/// Drops repeated ids, keeping first-seen order. Two attempts on the same
/// submission would fight over one sandbox name.
fn unique_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

pub async fn run(config: &Config, ids: Vec<Uuid>, concurrency: Option<usize>) -> Result<()> {
    let ids = unique_ids(ids);
    let registry = Arc::new(LanguageRegistry::from_config(config)?);
    let store = FsStore::new(&config.storage.data_dir);

    let sandbox = DockerSandbox::connect(config.sandbox.clone())
        .await
        .context("Failed to connect to Docker. Is Docker running?")?;

    let notifier = Notifier::new(Target::parse(config.notifications.on_execution.as_deref()));
    let sink = FsExecutionSink::new(store.executions_dir(), notifier);
    let stager = Stager::new(Arc::new(FsAttachmentStore::new(store.attachments_dir())));

    let judge = Judge::new(
        registry,
        stager,
        Arc::new(sandbox),
        Arc::new(sink),
        &config.sandbox,
    );
    let auto = AutoJudge::new(Arc::new(store), judge);

    let concurrency = concurrency.unwrap_or(config.judge.concurrency).max(1);
    info!(
        "Judging {} submission(s) with concurrency {}",
        ids.len(),
        concurrency
    );

    let mut results = futures_util::stream::iter(ids)
        .map(|id| {
            let auto = auto.clone();
            async move { (id, auto.judge_submission(id).await) }
        })
        .buffer_unordered(concurrency);

    let mut failures = 0usize;
    while let Some((id, result)) = results.next().await {
        match result {
            Ok(outcome) => println!("{}", format_outcome(id, &outcome)),
            Err(e) => {
                failures += 1;
                println!("{}", format_failure(id, &e));
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} submission(s) could not be judged");
    }

    Ok(())
}
