//! Submission status guard around a judging attempt.
//!
//! Only submissions still in `JUDGING` are judged automatically, and a
//! status change made while judging was in flight (a human verdict) is
//! never overwritten.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Execution, Status, Submission};
use crate::judge::Judge;
use crate::store::SubmissionStore;

/// What happened to a submission handed to the auto-judge.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// Judged and the answer stored on the submission.
    Judged(Execution),
    /// Judged, but the submission left `JUDGING` meanwhile; its status was kept.
    Superseded(Execution),
    /// Not judged because the submission was no longer `JUDGING`.
    Skipped(Status),
}

#[derive(Clone)]
pub(crate) struct AutoJudge {
    store: Arc<dyn SubmissionStore>,
    judge: Judge,
}

impl AutoJudge {
    pub fn new(store: Arc<dyn SubmissionStore>, judge: Judge) -> Self {
        Self { store, judge }
    }

    pub async fn judge_submission(&self, id: Uuid) -> Result<Outcome> {
        let submission = self.store.load_submission(id).await?;
        if submission.status != Status::Judging {
            info!(
                "Submission {} is {:?}, skipping auto-judge",
                id, submission.status
            );
            return Ok(Outcome::Skipped(submission.status));
        }

        let execution = match self.attempt(&submission).await {
            Ok(execution) => execution,
            Err(e) => {
                self.mark_failed(id).await;
                return Err(e);
            }
        };

        let mut current = self.store.load_submission(id).await?;
        if current.status != Status::Judging {
            info!(
                "Submission {} changed to {:?} while judging, keeping it",
                id, current.status
            );
            return Ok(Outcome::Superseded(execution));
        }

        current.answer = Some(execution.answer);
        current.status = Status::Judged;
        self.store.save_submission(&current).await?;
        info!("Submission {} updated with answer {}", id, execution.answer);

        Ok(Outcome::Judged(execution))
    }

    async fn attempt(&self, submission: &Submission) -> Result<Execution> {
        let problem = self
            .store
            .load_problem(submission.problem_id)
            .await
            .with_context(|| format!("Failed to load problem for submission {}", submission.id))?;

        self.judge
            .run(submission, &problem)
            .await
            .with_context(|| format!("Failed to judge submission {}", submission.id))
    }

    /// Re-reads the submission so a verdict recorded meanwhile is kept.
    async fn mark_failed(&self, id: Uuid) {
        let mut current = match self.store.load_submission(id).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Failed to reload submission {} to mark it FAILED: {:#}", id, e);
                return;
            }
        };
        if current.status != Status::Judging {
            info!(
                "Submission {} changed to {:?} while judging, not marking it FAILED",
                id, current.status
            );
            return;
        }

        current.status = Status::Failed;
        if let Err(e) = self.store.save_submission(&current).await {
            warn!("Failed to mark submission {} as FAILED: {:#}", id, e);
        }
    }
}
