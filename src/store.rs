use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::{Problem, Submission};

const PROBLEMS_DIR: &str = "problems";
const SUBMISSIONS_DIR: &str = "submissions";
const ATTACHMENTS_DIR: &str = "attachments";
const EXECUTIONS_DIR: &str = "executions";

/// Submission and problem records the auto-judge reads and updates.
#[async_trait]
pub(crate) trait SubmissionStore: Send + Sync {
    async fn load_submission(&self, id: Uuid) -> Result<Submission>;

    async fn save_submission(&self, submission: &Submission) -> Result<()>;

    async fn load_problem(&self, id: Uuid) -> Result<Problem>;
}

/// TOML records under a data directory:
///
/// ```text
/// <data_dir>/problems/<id>.toml
/// <data_dir>/submissions/<id>.toml
/// <data_dir>/attachments/<attachment id>
/// <data_dir>/executions/
/// ```
#[derive(Debug, Clone)]
pub(crate) struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    pub fn executions_dir(&self) -> PathBuf {
        self.root.join(EXECUTIONS_DIR)
    }

    fn submission_path(&self, id: Uuid) -> PathBuf {
        self.root.join(SUBMISSIONS_DIR).join(format!("{id}.toml"))
    }

    fn problem_path(&self, id: Uuid) -> PathBuf {
        self.root.join(PROBLEMS_DIR).join(format!("{id}.toml"))
    }
}

async fn read_record<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {kind} file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse {kind} file: {}", path.display()))
}

#[async_trait]
impl SubmissionStore for FsStore {
    async fn load_submission(&self, id: Uuid) -> Result<Submission> {
        read_record(&self.submission_path(id), "submission").await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<()> {
        let path = self.submission_path(submission.id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(submission).context("Failed to serialize submission")?;

        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write submission file: {}", path.display()))?;

        Ok(())
    }

    async fn load_problem(&self, id: Uuid) -> Result<Problem> {
        read_record(&self.problem_path(id), "problem").await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Answer, Attachment, Language, Status};
    use tempfile::tempdir;

    fn submission() -> Submission {
        Submission {
            id: Uuid::new_v4(),
            problem_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            language: Language::Cpp17,
            status: Status::Judging,
            answer: None,
            created_at: chrono::Utc::now(),
            code: Attachment {
                id: Uuid::new_v4(),
                filename: "main.cpp".to_string(),
                content_type: Some("text/x-c++src".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_submission_save_and_reload() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let mut original = submission();

        store.save_submission(&original).await.unwrap();
        let loaded = store.load_submission(original.id).await.unwrap();
        assert_eq!(loaded, original);

        original.status = Status::Judged;
        original.answer = Some(Answer::Accepted);
        store.save_submission(&original).await.unwrap();
        let loaded = store.load_submission(original.id).await.unwrap();
        assert_eq!(loaded.status, Status::Judged);
        assert_eq!(loaded.answer, Some(Answer::Accepted));
    }

    #[tokio::test]
    async fn test_load_problem_from_toml() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();
        let cases = Uuid::new_v4();
        std::fs::create_dir_all(dir.path().join(PROBLEMS_DIR)).unwrap();
        std::fs::write(
            dir.path().join(PROBLEMS_DIR).join(format!("{id}.toml")),
            format!(
                r#"
id = "{id}"
time_limit_ms = 2000
memory_limit_bytes = 268435456

[test_cases]
id = "{cases}"
filename = "cases.csv"
"#
            ),
        )
        .unwrap();

        let problem = FsStore::new(dir.path()).load_problem(id).await.unwrap();
        assert_eq!(problem.time_limit_ms, 2000);
        assert_eq!(problem.memory_limit_bytes, 256 * 1024 * 1024);
        assert_eq!(problem.test_cases.id, cases);
        assert_eq!(problem.test_cases.content_type, None);
    }

    #[tokio::test]
    async fn test_missing_submission_fails_with_path() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();
        let err = FsStore::new(dir.path())
            .load_submission(id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read submission file"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_layout() {
        let store = FsStore::new("/data");
        assert_eq!(store.attachments_dir(), PathBuf::from("/data/attachments"));
        assert_eq!(store.executions_dir(), PathBuf::from("/data/executions"));
    }
}
