//! Artifact staging.
//!
//! Fetches submission code and problem test cases from the attachment store.
//! Code is written to a per-submission temp directory because the sandbox
//! needs a real file to copy; the directory is removed when the returned
//! [`StagedCode`] is dropped. Test cases stay in memory and are fed to the
//! program on stdin.

mod attachment;

pub(crate) use attachment::{AttachmentStore, FsAttachmentStore};
#[cfg(test)]
pub(crate) use attachment::MemoryAttachmentStore;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

use crate::domain::{Problem, Submission};

/// Errors that abort a judging attempt before any code runs.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StagingError {
    /// The attachment store could not return the blob.
    #[error("Attachment '{filename}' ({id}) is unreadable: {source}")]
    AttachmentUnreadable {
        filename: String,
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// The test-case file is not a two-column CSV.
    #[error("Malformed test cases at row {row}: {message}")]
    MalformedTestCases { row: usize, message: String },

    /// The local staging directory could not be prepared.
    #[error("Failed to stage code: {0}")]
    Io(#[from] std::io::Error),
}

/// One `(input, expectedOutput)` pair; its position is the judging order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Submission code written to a scoped temp directory.
#[derive(Debug)]
pub(crate) struct StagedCode {
    // Held for its Drop, which deletes the directory.
    _dir: TempDir,
    path: PathBuf,
}

impl StagedCode {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name as it will appear inside the sandbox.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Prepares submission artifacts for the sandbox.
#[derive(Clone)]
pub(crate) struct Stager {
    store: Arc<dyn AttachmentStore>,
}

impl Stager {
    pub fn new(store: Arc<dyn AttachmentStore>) -> Self {
        Self { store }
    }

    /// Downloads the submission code into a fresh temp directory.
    pub async fn stage_code(&self, submission: &Submission) -> Result<StagedCode, StagingError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("autojudge_{}", submission.id))
            .tempdir()?;
        debug!("Temporary directory created: {}", dir.path().display());

        let bytes = self.store.download(&submission.code).await?;
        let file_name = sanitize_file_name(&submission.code.filename);
        let path = dir.path().join(file_name);
        tokio::fs::write(&path, bytes).await?;

        Ok(StagedCode { _dir: dir, path })
    }

    /// Downloads and parses the problem's test cases, preserving row order.
    pub async fn load_test_cases(&self, problem: &Problem) -> Result<Vec<TestCase>, StagingError> {
        let bytes = self.store.download(&problem.test_cases).await?;
        parse_test_cases(&bytes)
    }
}

/// Parses a header-less CSV of `[input, expectedOutput]` rows.
pub(crate) fn parse_test_cases(bytes: &[u8]) -> Result<Vec<TestCase>, StagingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut cases = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| StagingError::MalformedTestCases {
            row,
            message: e.to_string(),
        })?;
        if record.len() != 2 {
            return Err(StagingError::MalformedTestCases {
                row,
                message: format!("expected 2 columns, found {}", record.len()),
            });
        }
        cases.push(TestCase {
            input: record[0].to_string(),
            expected_output: record[1].to_string(),
        });
    }

    Ok(cases)
}

/// Keeps only the final path component so a crafted filename cannot escape
/// the staging directory.
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() || base == ".." {
        "main".to_string()
    } else {
        base
    }
}
