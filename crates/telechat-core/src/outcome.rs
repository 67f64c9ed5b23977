//! Per-document fetch outcomes and the run summary built from them.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

/// Step of a retrieval that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Destination file could not be created
    Create,
    /// Request failed or returned a non-success status
    Request,
    /// Streaming the body into the file failed
    Write,
    /// Worker exited without reporting
    Worker,
}

/// Terminal result of one document retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Downloaded {
        date: String,
        file: String,
        bytes: u64,
    },
    AlreadyExisted {
        date: String,
        file: String,
    },
    Failed {
        date: String,
        file: String,
        stage: FailureStage,
        /// Path for `Create`, URL otherwise
        target: String,
        message: String,
    },
    TimedOut {
        date: String,
        file: String,
        #[serde(with = "secs")]
        after: Duration,
    },
    Cancelled {
        date: String,
        file: String,
    },
}

impl FetchOutcome {
    pub fn date(&self) -> &str {
        match self {
            FetchOutcome::Downloaded { date, .. }
            | FetchOutcome::AlreadyExisted { date, .. }
            | FetchOutcome::Failed { date, .. }
            | FetchOutcome::TimedOut { date, .. }
            | FetchOutcome::Cancelled { date, .. } => date,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            FetchOutcome::Downloaded { file, .. }
            | FetchOutcome::AlreadyExisted { file, .. }
            | FetchOutcome::Failed { file, .. }
            | FetchOutcome::TimedOut { file, .. }
            | FetchOutcome::Cancelled { file, .. } => file,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FetchOutcome::Downloaded { .. } | FetchOutcome::AlreadyExisted { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    pub(crate) fn failed(
        date: &str,
        file: &str,
        stage: FailureStage,
        target: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        FetchOutcome::Failed {
            date: date.to_string(),
            file: file.to_string(),
            stage,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn create_failed(
        date: &str,
        file: &str,
        path: &Path,
        err: impl fmt::Display,
    ) -> Self {
        Self::failed(
            date,
            file,
            FailureStage::Create,
            path.display().to_string(),
            err,
        )
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Downloaded { date, file, bytes } => {
                write!(f, "{}: Downloaded {}: {} bytes.", date, file, bytes)
            }
            FetchOutcome::AlreadyExisted { date, file } => {
                write!(f, "{}: {} already existed.", date, file)
            }
            FetchOutcome::Failed {
                stage,
                target,
                message,
                ..
            } => match stage {
                FailureStage::Create => write!(f, "Error creating {}: {}", target, message),
                FailureStage::Worker => write!(f, "Error fetching {}: {}", target, message),
                FailureStage::Request | FailureStage::Write => {
                    write!(f, "Error while downloading {}: {}", target, message)
                }
            },
            FetchOutcome::TimedOut { date, file, after } => write!(
                f,
                "Timeout downloading a draft: {}/{} after {}s",
                date,
                file,
                after.as_secs()
            ),
            FetchOutcome::Cancelled { date, file } => {
                write!(f, "{}: {} cancelled before completion", date, file)
            }
        }
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// All outcomes of one sync run, in arrival order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl SyncReport {
    pub fn new(outcomes: Vec<FetchOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Downloaded { .. }))
    }

    pub fn existed(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::AlreadyExisted { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Failed { .. }))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::TimedOut { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Cancelled { .. }))
    }

    /// Rendered outcome lines, skipping empty ones.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(ToString::to_string)
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn count(&self, pred: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}
