//! Error types for telechat-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a sync run.
///
/// Per-document failures never surface here; they are reported as
/// [`FetchOutcome`](crate::outcome::FetchOutcome)s instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid configuration (missing base directory, bad URL, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure while fetching the agenda
    #[error("failed to fetch agenda from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Agenda host answered with a non-success status
    #[error("agenda request to {url} returned HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    /// Agenda body did not have the expected shape
    #[error("failed to decode agenda: {0}")]
    Decode(String),

    /// A date directory could not be created
    #[error("error making {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for telechat-core operations.
pub type Result<T> = std::result::Result<T, SyncError>;
