//! Sync configuration
//!
//! Defaults point at the public IETF datatracker and can be overridden
//! through `TELECHAT_*` environment variables or the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::source::AgendaFormat;

/// Where the IESG agenda lives.
pub const DEFAULT_AGENDA_URL: &str = "https://datatracker.ietf.org/iesg/agenda/documents/";

/// Where the PDF versions of drafts live.
pub const DEFAULT_DOC_URL: &str = "https://tools.ietf.org/pdf/";

/// Default sync target.
pub const DEFAULT_BASE_DIR: &str = "~/ownCloud/Goodreader/IESG/";

/// Per-document deadline.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_WORKERS: usize = 8;

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory the date directories are created in (may start with `~`)
    pub base_dir: PathBuf,
    /// Agenda endpoint
    pub agenda_url: String,
    /// Base URL documents are fetched from; `<id>.pdf` is appended
    pub doc_base_url: String,
    /// How the agenda body is decoded
    pub agenda_format: AgendaFormat,
    /// Size of the download worker pool
    pub workers: usize,
    /// Deadline for a single document, from pickup to completion
    pub item_timeout: Duration,
    /// Timeout for the agenda request
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            base_dir: PathBuf::from(
                std::env::var("TELECHAT_BASE_DIR").unwrap_or_else(|_| DEFAULT_BASE_DIR.to_string()),
            ),
            agenda_url: std::env::var("TELECHAT_AGENDA_URL")
                .unwrap_or_else(|_| DEFAULT_AGENDA_URL.to_string()),
            doc_base_url: std::env::var("TELECHAT_DOC_URL")
                .unwrap_or_else(|_| DEFAULT_DOC_URL.to_string()),
            agenda_format: AgendaFormat::Auto,
            workers: DEFAULT_WORKERS,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create a config for a specific base directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        SyncConfig {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_agenda_url(mut self, url: &str) -> Self {
        self.agenda_url = url.to_string();
        self
    }

    pub fn with_doc_base_url(mut self, url: &str) -> Self {
        self.doc_base_url = url.to_string();
        self
    }

    pub fn with_format(mut self, format: AgendaFormat) -> Self {
        self.agenda_format = format;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Base directory with a leading `~` expanded.
    pub fn resolved_base_dir(&self) -> PathBuf {
        expand_home(&self.base_dir)
    }

    /// Parse the document base URL so that joining `<id>.pdf` appends.
    pub fn doc_base(&self) -> Result<Url> {
        let mut raw = self.doc_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| {
            SyncError::Config(format!("invalid document URL '{}': {}", self.doc_base_url, e))
        })
    }

    /// Pre-flight checks; run before any network activity.
    pub fn validate(&self) -> Result<()> {
        let base = self.resolved_base_dir();
        if !base.is_dir() {
            return Err(SyncError::Config(format!(
                "base directory {} does not exist or is not a directory",
                base.display()
            )));
        }
        if self.workers == 0 {
            return Err(SyncError::Config("worker count must be at least 1".to_string()));
        }
        if self.item_timeout.is_zero() {
            return Err(SyncError::Config("item timeout must be non-zero".to_string()));
        }
        Url::parse(&self.agenda_url).map_err(|e| {
            SyncError::Config(format!("invalid agenda URL '{}': {}", self.agenda_url, e))
        })?;
        self.doc_base()?;
        Ok(())
    }
}

/// Replace a leading `~` with the home directory.
///
/// Paths without a leading `~` (and `~user` forms) are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert!(!config.agenda_url.is_empty());
        assert!(!config.doc_base_url.is_empty());
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.item_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_expand_home() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        let expanded = expand_home(Path::new("~/ownCloud/IESG"));
        assert_eq!(expanded, PathBuf::from(home).join("ownCloud/IESG"));
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home(Path::new("/srv/iesg")), PathBuf::from("/srv/iesg"));
        assert_eq!(expand_home(Path::new("~bob/iesg")), PathBuf::from("~bob/iesg"));
    }

    #[test]
    fn test_validate_existing_dir() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::new(dir.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_dir_is_config_error() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::new(dir.path().join("missing"));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validate_file_is_not_a_base_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(SyncConfig::new(&file).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::new(dir.path()).with_workers(0);
        assert!(matches!(
            config.validate().unwrap_err(),
            SyncError::Config(_)
        ));
    }

    #[test]
    fn test_doc_base_appends_slash() {
        let config = SyncConfig::new("/tmp").with_doc_base_url("https://example.org/pdf");
        let url = config.doc_base().unwrap().join("draft-foo-01.pdf").unwrap();
        assert_eq!(url.as_str(), "https://example.org/pdf/draft-foo-01.pdf");
    }
}
