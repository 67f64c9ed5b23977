//! telechat-core: IESG telechat document synchronization
//!
//! Fetches the telechat agenda, groups the listed drafts by telechat date
//! and mirrors each draft as `<base>/<date>/<draft>-<rev>.pdf`.
//!
//! - [`source`]: agenda fetching and decoding (HTML page or JSON agenda)
//! - [`coordinator`]: directory preparation and the bounded download pool
//! - [`outcome`]: per-document results and the run report

pub mod agenda;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod source;
pub mod telemetry;

pub use agenda::{validate_component, Agenda, DocumentId, UNKNOWN_DATE};
pub use config::{
    expand_home, SyncConfig, DEFAULT_AGENDA_URL, DEFAULT_BASE_DIR, DEFAULT_DOC_URL,
    DEFAULT_ITEM_TIMEOUT, DEFAULT_WORKERS,
};
pub use coordinator::FetchCoordinator;
pub use error::{Result, SyncError};
pub use outcome::{FailureStage, FetchOutcome, SyncReport};
pub use source::{extract_date, parse_html, parse_json, AgendaFormat, AgendaSource, HttpAgendaSource};
pub use telemetry::{init_tracing, SyncSpan};

pub use tokio_util::sync::CancellationToken;

/// Fetch the agenda from `source` and sync it with `coordinator`.
///
/// Agenda errors abort before any directory is created.
pub async fn run_sync(
    source: &dyn AgendaSource,
    coordinator: &FetchCoordinator,
    base_dir: &std::path::Path,
) -> Result<SyncReport> {
    let agenda = source.fetch().await?;
    coordinator.sync_all(base_dir, &agenda).await
}
