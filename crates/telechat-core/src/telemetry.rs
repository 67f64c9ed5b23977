//! Tracing setup and structured sync events.
//!
//! Call [`init_tracing`] once at program start. Log lines go to stderr so
//! they never mix with the outcome lines printed on stdout.

use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::outcome::{FetchOutcome, SyncReport};

/// Install the process-wide subscriber for the sync tool.
///
/// Everything is written to stderr; stdout is reserved for the per-document
/// outcome lines. `json` switches to one JSON object per event, and `level`
/// applies when `RUST_LOG` is unset. A subscriber installed earlier wins.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry.with(stderr_layer.json()).try_init()
    } else {
        registry.with(stderr_layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Span tagged with a fresh run id, one per sync run.
///
/// ```ignore
/// let span = SyncSpan::new();
/// run_sync(&source, &coordinator, &base).instrument(span.span()).await?;
/// ```
pub struct SyncSpan {
    run_id: uuid::Uuid,
    span: tracing::Span,
}

impl SyncSpan {
    pub fn new() -> Self {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("telechat.sync", run_id = %run_id);
        Self { run_id, span }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

impl Default for SyncSpan {
    fn default() -> Self {
        Self::new()
    }
}

pub fn emit_sync_started(workers: usize, items: usize, dates: usize) {
    info!(event = "sync.started", workers, items, dates);
}

/// Per-item event; failures are raised to warn.
pub fn emit_item_finished(outcome: &FetchOutcome) {
    if outcome.is_error() {
        warn!(
            event = "sync.item",
            date = %outcome.date(),
            file = %outcome.file(),
            outcome = %outcome,
        );
    } else {
        tracing::debug!(
            event = "sync.item",
            date = %outcome.date(),
            file = %outcome.file(),
            outcome = %outcome,
        );
    }
}

pub fn emit_sync_finished(report: &SyncReport, duration_ms: u64) {
    info!(
        event = "sync.finished",
        duration_ms,
        downloaded = report.downloaded(),
        existed = report.existed(),
        failed = report.failed(),
        timed_out = report.timed_out(),
        cancelled = report.cancelled(),
    );
}
