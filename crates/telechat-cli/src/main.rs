//! telechat-sync - IESG telechat document sync
//!
//! Fetches the IESG telechat agenda and mirrors every listed draft as a PDF
//! under `<basedir>/<telechat date>/`.
//!
//! ## Commands
//!
//! - `sync`: download all agenda documents (default target `~/ownCloud/Goodreader/IESG/`)
//! - `agenda`: print the parsed agenda as JSON without downloading anything
//!
//! Outcome lines go to stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Instrument, Level};

use telechat_core::{
    run_sync, AgendaFormat, AgendaSource, FetchCoordinator, HttpAgendaSource, SyncConfig,
    SyncSpan, DEFAULT_AGENDA_URL, DEFAULT_BASE_DIR, DEFAULT_DOC_URL, DEFAULT_ITEM_TIMEOUT,
    DEFAULT_WORKERS,
};

#[derive(Parser)]
#[command(name = "telechat-sync")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync IESG telechat documents to local date directories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every document on the agenda into per-date directories
    Sync {
        /// Base directory holding the date directories
        #[arg(short, long, env = "TELECHAT_BASE_DIR", default_value = DEFAULT_BASE_DIR)]
        basedir: PathBuf,

        #[command(flatten)]
        agenda: AgendaArgs,

        /// Base URL for documents; `<draft>-<rev>.pdf` is appended
        #[arg(long, env = "TELECHAT_DOC_URL", default_value = DEFAULT_DOC_URL)]
        doc_url: String,

        /// Number of concurrent downloads
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Per-document timeout in seconds
        #[arg(short, long, default_value_t = DEFAULT_ITEM_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Print the parsed agenda as JSON
    Agenda {
        #[command(flatten)]
        agenda: AgendaArgs,
    },
}

#[derive(Args)]
struct AgendaArgs {
    /// Agenda URL
    #[arg(short, long = "agenda", env = "TELECHAT_AGENDA_URL", default_value = DEFAULT_AGENDA_URL)]
    agenda_url: String,

    /// Agenda body format: auto, html or json
    #[arg(short, long, default_value = "auto")]
    format: AgendaFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    telechat_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Sync {
            basedir,
            agenda,
            doc_url,
            workers,
            timeout,
        } => {
            let config = SyncConfig::new(basedir)
                .with_agenda_url(&agenda.agenda_url)
                .with_format(agenda.format)
                .with_doc_base_url(&doc_url)
                .with_workers(workers)
                .with_item_timeout(Duration::from_secs(timeout));
            cmd_sync(config).await
        }
        Commands::Agenda { agenda } => {
            let config = SyncConfig::from_env()
                .with_agenda_url(&agenda.agenda_url)
                .with_format(agenda.format);
            cmd_agenda(config).await
        }
    }
}

async fn cmd_sync(config: SyncConfig) -> Result<()> {
    if let Err(e) = config.validate() {
        // Usage errors exit with status 2 before any network activity.
        Cli::command()
            .error(clap::error::ErrorKind::ValueValidation, e)
            .exit();
    }

    let source = HttpAgendaSource::from_config(&config).context("Failed to build agenda client")?;
    let coordinator =
        FetchCoordinator::from_config(&config).context("Failed to build download pool")?;

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling outstanding downloads");
            cancel.cancel();
        }
    });

    let base_dir = config.resolved_base_dir();
    let span = SyncSpan::new();
    let report = run_sync(&source, &coordinator, &base_dir)
        .instrument(span.span())
        .await
        .context("Sync failed")?;

    for line in report.lines() {
        println!("{}", line);
    }

    info!(
        run_id = %span.run_id(),
        downloaded = report.downloaded(),
        failed = report.failed(),
        "sync complete"
    );
    Ok(())
}

async fn cmd_agenda(config: SyncConfig) -> Result<()> {
    let source = HttpAgendaSource::from_config(&config).context("Failed to build agenda client")?;
    let agenda = source
        .fetch()
        .await
        .with_context(|| format!("Failed to fetch agenda from {}", source.url()))?;

    println!("{}", serde_json::to_string_pretty(&agenda)?);
    Ok(())
}
