//! greenledger: ESRS evidence ingestion and compliance gap detection.

mod display;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use greenledger_core::{Document, GreenledgerConfig, ReportingPeriod, TaxonomyStore};
use greenledger_engine::{
    AlertEngine, Clock, ComplianceMonitor, ExtractionAdapter, JSON_MIME, JsonExtractor, LogSink,
    ManualClock, NotificationSink, Orchestrator, RetryPolicy, RunState, SystemClock,
};
use greenledger_mapper::Mapper;
use greenledger_store::{DuckLedgerStore, EvidenceLedger, StoredTable};
use greenledger_sync::{HttpExtractor, WebhookSink};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "greenledger", version)]
#[command(about = "ESRS evidence ingestion and compliance gap detection")]
struct Cli {
    /// YAML settings file
    #[arg(long, global = true, env = "GREENLEDGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a taxonomy file and print its requirement tree
    Taxonomy {
        /// Taxonomy document (JSON or YAML)
        file: PathBuf,
    },
    /// Run evidence documents through extraction, mapping, and commit
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, env = "GREENLEDGER_TAXONOMY")]
        taxonomy: PathBuf,
        /// Reporting period: "2026", "FY2026", or "2026-07-01..2027-06-30"
        #[arg(long)]
        period: Option<ReportingPeriod>,
        /// DuckDB file holding the ledger (in-memory if omitted)
        #[arg(long, env = "GREENLEDGER_DB")]
        db: Option<PathBuf>,
        /// Remote extraction service; the built-in JSON extractor otherwise
        #[arg(long, env = "GREENLEDGER_EXTRACTOR_URL")]
        extractor_url: Option<String>,
        /// Sentence-embedding model directory for semantic matching
        #[arg(long, env = "GREENLEDGER_MODEL_DIR")]
        model_dir: Option<PathBuf>,
    },
    /// Compute gaps and alerts for a reporting period
    Detect {
        #[arg(long, env = "GREENLEDGER_TAXONOMY")]
        taxonomy: PathBuf,
        #[arg(long, env = "GREENLEDGER_DB")]
        db: PathBuf,
        #[arg(long)]
        period: ReportingPeriod,
        /// Evaluate as of this instant (RFC 3339 or YYYY-MM-DD) instead of now
        #[arg(long)]
        at: Option<String>,
        /// Write the gap table to this Parquet file
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Run scheduled compliance cycles until interrupted
    Watch {
        #[arg(long, env = "GREENLEDGER_TAXONOMY")]
        taxonomy: PathBuf,
        #[arg(long, env = "GREENLEDGER_DB")]
        db: PathBuf,
        /// Deliver alerts to this webhook; alerts are logged otherwise
        #[arg(long, env = "GREENLEDGER_WEBHOOK_URL")]
        webhook_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GreenledgerConfig::from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => GreenledgerConfig::default(),
    };
    info!(version = env!("CARGO_PKG_VERSION"), "greenledger starting");

    match cli.command {
        Command::Taxonomy { file } => {
            let store = TaxonomyStore::new();
            let taxonomy = store
                .load_path(&file)
                .with_context(|| format!("loading taxonomy {}", file.display()))?;
            display::print_tree(&taxonomy);
        }
        Command::Ingest {
            files,
            taxonomy,
            period,
            db,
            extractor_url,
            model_dir,
        } => {
            let extractor: Arc<dyn ExtractionAdapter> = match extractor_url {
                Some(url) => Arc::new(HttpExtractor::new(&url)?),
                None => Arc::new(JsonExtractor),
            };
            let mapper = build_mapper(&config, model_dir.as_deref())?;
            ingest(&config, &files, &taxonomy, period, db.as_deref(), extractor, mapper).await?;
        }
        Command::Detect {
            taxonomy,
            db,
            period,
            at,
            export,
        } => {
            let at = at.as_deref().map(parse_instant).transpose()?;
            detect(&config, &taxonomy, &db, period, at, export.as_deref()).await?;
        }
        Command::Watch {
            taxonomy,
            db,
            webhook_url,
        } => {
            let sink: Arc<dyn NotificationSink> = match webhook_url {
                Some(url) => Arc::new(WebhookSink::new(&url)?),
                None => Arc::new(LogSink),
            };
            watch_loop(&config, &taxonomy, &db, sink).await?;
        }
    }
    Ok(())
}

/// Shared pieces every command that touches the ledger needs.
struct Workspace {
    taxonomy: Arc<TaxonomyStore>,
    ledger: Arc<EvidenceLedger>,
    store: DuckLedgerStore,
}

impl Workspace {
    fn open(taxonomy_path: &Path, db: Option<&Path>) -> anyhow::Result<Self> {
        let taxonomy = Arc::new(TaxonomyStore::new());
        taxonomy
            .load_path(taxonomy_path)
            .with_context(|| format!("loading taxonomy {}", taxonomy_path.display()))?;

        let store = match db {
            Some(path) => DuckLedgerStore::open_persistent(path)
                .with_context(|| format!("opening {}", path.display()))?,
            None => DuckLedgerStore::open()?,
        };
        let ledger = if store.has_ledger() {
            let entries = store.load_entries()?;
            info!(entries = entries.len(), "loaded ledger");
            EvidenceLedger::from_entries(entries)
        } else {
            EvidenceLedger::new()
        };
        Ok(Self {
            taxonomy,
            ledger: Arc::new(ledger),
            store,
        })
    }

    fn monitor(
        &self,
        config: &GreenledgerConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Arc<ComplianceMonitor>> {
        let alerts = Arc::new(AlertEngine::new(
            config.alerts.clone(),
            sink,
            RetryPolicy::from_config(&config.pipeline.retry),
        ));
        alerts.restore(self.store.load_open_alerts()?);
        Ok(Arc::new(ComplianceMonitor::new(
            config,
            Arc::clone(&self.taxonomy),
            Arc::clone(&self.ledger),
            alerts,
            clock,
        )))
    }

    /// Persist open alerts and those closed since the last save.
    fn save_alerts(&self, alerts: &AlertEngine) -> anyhow::Result<()> {
        let mut batch = alerts.open_alerts(None);
        batch.extend(alerts.drain_closed());
        let saved = self.store.save_alerts(&batch)?;
        info!(alerts = saved, "saved alerts");
        Ok(())
    }

    /// Persist every period's latest gaps, alert state and the ledger.
    fn save_state(&self, monitor: &ComplianceMonitor) -> anyhow::Result<()> {
        for period in monitor.periods() {
            if let Some(cycle) = monitor.latest(&period) {
                self.store.save_gaps(&period, &cycle.report.gaps)?;
            }
        }
        self.save_alerts(monitor.alerts())?;
        self.save_ledger(monitor.now())
    }

    fn save_ledger(&self, as_of: DateTime<Utc>) -> anyhow::Result<()> {
        let snapshot = self.ledger.snapshot(as_of);
        let entries: Vec<_> = snapshot.entries().into_iter().cloned().collect();
        let saved = self.store.save_entries(&entries)?;
        info!(entries = saved, "saved ledger");
        Ok(())
    }
}

fn build_mapper(config: &GreenledgerConfig, model_dir: Option<&Path>) -> anyhow::Result<Mapper> {
    let threshold = config.mapper.acceptance_threshold;
    match model_dir {
        None => Ok(Mapper::lexical(threshold)),
        #[cfg(feature = "onnx")]
        Some(dir) => {
            let scorer = greenledger_mapper::EmbeddingScorer::load(dir)?;
            Ok(Mapper::new(Arc::new(scorer), threshold))
        }
        #[cfg(not(feature = "onnx"))]
        Some(_) => bail!("--model-dir needs a build with the `onnx` feature"),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => JSON_MIME,
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

fn parse_instant(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid instant {s:?}, expected RFC 3339 or YYYY-MM-DD"))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(at) => Ok(at.and_utc()),
        None => bail!("invalid instant {s:?}"),
    }
}

async fn ingest(
    config: &GreenledgerConfig,
    files: &[PathBuf],
    taxonomy: &Path,
    period: Option<ReportingPeriod>,
    db: Option<&Path>,
    extractor: Arc<dyn ExtractionAdapter>,
    mapper: Mapper,
) -> anyhow::Result<()> {
    let workspace = Workspace::open(taxonomy, db)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orchestrator = Arc::new(
        Orchestrator::new(
            config,
            Arc::clone(&workspace.taxonomy),
            Arc::clone(&workspace.ledger),
            extractor,
            Arc::clone(&clock),
        )
        .with_mapper(mapper),
    );

    let mut ids = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let mut document = Document::new(path.display().to_string(), mime_for(path), bytes);
        if let Some(period) = period {
            document = document.with_period(period);
        }
        ids.push(orchestrator.submit(document)?);
    }
    let mut runs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(run) = orchestrator.wait(id).await {
            runs.push(run);
        }
    }
    display::print_runs(&runs);

    let periods: BTreeSet<ReportingPeriod> = runs
        .iter()
        .filter(|r| r.state == RunState::Committed)
        .map(|r| r.reporting_period)
        .collect();
    let monitor = workspace.monitor(config, Arc::new(LogSink), Arc::clone(&clock))?;
    monitor.sweep();
    for period in periods {
        if let Some(cycle) = monitor.run_cycle(period).await? {
            display::print_report(&cycle.report)?;
        }
    }
    workspace.save_state(&monitor)?;

    let failed = runs.iter().filter(|r| r.state.is_failed()).count();
    if failed > 0 {
        bail!("{failed} of {} documents failed", runs.len());
    }
    Ok(())
}

async fn detect(
    config: &GreenledgerConfig,
    taxonomy: &Path,
    db: &Path,
    period: ReportingPeriod,
    at: Option<DateTime<Utc>>,
    export: Option<&Path>,
) -> anyhow::Result<()> {
    let workspace = Workspace::open(taxonomy, Some(db))?;
    let clock: Arc<dyn Clock> = match at {
        Some(at) => Arc::new(ManualClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let monitor = workspace.monitor(config, Arc::new(LogSink), Arc::clone(&clock))?;
    let expired = monitor.sweep();

    let cycle = monitor
        .run_cycle(period)
        .await?
        .context("compliance cycle was coalesced")?;
    display::print_report(&cycle.report)?;
    display::print_alerts(&monitor.alerts().open_alerts(Some(&period)));

    // A replay of a past instant leaves the stored ledger and alerts untouched.
    if at.is_none() {
        workspace.store.save_gaps(&period, &cycle.report.gaps)?;
        workspace.save_alerts(monitor.alerts())?;
        if !expired.is_empty() {
            workspace.save_ledger(clock.now())?;
        }
    }
    if let Some(path) = export {
        // Export reads the stored gap table.
        if at.is_some() {
            workspace.store.save_gaps(&period, &cycle.report.gaps)?;
        }
        workspace
            .store
            .export_parquet(StoredTable::Gaps, path)
            .with_context(|| format!("exporting gaps to {}", path.display()))?;
        println!("gaps written to {}", path.display());
    }
    Ok(())
}

async fn watch_loop(
    config: &GreenledgerConfig,
    taxonomy: &Path,
    db: &Path,
    sink: Arc<dyn NotificationSink>,
) -> anyhow::Result<()> {
    let workspace = Workspace::open(taxonomy, Some(db))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let monitor = workspace.monitor(config, sink, clock)?;

    let mut completed = monitor.subscribe();
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&monitor).run(rx));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                info!("interrupt received, stopping");
                break;
            }
            changed = completed.changed() => {
                if changed.is_err() {
                    break;
                }
                workspace.save_state(&monitor)?;
            }
        }
    }
    shutdown.send_replace(true);
    handle.await?;

    workspace.save_state(&monitor)?;
    Ok(())
}
