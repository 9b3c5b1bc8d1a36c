//! Document pipeline: extraction, mapping, and ledger commit.
//!
//! Each submitted document becomes a run that moves through the
//! [`RunState`] machine on its own task. Runs are bounded by a semaphore,
//! resubmitting identical content returns the existing run, and a run can
//! be cancelled up to the point its commit begins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use greenledger_core::{
    Document, ExtractedDataPoint, ExtractedField, GreenledgerConfig, ReportingPeriod, Taxonomy,
    TaxonomyStore,
};
use greenledger_mapper::{Mapper, MatchCandidate};
use greenledger_store::{Commit, EvidenceLedger};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::adapters::ExtractionAdapter;
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::monitor::ComplianceMonitor;
use crate::retry::RetryPolicy;
use crate::run::{RunId, RunRecord, RunState, Stage};

struct RunSlot {
    record: RunRecord,
    state: watch::Sender<RunState>,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct Runs {
    by_id: HashMap<RunId, RunSlot>,
    /// Latest run per (source document, content hash).
    by_document: HashMap<(String, String), RunId>,
}

/// A run that made it through extraction and mapping.
struct Prepared {
    _permit: OwnedSemaphorePermit,
    taxonomy: Arc<Taxonomy>,
    accepted: Vec<MatchCandidate>,
}

type StageFailure = (Stage, PipelineError);

pub struct Orchestrator {
    taxonomy: Arc<TaxonomyStore>,
    mapper: Mapper,
    ledger: Arc<EvidenceLedger>,
    extractor: Arc<dyn ExtractionAdapter>,
    monitor: Option<Arc<ComplianceMonitor>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    extraction_timeout: Duration,
    fiscal_year_start_month: u32,
    permits: Arc<Semaphore>,
    runs: Mutex<Runs>,
}

impl Orchestrator {
    pub fn new(
        config: &GreenledgerConfig,
        taxonomy: Arc<TaxonomyStore>,
        ledger: Arc<EvidenceLedger>,
        extractor: Arc<dyn ExtractionAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            taxonomy,
            mapper: Mapper::lexical(config.mapper.acceptance_threshold),
            ledger,
            extractor,
            monitor: None,
            clock,
            retry: RetryPolicy::from_config(&config.pipeline.retry),
            extraction_timeout: config.pipeline.extraction_timeout(),
            fiscal_year_start_month: config.reporting.fiscal_year_start_month,
            permits: Arc::new(Semaphore::new(config.pipeline.max_concurrent_runs.max(1))),
            runs: Mutex::new(Runs::default()),
        }
    }

    pub fn with_mapper(mut self, mapper: Mapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Run a compliance cycle for a run's period after it commits evidence.
    pub fn with_monitor(mut self, monitor: Arc<ComplianceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a run for `document` and return its id without waiting.
    ///
    /// Identical content already committed or in flight returns the existing
    /// run. Content whose last run failed or was cancelled starts afresh.
    pub fn submit(self: &Arc<Self>, document: Document) -> Result<RunId, PipelineError> {
        let now = self.clock.now();
        let period = match document.reporting_period {
            Some(period) => period,
            None => ReportingPeriod::containing(now.date_naive(), self.fiscal_year_start_month)?,
        };
        let key = (
            document.source_document_id.clone(),
            document.content_hash().to_string(),
        );

        let mut runs = self.runs();
        if let Some(existing) = runs.by_document.get(&key).copied()
            && let Some(slot) = runs.by_id.get(&existing)
            && !slot.record.state.is_failed()
        {
            info!(
                run = %existing,
                document = %document.source_document_id,
                state = %slot.record.state,
                "duplicate submission, returning existing run"
            );
            return Ok(existing);
        }

        let record = RunRecord::new(key.0.clone(), key.1.clone(), period, now);
        let id = record.id;
        let (state, _) = watch::channel(RunState::Pending);
        let (cancel, cancel_rx) = watch::channel(false);
        runs.by_id.insert(
            id,
            RunSlot {
                record,
                state,
                cancel,
            },
        );
        runs.by_document.insert(key, id);
        drop(runs);

        info!(run = %id, document = %document.source_document_id, %period, "run submitted");
        let span = info_span!("run", run = %id, document = %document.source_document_id);
        let this = Arc::clone(self);
        tokio::spawn(
            async move { this.execute(id, document, period, cancel_rx).await }.instrument(span),
        );
        Ok(id)
    }

    /// Submit and wait for the run to finish.
    pub async fn process(self: &Arc<Self>, document: Document) -> Result<RunRecord, PipelineError> {
        let id = self.submit(document)?;
        self.wait(id).await.ok_or(PipelineError::Cancelled)
    }

    pub fn status(&self, id: RunId) -> Option<RunState> {
        self.runs().by_id.get(&id).map(|slot| slot.record.state)
    }

    pub fn run(&self, id: RunId) -> Option<RunRecord> {
        self.runs().by_id.get(&id).map(|slot| slot.record.clone())
    }

    /// All runs, oldest first.
    pub fn runs_snapshot(&self) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self
            .runs()
            .by_id
            .values()
            .map(|slot| slot.record.clone())
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    /// Request cancellation. Returns false once the run is committing or
    /// finished.
    pub fn cancel(&self, id: RunId) -> bool {
        let runs = self.runs();
        let Some(slot) = runs.by_id.get(&id) else {
            return false;
        };
        if !slot.record.state.can_transition(RunState::Cancelled) {
            return false;
        }
        slot.cancel.send_replace(true);
        info!(run = %id, state = %slot.record.state, "cancellation requested");
        true
    }

    /// Wait until the run reaches a terminal state.
    pub async fn wait(&self, id: RunId) -> Option<RunRecord> {
        let mut state = self.runs().by_id.get(&id)?.state.subscribe();
        // The sender lives in the run table, so this only ends on a terminal state.
        let _ = state.wait_for(|s| s.is_terminal()).await;
        self.run(id)
    }

    /// Apply `f` to a run's record and publish its state.
    fn update<T>(
        &self,
        id: RunId,
        f: impl FnOnce(&mut RunRecord) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut runs = self.runs();
        let slot = runs.by_id.get_mut(&id).ok_or(PipelineError::Cancelled)?;
        let out = f(&mut slot.record);
        slot.state.send_if_modified(|state| {
            let changed = *state != slot.record.state;
            *state = slot.record.state;
            changed
        });
        out
    }

    async fn execute(
        self: Arc<Self>,
        id: RunId,
        document: Document,
        period: ReportingPeriod,
        mut cancel: watch::Receiver<bool>,
    ) {
        let prepared = tokio::select! {
            biased;
            _ = cancel_requested(&mut cancel) => Err((Stage::Extraction, PipelineError::Cancelled)),
            prepared = self.prepare(id, &document, &period) => prepared,
        };
        let result = match prepared {
            Ok(prepared) => self.commit(id, &period, prepared).await,
            Err(failure) => Err(failure),
        };
        match result {
            Ok(appended) => {
                if let Some(monitor) = &self.monitor {
                    monitor.track(period);
                    if appended > 0
                        && let Err(e) = monitor.run_cycle(period).await
                    {
                        error!(%period, error = %e, "post-commit compliance cycle failed");
                    }
                }
            }
            Err((stage, e)) => self.finish_failed(id, stage, e),
        }
    }

    async fn prepare(
        &self,
        id: RunId,
        document: &Document,
        period: &ReportingPeriod,
    ) -> Result<Prepared, StageFailure> {
        let extraction = |e: PipelineError| (Stage::Extraction, e);
        let mapping = |e: PipelineError| (Stage::Mapping, e);

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| extraction(PipelineError::Cancelled))?;
        self.update(id, |r| r.transition(RunState::Extracting, self.clock.now()))
            .map_err(extraction)?;

        let fields = self.extract(id, document).await.map_err(extraction)?;
        let extracted_at = self.clock.now();
        let points: Vec<ExtractedDataPoint> = fields
            .into_iter()
            .enumerate()
            .map(|(ordinal, field)| field.into_data_point(document, ordinal, extracted_at))
            .collect();
        debug!(data_points = points.len(), "extraction complete");
        self.update(id, |r| {
            r.data_points = points.clone();
            r.transition(RunState::Mapping, self.clock.now())
        })
        .map_err(mapping)?;

        let taxonomy = self
            .taxonomy
            .latest()
            .ok_or_else(|| mapping(PipelineError::NoTaxonomy))?;
        for point in &points {
            point.validate().map_err(|e| mapping(e.into()))?;
        }
        let outcome = self
            .mapper
            .map_batch(&points, &taxonomy, period, self.clock.now());
        info!(
            accepted = outcome.accepted.len(),
            unmapped = outcome.unmapped.len(),
            taxonomy_version = taxonomy.version(),
            scorer = self.mapper.scorer_version(),
            "mapping complete"
        );

        // Entering Committing and checking for cancellation happen under one
        // lock so a run cannot be both cancelled and committed.
        {
            let mut runs = self.runs();
            let slot = runs
                .by_id
                .get_mut(&id)
                .ok_or_else(|| mapping(PipelineError::Cancelled))?;
            if *slot.cancel.borrow() {
                return Err(mapping(PipelineError::Cancelled));
            }
            slot.record.unmapped = outcome.unmapped;
            slot.record
                .transition(RunState::Committing, self.clock.now())
                .map_err(mapping)?;
            slot.state.send_replace(RunState::Committing);
        }

        Ok(Prepared {
            _permit: permit,
            taxonomy,
            accepted: outcome.accepted,
        })
    }

    async fn extract(
        &self,
        id: RunId,
        document: &Document,
    ) -> Result<Vec<ExtractedField>, PipelineError> {
        let timeout = self.extraction_timeout;
        let extractor = &self.extractor;
        let outcome = self
            .retry
            .run(
                "extract document",
                || async move {
                    match tokio::time::timeout(
                        timeout,
                        extractor.extract(&document.bytes, &document.mime_type),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(PipelineError::from),
                        Err(_) => Err(PipelineError::Timeout(timeout)),
                    }
                },
                PipelineError::is_transient,
            )
            .await;
        self.update(id, |r| {
            r.extraction_attempts = outcome.attempts;
            Ok(())
        })?;
        outcome.result
    }

    /// Commit accepted matches. Returns how many entries were appended.
    async fn commit(
        &self,
        id: RunId,
        period: &ReportingPeriod,
        prepared: Prepared,
    ) -> Result<usize, StageFailure> {
        let failed = |e: PipelineError| (Stage::Commit, e);
        let mut pending = Vec::with_capacity(prepared.accepted.len());
        for candidate in &prepared.accepted {
            let node = prepared
                .taxonomy
                .get(&candidate.requirement_id)
                .ok_or_else(|| failed(PipelineError::UnknownRequirement(candidate.requirement_id.clone())))?;
            pending.push((node, candidate));
        }

        let accepted_at = self.clock.now();
        let mut committed = Vec::new();
        for (node, candidate) in pending {
            let outcome = self
                .ledger
                .commit(Commit {
                    requirement: node,
                    data_point_id: &candidate.data_point_id,
                    period,
                    confidence: candidate.match_score,
                    accepted_at,
                })
                .await;
            if outcome.is_duplicate() {
                debug!(data_point = %candidate.data_point_id, "data point already in ledger");
            } else {
                committed.push(outcome.into_entry());
            }
        }

        let appended = committed.len();
        self.update(id, |r| {
            r.committed = committed;
            r.transition(RunState::Committed, self.clock.now())
        })
        .map_err(failed)?;
        info!(appended, "run committed");
        Ok(appended)
    }

    fn finish_failed(&self, id: RunId, stage: Stage, e: PipelineError) {
        let now = self.clock.now();
        let result = self.update(id, |r| match e {
            PipelineError::Cancelled => {
                r.failure = Some(e.to_string());
                r.transition(RunState::Cancelled, now)
            }
            _ => r.fail(stage, e.to_string(), now),
        });
        match result {
            Ok(()) => warn!(?stage, "run did not commit"),
            Err(e) => error!(error = %e, "could not record run failure"),
        }
    }
}

/// Resolves once cancellation is requested.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
