//! Compliance cycles: expiry sweep, gap detection, alert reconciliation.
//!
//! Cycles are single-flight per reporting period. A trigger that arrives
//! while a cycle for the same period is running marks the period dirty, and
//! the running cycle repeats once when it finishes.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use greenledger_core::{GreenledgerConfig, LedgerEntry, ReportingPeriod, TaxonomyStore};
use greenledger_store::EvidenceLedger;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::alerts::{AlertEngine, DeliveryReport, Reconciliation};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::gaps::{ComplianceReport, detect};

/// Outcome of one completed cycle for one period.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub report: ComplianceReport,
    pub reconciliation: Reconciliation,
    pub delivery: DeliveryReport,
    pub finished_at: DateTime<Utc>,
}

pub struct ComplianceMonitor {
    taxonomy: Arc<TaxonomyStore>,
    ledger: Arc<EvidenceLedger>,
    alerts: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
    warning_window: TimeDelta,
    interval: Duration,
    periods: Mutex<BTreeSet<ReportingPeriod>>,
    /// Periods with a running cycle, and whether another was requested.
    inflight: Mutex<HashMap<ReportingPeriod, bool>>,
    latest: RwLock<HashMap<ReportingPeriod, Arc<CycleResult>>>,
    /// Count of completed cycles, for observers that persist state.
    completed: watch::Sender<u64>,
}

/// Clears a period's in-flight marker if a cycle exits early.
struct InflightGuard<'a> {
    monitor: &'a ComplianceMonitor,
    period: ReportingPeriod,
    armed: bool,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.monitor.inflight().remove(&self.period);
        }
    }
}

impl ComplianceMonitor {
    pub fn new(
        config: &GreenledgerConfig,
        taxonomy: Arc<TaxonomyStore>,
        ledger: Arc<EvidenceLedger>,
        alerts: Arc<AlertEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            taxonomy,
            ledger,
            alerts,
            clock,
            warning_window: TimeDelta::days(i64::from(config.gaps.warning_window_days)),
            interval: config.schedule.interval(),
            periods: Mutex::new(BTreeSet::new()),
            inflight: Mutex::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            completed: watch::Sender::new(0),
        }
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<ReportingPeriod, bool>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn taxonomy(&self) -> &Arc<TaxonomyStore> {
        &self.taxonomy
    }

    pub fn ledger(&self) -> &Arc<EvidenceLedger> {
        &self.ledger
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Include `period` in scheduled cycles.
    pub fn track(&self, period: ReportingPeriod) {
        self.periods
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(period);
    }

    /// Tracked periods plus every period with ledger entries.
    pub fn periods(&self) -> Vec<ReportingPeriod> {
        let mut periods = self
            .periods
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        periods.extend(self.ledger.snapshot(self.clock.now()).periods());
        periods.into_iter().collect()
    }

    /// The latest completed cycle for `period`.
    pub fn latest(&self, period: &ReportingPeriod) -> Option<Arc<CycleResult>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(period)
            .cloned()
    }

    /// Watch the number of completed cycles. The value changes after each
    /// cycle's result is published.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.completed.subscribe()
    }

    /// Run a cycle for `period`, or coalesce into the one already running.
    ///
    /// Returns `None` when coalesced.
    pub async fn run_cycle(
        &self,
        period: ReportingPeriod,
    ) -> Result<Option<Arc<CycleResult>>, PipelineError> {
        {
            let mut inflight = self.inflight();
            if let Some(dirty) = inflight.get_mut(&period) {
                *dirty = true;
                debug!(%period, "cycle already running, marked dirty");
                return Ok(None);
            }
            inflight.insert(period, false);
        }
        let mut guard = InflightGuard {
            monitor: self,
            period,
            armed: true,
        };
        self.track(period);

        loop {
            let result = self.cycle_once(&period).await?;
            let mut inflight = self.inflight();
            if inflight.get(&period) == Some(&true) {
                inflight.insert(period, false);
                debug!(%period, "period dirty, repeating cycle");
                continue;
            }
            inflight.remove(&period);
            guard.armed = false;
            return Ok(Some(result));
        }
    }

    async fn cycle_once(&self, period: &ReportingPeriod) -> Result<Arc<CycleResult>, PipelineError> {
        let taxonomy = self.taxonomy.latest().ok_or(PipelineError::NoTaxonomy)?;
        let now = self.clock.now();
        let snapshot = self.ledger.snapshot(now);
        let report = detect(&taxonomy, &snapshot, period, self.warning_window);
        let reconciliation = self.alerts.reconcile(period, &report.gaps, now);
        let delivery = self.alerts.deliver(&reconciliation.notify).await;

        info!(
            %period,
            taxonomy_version = taxonomy.version(),
            gaps = report.gaps.len(),
            score = report.score(),
            delivered = delivery.delivered,
            "compliance cycle complete"
        );
        let result = Arc::new(CycleResult {
            report,
            reconciliation,
            delivery,
            finished_at: self.clock.now(),
        });
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*period, Arc::clone(&result));
        self.completed.send_modify(|n| *n += 1);
        Ok(result)
    }

    /// Expire ledger entries past their validity. Periods touched by the
    /// sweep become tracked.
    pub fn sweep(&self) -> Vec<LedgerEntry> {
        let expired = self.ledger.expire(self.clock.now());
        for entry in &expired {
            self.track(entry.reporting_period);
        }
        expired
    }

    /// Sweep, then run a cycle for every known period. Per-period failures
    /// are logged and do not stop the others.
    pub async fn run_all(&self) -> Vec<Arc<CycleResult>> {
        self.sweep();
        let mut results = Vec::new();
        for period in self.periods() {
            match self.run_cycle(period).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!(%period, error = %e, class = %e.class(), "compliance cycle failed"),
            }
        }
        results
    }

    /// Run a cycle for `period` in the background.
    pub fn trigger(self: &Arc<Self>, period: ReportingPeriod) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = monitor.run_cycle(period).await {
                error!(%period, error = %e, "triggered compliance cycle failed");
            }
        })
    }

    /// Run scheduled cycles until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "compliance monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("compliance monitor stopped");
    }
}
