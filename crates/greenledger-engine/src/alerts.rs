//! Alert lifecycle: reconcile each cycle's gaps against open alerts and
//! deliver what changed.
//!
//! The engine holds the open alerts and the closed ones not yet handed to a
//! store. Open alerts from an earlier process are brought back with
//! [`AlertEngine::restore`], so their ids and first-seen times carry over.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use greenledger_core::config::AlertConfig;
use greenledger_core::{Alert, DedupeKey, Gap, GapReason, ReportingPeriod, Severity, normalize_code};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::{DeliveryError, NotificationSink};
use crate::retry::RetryPolicy;

/// Severity for a gap under the given critical window.
pub fn severity_for(gap: &Gap, critical_within_days: u32) -> Severity {
    if gap.is_informational() {
        return Severity::Info;
    }
    match gap.reason {
        GapReason::Unmet | GapReason::Expired => Severity::Critical,
        GapReason::Expiring => match gap.days_until_expiry {
            Some(days) if days > i64::from(critical_within_days) => Severity::Warning,
            _ => Severity::Critical,
        },
    }
}

/// Changes produced by one reconciliation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub created: Vec<Alert>,
    pub refreshed: Vec<Alert>,
    pub closed: Vec<Alert>,
    /// Created or severity-upgraded alerts that should go to the sink.
    pub notify: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Closed alerts kept in memory when nobody drains them.
const CLOSED_RETAINED: usize = 512;

#[derive(Debug, Default)]
struct AlertBook {
    open: HashMap<DedupeKey, Alert>,
    closed: VecDeque<Alert>,
}

impl AlertBook {
    fn close(&mut self, alert: Alert) {
        if self.closed.len() == CLOSED_RETAINED {
            self.closed.pop_front();
        }
        self.closed.push_back(alert);
    }
}

pub struct AlertEngine {
    config: AlertConfig,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
    book: Mutex<AlertBook>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig, sink: Arc<dyn NotificationSink>, retry: RetryPolicy) -> Self {
        Self {
            config,
            sink,
            retry,
            book: Mutex::new(AlertBook::default()),
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, AlertBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load previously persisted alerts. Open ones resume their lifecycle;
    /// closed ones are skipped since a closed alert never reopens. Returns
    /// how many were restored.
    pub fn restore(&self, alerts: impl IntoIterator<Item = Alert>) -> usize {
        let mut book = self.book();
        let mut restored = 0;
        for alert in alerts.into_iter().filter(Alert::is_open) {
            let key = alert.gap.dedupe_key();
            if book.open.insert(key, alert).is_none() {
                restored += 1;
            }
        }
        info!(restored, open = book.open.len(), "restored alerts");
        restored
    }

    fn should_notify(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        if alert.is_suppressed(now) {
            debug!(alert = %alert.id, "alert suppressed");
            return false;
        }
        alert.severity != Severity::Info || self.config.deliver_info
    }

    /// Reconcile the open alerts of `period` against that period's gaps.
    ///
    /// New dedupe keys open alerts, known keys are refreshed, and open alerts
    /// of this period whose key is absent are closed for good. A key that
    /// reappears after closing opens a new alert.
    pub fn reconcile(&self, period: &ReportingPeriod, gaps: &[Gap], now: DateTime<Utc>) -> Reconciliation {
        let mut out = Reconciliation::default();
        let mut seen = HashSet::new();
        let mut book = self.book();

        for gap in gaps.iter().filter(|g| g.reporting_period == *period) {
            let key = gap.dedupe_key();
            let severity = severity_for(gap, self.config.critical_within_days);
            seen.insert(key.clone());

            if let Some(alert) = book.open.get_mut(&key) {
                let previous = alert.severity;
                alert.gap = gap.clone();
                alert.severity = severity;
                alert.last_seen_at = now;
                let alert = alert.clone();
                if severity > previous && self.should_notify(&alert, now) {
                    out.notify.push(alert.clone());
                }
                out.refreshed.push(alert);
            } else {
                let alert = Alert::open(gap.clone(), severity, now);
                if self.should_notify(&alert, now) {
                    out.notify.push(alert.clone());
                }
                book.open.insert(key, alert.clone());
                out.created.push(alert);
            }
        }

        let stale: Vec<DedupeKey> = book
            .open
            .iter()
            .filter(|(key, alert)| alert.gap.reporting_period == *period && !seen.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(mut alert) = book.open.remove(&key) {
                alert.closed_at = Some(now);
                book.close(alert.clone());
                out.closed.push(alert);
            }
        }
        out.closed.sort_by_key(|a| normalize_code(&a.gap.code));

        info!(
            %period,
            created = out.created.len(),
            refreshed = out.refreshed.len(),
            closed = out.closed.len(),
            notify = out.notify.len(),
            "reconciled alerts"
        );
        out
    }

    /// Send alerts to the sink, retrying transient failures.
    pub async fn deliver(&self, alerts: &[Alert]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for alert in alerts {
            let sink = &self.sink;
            let outcome = self
                .retry
                .run("deliver alert", || sink.deliver(alert), DeliveryError::is_transient)
                .await;
            match outcome.result {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Rejected(reason)) => {
                    warn!(alert = %alert.id, sink = sink.name(), %reason, "alert rejected by sink");
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!(
                        alert = %alert.id,
                        sink = sink.name(),
                        attempts = outcome.attempts,
                        error = %e,
                        "alert delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Hold back delivery of an open alert until `until`.
    pub fn suppress(&self, key: &DedupeKey, until: DateTime<Utc>) -> bool {
        match self.book().open.get_mut(key) {
            Some(alert) => {
                alert.suppressed_until = Some(until);
                true
            }
            None => false,
        }
    }

    /// Open alerts, most severe first, then by disclosure code.
    pub fn open_alerts(&self, period: Option<&ReportingPeriod>) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .book()
            .open
            .values()
            .filter(|a| period.is_none_or(|p| a.gap.reporting_period == *p))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| normalize_code(&a.gap.code).cmp(&normalize_code(&b.gap.code)))
        });
        alerts
    }

    pub fn open_alert(&self, key: &DedupeKey) -> Option<Alert> {
        self.book().open.get(key).cloned()
    }

    /// Closed alerts still held in memory, oldest first.
    pub fn closed_alerts(&self) -> Vec<Alert> {
        self.book().closed.iter().cloned().collect()
    }

    /// Take the closed alerts out of memory, oldest first, for persisting.
    pub fn drain_closed(&self) -> Vec<Alert> {
        self.book().closed.drain(..).collect()
    }
}
