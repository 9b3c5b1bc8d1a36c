//! Read-only views over the latest completed compliance cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use greenledger_core::{
    Alert, Gap, GapReason, LedgerEntry, ReportingPeriod, RequirementId, RequirementNode,
};
use serde::Serialize;

use crate::monitor::ComplianceMonitor;

/// Score and gap tally for one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceSummary {
    pub reporting_period: ReportingPeriod,
    pub computed_at: DateTime<Utc>,
    pub taxonomy_version: u32,
    pub score: f64,
    pub in_scope_leaves: usize,
    pub satisfied_leaves: usize,
    pub unmet: usize,
    pub expiring: usize,
    pub expired: usize,
    pub open_alerts: usize,
}

/// Everything known about one requirement in one period.
#[derive(Debug, Clone, Serialize)]
pub struct GapDetail {
    pub requirement: RequirementNode,
    pub gap: Option<Gap>,
    pub alert: Option<Alert>,
    pub active_entry: Option<LedgerEntry>,
    /// Ledger history for the pair, oldest first.
    pub history: Vec<LedgerEntry>,
}

/// Query surface for dashboards and the CLI. Never triggers a cycle.
#[derive(Clone)]
pub struct ComplianceView {
    monitor: Arc<ComplianceMonitor>,
}

impl ComplianceView {
    pub fn new(monitor: Arc<ComplianceMonitor>) -> Self {
        Self { monitor }
    }

    pub fn compliance_score(&self, period: &ReportingPeriod) -> Option<f64> {
        self.monitor.latest(period).map(|r| r.report.score())
    }

    pub fn summary(&self, period: &ReportingPeriod) -> Option<ComplianceSummary> {
        let cycle = self.monitor.latest(period)?;
        let report = &cycle.report;
        let count = |reason| report.leaf_gaps().filter(|g| g.reason == reason).count();
        Some(ComplianceSummary {
            reporting_period: *period,
            computed_at: report.computed_at,
            taxonomy_version: report.taxonomy_version,
            score: report.score(),
            in_scope_leaves: report.in_scope_leaves,
            satisfied_leaves: report.satisfied_leaves,
            unmet: count(GapReason::Unmet),
            expiring: count(GapReason::Expiring),
            expired: count(GapReason::Expired),
            open_alerts: self.monitor.alerts().open_alerts(Some(period)).len(),
        })
    }

    pub fn gaps(&self, period: &ReportingPeriod) -> Vec<Gap> {
        self.monitor
            .latest(period)
            .map(|r| r.report.gaps.clone())
            .unwrap_or_default()
    }

    pub fn open_alerts(&self, period: Option<&ReportingPeriod>) -> Vec<Alert> {
        self.monitor.alerts().open_alerts(period)
    }

    /// Detail for `requirement` as of the latest cycle for `period`.
    ///
    /// `None` when the requirement is not in the published taxonomy.
    pub fn gap_detail(
        &self,
        requirement: &RequirementId,
        period: &ReportingPeriod,
    ) -> Option<GapDetail> {
        let taxonomy = self.monitor.taxonomy().latest()?;
        let node = taxonomy.get(requirement)?.clone();
        let cycle = self.monitor.latest(period);
        let as_of = cycle
            .as_ref()
            .map_or_else(|| self.monitor.now(), |c| c.report.computed_at);
        let gap = cycle
            .as_ref()
            .and_then(|c| c.report.gap_for(requirement.as_str()).cloned());
        let alert = gap
            .as_ref()
            .and_then(|g| self.monitor.alerts().open_alert(&g.dedupe_key()));
        let snapshot = self.monitor.ledger().snapshot(as_of);
        Some(GapDetail {
            requirement: node,
            gap,
            alert,
            active_entry: snapshot.active_for(requirement, period).cloned(),
            history: snapshot.history(requirement, period).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaps::tests::{commit, day, fy2026};
    use crate::monitor::tests::fixture;

    #[tokio::test]
    async fn views_follow_latest_cycle() {
        let f = fixture(day(0));
        let view = ComplianceView::new(Arc::clone(&f.monitor));
        assert!(view.compliance_score(&fy2026()).is_none());

        let tax = f.monitor.taxonomy().latest().unwrap();
        commit(f.monitor.ledger(), &tax, "E2-4", "a", day(0));
        f.monitor.run_cycle(fy2026()).await.unwrap();

        let summary = view.summary(&fy2026()).unwrap();
        assert_eq!(summary.in_scope_leaves, 3);
        assert_eq!(summary.satisfied_leaves, 1);
        assert_eq!(summary.unmet, 2);
        // Two leaf alerts plus the two roll-ups.
        assert_eq!(summary.open_alerts, 4);
        assert!((view.compliance_score(&fy2026()).unwrap() - 1.0 / 3.0).abs() < 1e-9);

        let met = view.gap_detail(&RequirementId::new("E2-4"), &fy2026()).unwrap();
        assert!(met.gap.is_none());
        assert!(met.alert.is_none());
        assert_eq!(met.active_entry.unwrap().data_point_id.as_str(), "a");

        let unmet = view.gap_detail(&RequirementId::new("E3-4"), &fy2026()).unwrap();
        assert_eq!(unmet.gap.as_ref().unwrap().reason, GapReason::Unmet);
        assert!(unmet.alert.is_some());
        assert!(unmet.history.is_empty());

        assert!(view.gap_detail(&RequirementId::new("S1-1"), &fy2026()).is_none());
    }
}
