//! Gap detection.
//!
//! `detect` is a pure function of the taxonomy, a ledger snapshot, and the
//! reporting period. The snapshot's `as_of` instant is "now".

use chrono::{DateTime, TimeDelta, Utc};
use greenledger_core::{
    Gap, GapReason, ReportingPeriod, RequirementNode, RollUp, Taxonomy,
    normalize_code,
};
use greenledger_store::LedgerSnapshot;
use serde::Serialize;

const SECONDS_PER_DAY: i64 = 86_400;

/// The gap set for one period plus the leaf-level compliance tally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub reporting_period: ReportingPeriod,
    pub computed_at: DateTime<Utc>,
    pub taxonomy_version: u32,
    /// Ordered by disclosure code.
    pub gaps: Vec<Gap>,
    pub in_scope_leaves: usize,
    /// In-scope leaves with currently valid evidence (including expiring).
    pub satisfied_leaves: usize,
}

impl ComplianceReport {
    /// Share of in-scope leaves that are satisfied; 1.0 when nothing is in scope.
    pub fn score(&self) -> f64 {
        if self.in_scope_leaves == 0 {
            return 1.0;
        }
        self.satisfied_leaves as f64 / self.in_scope_leaves as f64
    }

    /// Gaps that can raise actionable alerts.
    pub fn leaf_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|g| !g.is_informational())
    }

    pub fn gap_for(&self, requirement: &str) -> Option<&Gap> {
        self.gaps.iter().find(|g| g.requirement_id.as_str() == requirement)
    }
}

/// Whole days from `now` to `until`, rounded down.
pub fn days_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (until - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Classify one in-scope leaf. `None` means satisfied with no warning.
///
/// Coverage runs until the latest `valid_until` among the key's valid
/// entries, so standby evidence the ledger will reinstate counts already.
fn leaf_gap(
    leaf: &RequirementNode,
    snapshot: &LedgerSnapshot,
    period: &ReportingPeriod,
    warning_window: TimeDelta,
) -> Option<(GapReason, Option<i64>)> {
    let now = snapshot.as_of();
    if let Some(entry) = snapshot.covering_for(&leaf.id, period) {
        if entry.valid_until - now <= warning_window {
            return Some((GapReason::Expiring, Some(days_until(entry.valid_until, now))));
        }
        return None;
    }
    let lapsed = snapshot
        .active_for(&leaf.id, period)
        .or_else(|| snapshot.last_expired_for(&leaf.id, period));
    match lapsed {
        Some(entry) => Some((GapReason::Expired, Some(days_until(entry.valid_until, now)))),
        None => Some((GapReason::Unmet, None)),
    }
}

/// Compute the gap set for `period`.
///
/// Every in-scope leaf with no valid evidence, or whose evidence runs out
/// within `warning_window`, yields a gap. A non-leaf with at least one open
/// in-scope leaf descendant yields an informational roll-up gap.
pub fn detect(
    taxonomy: &Taxonomy,
    snapshot: &LedgerSnapshot,
    period: &ReportingPeriod,
    warning_window: TimeDelta,
) -> ComplianceReport {
    let now = snapshot.as_of();
    let mut gaps = Vec::new();
    let mut in_scope = 0;
    let mut satisfied = 0;

    for leaf in taxonomy.in_scope_leaves(period) {
        in_scope += 1;
        let found = leaf_gap(leaf, snapshot, period, warning_window);
        if matches!(found, None | Some((GapReason::Expiring, _))) {
            satisfied += 1;
        }
        if let Some((reason, days_until_expiry)) = found {
            gaps.push(Gap {
                requirement_id: leaf.id.clone(),
                code: leaf.code.clone(),
                reporting_period: *period,
                reason,
                days_until_expiry,
                computed_at: now,
                roll_up: None,
            });
        }
    }

    let mut roll_ups = Vec::new();
    for node in taxonomy.nodes().filter(|n| !taxonomy.is_leaf(&n.id)) {
        let leaves = taxonomy.in_scope_leaf_descendants(&node.id, period);
        if leaves.is_empty() {
            continue;
        }
        let open: Vec<&Gap> = leaves
            .iter()
            .filter_map(|leaf| gaps.iter().find(|g| g.requirement_id == leaf.id))
            .collect();
        if open.is_empty() {
            continue;
        }
        let blocking = open.iter().any(|g| g.reason != GapReason::Expiring);
        let (reason, days_until_expiry) = if blocking {
            (GapReason::Unmet, None)
        } else {
            (
                GapReason::Expiring,
                open.iter().filter_map(|g| g.days_until_expiry).min(),
            )
        };
        roll_ups.push(Gap {
            requirement_id: node.id.clone(),
            code: node.code.clone(),
            reporting_period: *period,
            reason,
            days_until_expiry,
            computed_at: now,
            roll_up: Some(RollUp {
                open_leaves: open.len(),
                in_scope_leaves: leaves.len(),
            }),
        });
    }
    gaps.extend(roll_ups);
    gaps.sort_by(|a, b| {
        normalize_code(&a.code)
            .cmp(&normalize_code(&b.code))
            .then_with(|| a.requirement_id.cmp(&b.requirement_id))
    });

    ComplianceReport {
        reporting_period: *period,
        computed_at: now,
        taxonomy_version: taxonomy.version(),
        gaps,
        in_scope_leaves: in_scope,
        satisfied_leaves: satisfied,
    }
}
