//! Ledger entries, gaps, and alerts: the compliance state the pipeline
//! reasons over.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::evidence::DataPointId;
use crate::period::ReportingPeriod;
use crate::taxonomy::RequirementId;

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Expired,
    Superseded,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

/// An accepted match of a data point to a requirement.
///
/// Entries are append-only: only `status` (and `status_changed_at`) ever
/// change, and only away from `Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger's global commit order.
    pub sequence: u64,
    pub requirement_id: RequirementId,
    pub data_point_id: DataPointId,
    pub reporting_period: ReportingPeriod,
    /// Match score the entry was accepted with.
    pub confidence: f32,
    pub accepted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: EntryStatus,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// The status this entry had at `as_of`.
    pub fn status_as_of(&self, as_of: DateTime<Utc>) -> EntryStatus {
        match self.status_changed_at {
            Some(changed) if changed > as_of => EntryStatus::Active,
            _ => self.status,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until >= now
    }
}

/// Why a requirement shows up as a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    Unmet,
    Expiring,
    Expired,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmet => "unmet",
            Self::Expiring => "expiring",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unmet" => Some(Self::Unmet),
            "expiring" => Some(Self::Expiring),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf counts attached to an informational gap on a non-leaf requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollUp {
    pub open_leaves: usize,
    pub in_scope_leaves: usize,
}

/// A requirement that is unmet, or met by expiring/expired evidence.
///
/// Derived each detection cycle; never patched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gap {
    pub requirement_id: RequirementId,
    pub code: String,
    pub reporting_period: ReportingPeriod,
    pub reason: GapReason,
    pub days_until_expiry: Option<i64>,
    pub computed_at: DateTime<Utc>,
    /// Present on non-leaf requirements; such gaps are informational only.
    pub roll_up: Option<RollUp>,
}

impl Gap {
    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(&self.requirement_id, &self.reporting_period, self.reason)
    }

    pub fn is_informational(&self) -> bool {
        self.roll_up.is_some()
    }
}

/// Deterministic identity of an alerting condition:
/// `(requirement, reporting period, reason)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    pub fn new(requirement: &RequirementId, period: &ReportingPeriod, reason: GapReason) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(requirement.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(period.start.to_string().as_bytes());
        hasher.update(b"..");
        hasher.update(period.end.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(reason.as_str().as_bytes());
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert raised for a gap, tracked across detection cycles by dedupe key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub dedupe_key: DedupeKey,
    /// The gap as last observed.
    pub gap: Gap,
    pub severity: Severity,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn open(gap: Gap, severity: Severity, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dedupe_key: gap.dedupe_key(),
            gap,
            severity,
            first_seen_at: now,
            last_seen_at: now,
            suppressed_until: None,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.suppressed_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::TimeDelta::days(day)
    }

    fn gap(reason: GapReason) -> Gap {
        Gap {
            requirement_id: RequirementId::new("E2-4"),
            code: "ESRS E2-4".into(),
            reporting_period: ReportingPeriod::calendar_year(2026).unwrap(),
            reason,
            days_until_expiry: None,
            computed_at: at(0),
            roll_up: None,
        }
    }

    #[test]
    fn dedupe_key_depends_only_on_identity() {
        let a = gap(GapReason::Unmet);
        let mut b = gap(GapReason::Unmet);
        b.computed_at = at(40);
        b.days_until_expiry = Some(3);
        assert_eq!(a.dedupe_key(), b.dedupe_key());

        assert_ne!(a.dedupe_key(), gap(GapReason::Expiring).dedupe_key());

        let mut other_period = gap(GapReason::Unmet);
        other_period.reporting_period = ReportingPeriod::calendar_year(2027).unwrap();
        assert_ne!(a.dedupe_key(), other_period.dedupe_key());
        assert_eq!(a.dedupe_key().as_str().len(), 32);
    }

    #[test]
    fn status_as_of_reconstructs_history() {
        let entry = LedgerEntry {
            sequence: 1,
            requirement_id: RequirementId::new("E2-4"),
            data_point_id: DataPointId::new("dp-1"),
            reporting_period: ReportingPeriod::calendar_year(2026).unwrap(),
            confidence: 0.8,
            accepted_at: at(0),
            valid_until: at(365),
            status: EntryStatus::Superseded,
            status_changed_at: Some(at(10)),
        };
        assert_eq!(entry.status_as_of(at(5)), EntryStatus::Active);
        assert_eq!(entry.status_as_of(at(10)), EntryStatus::Superseded);
        assert_eq!(entry.status_as_of(at(11)), EntryStatus::Superseded);
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn alert_suppression_window() {
        let mut alert = Alert::open(gap(GapReason::Unmet), Severity::Critical, at(0));
        assert!(alert.is_open());
        assert!(!alert.is_suppressed(at(0)));
        alert.suppressed_until = Some(at(3));
        assert!(alert.is_suppressed(at(2)));
        assert!(!alert.is_suppressed(at(3)));
    }

    #[test]
    fn entry_status_string_roundtrip() {
        for status in [EntryStatus::Active, EntryStatus::Expired, EntryStatus::Superseded] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("deleted"), None);
    }
}
