//! The evidence ledger: an append-only record of accepted matches.
//!
//! Entries are keyed by `(requirement, reporting period)`. Commits to one key
//! are serialized through the map's shard locks; commits to unrelated keys
//! proceed in parallel. Readers never see a half-applied commit: every read
//! goes through [`EvidenceLedger::snapshot`], which copies.
//!
//! A lower-confidence commit is kept as `Superseded` standby evidence. When
//! the Active entry of a key expires, the strongest standby still in its
//! validity is put back in force as a new Active entry, so a renewal
//! recorded early keeps the requirement covered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use greenledger_core::{
    DataPointId, EntryStatus, LedgerEntry, ReportingPeriod, RequirementId, RequirementNode,
};
use tracing::{debug, info};

use crate::LedgerError;

type LedgerKey = (RequirementId, ReportingPeriod);

/// Non-blocking attempts made before a commit waits for the shard lock.
const CONFLICT_RETRIES: u32 = 4;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(2);

/// What a commit did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// A new entry was appended. `superseded` is the previously Active entry
    /// it displaced, if any.
    Appended {
        entry: LedgerEntry,
        superseded: Option<LedgerEntry>,
    },
    /// The data point was already committed for this key.
    Duplicate(LedgerEntry),
}

impl CommitOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Appended { entry, .. } | Self::Duplicate(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Self::Appended { entry, .. } | Self::Duplicate(entry) => entry,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// One accepted match, ready to be committed.
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    pub requirement: &'a RequirementNode,
    pub data_point_id: &'a DataPointId,
    pub period: &'a ReportingPeriod,
    pub confidence: f32,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct EvidenceLedger {
    entries: DashMap<LedgerKey, Vec<LedgerEntry>>,
    sequence: AtomicU64,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        let ledger = Self::new();
        let mut max_sequence = 0;
        for entry in entries {
            max_sequence = max_sequence.max(entry.sequence);
            let key = (entry.requirement_id.clone(), entry.reporting_period);
            ledger.entries.entry(key).or_default().push(entry);
        }
        for mut slot in ledger.entries.iter_mut() {
            slot.value_mut().sort_by_key(|e| e.sequence);
        }
        ledger.sequence.store(max_sequence, Ordering::SeqCst);
        info!(entries = ledger.len(), max_sequence, "restored evidence ledger");
        ledger
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|slot| slot.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit without waiting: a key locked by a concurrent commit is
    /// reported as [`LedgerError::Conflict`].
    pub fn try_commit(&self, commit: Commit<'_>) -> Result<CommitOutcome, LedgerError> {
        let key = (commit.requirement.id.clone(), *commit.period);
        match self.entries.try_entry(key) {
            Some(slot) => Ok(self.apply(slot, commit)),
            None => Err(LedgerError::Conflict {
                requirement: commit.requirement.id.clone(),
                period: *commit.period,
            }),
        }
    }

    /// Commit, retrying briefly on lock conflicts and finally waiting for the
    /// shard. Conflicts are never surfaced to the caller.
    pub async fn commit(&self, commit: Commit<'_>) -> CommitOutcome {
        for attempt in 0..CONFLICT_RETRIES {
            match self.try_commit(commit) {
                Ok(outcome) => return outcome,
                Err(e) => {
                    debug!(attempt, error = %e, "ledger commit conflict, backing off");
                    tokio::time::sleep(CONFLICT_BACKOFF * 2u32.pow(attempt)).await;
                }
            }
        }
        let key = (commit.requirement.id.clone(), *commit.period);
        let slot = self.entries.entry(key);
        self.apply(slot, commit)
    }

    fn apply(&self, slot: Entry<'_, LedgerKey, Vec<LedgerEntry>>, commit: Commit<'_>) -> CommitOutcome {
        let mut slot = slot.or_default();
        let history = slot.value_mut();
        let now = commit.accepted_at;

        if let Some(existing) = history
            .iter()
            .find(|e| &e.data_point_id == commit.data_point_id)
        {
            return CommitOutcome::Duplicate(existing.clone());
        }

        if expire_stale(history, now).is_some() {
            self.reinstate(history, now);
        }

        let sequence = self.next_sequence();
        let mut entry = LedgerEntry {
            sequence,
            requirement_id: commit.requirement.id.clone(),
            data_point_id: commit.data_point_id.clone(),
            reporting_period: *commit.period,
            confidence: commit.confidence,
            accepted_at: now,
            valid_until: now + commit.requirement.validity_period(),
            status: EntryStatus::Active,
            status_changed_at: None,
        };

        let mut superseded = None;
        if let Some(active) = history.iter_mut().find(|e| e.status == EntryStatus::Active) {
            if entry.confidence >= active.confidence {
                mark(active, EntryStatus::Superseded, now);
                superseded = Some(active.clone());
            } else {
                mark(&mut entry, EntryStatus::Superseded, now);
            }
        }

        info!(
            sequence,
            requirement = %entry.requirement_id,
            data_point = %entry.data_point_id,
            period = %entry.reporting_period,
            status = entry.status.as_str(),
            "committed ledger entry"
        );
        history.push(entry.clone());
        CommitOutcome::Appended { entry, superseded }
    }

    /// Mark every Active entry whose validity ended before `now` as Expired
    /// and reinstate standby evidence where a key has some. Returns the newly
    /// expired entries in commit order.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<LedgerEntry> {
        let mut expired = Vec::new();
        for mut slot in self.entries.iter_mut() {
            let history = slot.value_mut();
            if let Some(entry) = expire_stale(history, now) {
                expired.push(entry);
                self.reinstate(history, now);
            }
        }
        expired.sort_by_key(|e| e.sequence);
        if !expired.is_empty() {
            info!(count = expired.len(), "expired ledger entries");
        }
        expired
    }

    /// Copy of the ledger as it stood at `as_of`.
    ///
    /// Entries accepted after `as_of` are left out and status changes made
    /// after `as_of` are undone, so the same `as_of` always yields the same
    /// view.
    pub fn snapshot(&self, as_of: DateTime<Utc>) -> LedgerSnapshot {
        let mut entries: HashMap<LedgerKey, Vec<LedgerEntry>> = HashMap::new();
        for slot in self.entries.iter() {
            let visible: Vec<LedgerEntry> = slot
                .value()
                .iter()
                .filter(|e| e.accepted_at <= as_of)
                .map(|e| as_of_view(e, as_of))
                .collect();
            if !visible.is_empty() {
                entries.insert(slot.key().clone(), visible);
            }
        }
        LedgerSnapshot { as_of, entries }
    }
}

impl EvidenceLedger {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Append an Active copy of the strongest Superseded entry of a key that
    /// is still valid at `now`. Does nothing while the key has an Active entry.
    fn reinstate(&self, history: &mut Vec<LedgerEntry>, now: DateTime<Utc>) -> Option<LedgerEntry> {
        if history.iter().any(|e| e.status == EntryStatus::Active) {
            return None;
        }
        let standby = history
            .iter()
            .filter(|e| e.status == EntryStatus::Superseded && e.is_valid_at(now))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.valid_until.cmp(&b.valid_until))
                    .then(a.sequence.cmp(&b.sequence))
            })?;
        let entry = LedgerEntry {
            sequence: self.next_sequence(),
            accepted_at: now,
            status: EntryStatus::Active,
            status_changed_at: None,
            ..standby.clone()
        };
        info!(
            sequence = entry.sequence,
            requirement = %entry.requirement_id,
            data_point = %entry.data_point_id,
            period = %entry.reporting_period,
            valid_until = %entry.valid_until,
            "reinstated standby evidence"
        );
        history.push(entry.clone());
        Some(entry)
    }
}

/// Expire the Active entry of one key if its validity ended before `now`.
fn expire_stale(history: &mut [LedgerEntry], now: DateTime<Utc>) -> Option<LedgerEntry> {
    let entry = history
        .iter_mut()
        .find(|e| e.status == EntryStatus::Active && e.valid_until < now)?;
    mark(entry, EntryStatus::Expired, now);
    Some(entry.clone())
}

fn mark(entry: &mut LedgerEntry, status: EntryStatus, at: DateTime<Utc>) {
    entry.status = status;
    entry.status_changed_at = Some(at);
}

fn as_of_view(entry: &LedgerEntry, as_of: DateTime<Utc>) -> LedgerEntry {
    let mut view = entry.clone();
    view.status = entry.status_as_of(as_of);
    if view.status == EntryStatus::Active {
        view.status_changed_at = None;
    }
    view
}

/// Immutable, point-in-time copy of the ledger.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    as_of: DateTime<Utc>,
    /// Per-key history in commit order.
    entries: HashMap<LedgerKey, Vec<LedgerEntry>>,
}

impl LedgerSnapshot {
    /// Build a snapshot directly from entries. Statuses are taken as given.
    pub fn from_entries(as_of: DateTime<Utc>, entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        let mut map: HashMap<LedgerKey, Vec<LedgerEntry>> = HashMap::new();
        for entry in entries {
            map.entry((entry.requirement_id.clone(), entry.reporting_period))
                .or_default()
                .push(entry);
        }
        for history in map.values_mut() {
            history.sort_by_key(|e| e.sequence);
        }
        Self { as_of, entries: map }
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// History for one key, in commit order.
    pub fn history(&self, requirement: &RequirementId, period: &ReportingPeriod) -> &[LedgerEntry] {
        self.entries
            .get(&(requirement.clone(), *period))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The Active entry for a key, if any.
    pub fn active_for(&self, requirement: &RequirementId, period: &ReportingPeriod) -> Option<&LedgerEntry> {
        self.history(requirement, period)
            .iter()
            .rev()
            .find(|e| e.status == EntryStatus::Active)
    }

    /// The entry that keeps a key covered longest as of the snapshot: among
    /// Active and Superseded entries still in validity, the one with the
    /// latest `valid_until`.
    pub fn covering_for(
        &self,
        requirement: &RequirementId,
        period: &ReportingPeriod,
    ) -> Option<&LedgerEntry> {
        self.history(requirement, period)
            .iter()
            .filter(|e| e.status != EntryStatus::Expired && e.is_valid_at(self.as_of))
            .max_by_key(|e| (e.valid_until, e.sequence))
    }

    /// The most recently expired entry for a key, if any.
    pub fn last_expired_for(
        &self,
        requirement: &RequirementId,
        period: &ReportingPeriod,
    ) -> Option<&LedgerEntry> {
        self.history(requirement, period)
            .iter()
            .rev()
            .find(|e| e.status == EntryStatus::Expired)
    }

    /// All entries in global commit order.
    pub fn entries(&self) -> Vec<&LedgerEntry> {
        let mut all: Vec<&LedgerEntry> = self.entries.values().flatten().collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    /// Reporting periods with at least one entry, ascending.
    pub fn periods(&self) -> Vec<ReportingPeriod> {
        let mut periods: Vec<ReportingPeriod> = self.entries.keys().map(|(_, p)| *p).collect();
        periods.sort();
        periods.dedup();
        periods
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use greenledger_core::{EvidenceType, Obligation};
    use std::sync::Arc;

    pub(crate) fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + TimeDelta::days(n)
    }

    pub(crate) fn fy2026() -> ReportingPeriod {
        ReportingPeriod::calendar_year(2026).unwrap()
    }

    pub(crate) fn requirement(id: &str, validity_days: u32) -> RequirementNode {
        RequirementNode {
            id: RequirementId::new(id),
            parent_id: None,
            code: format!("ESRS {id}"),
            label: id.into(),
            description: None,
            keywords: vec![],
            required_evidence_types: [EvidenceType::new("PollutantDischarge")].into(),
            validity_days,
            applicable_from: None,
            applicable_until: None,
            obligation: Obligation::Mandatory,
            version: 1,
        }
    }

    fn commit<'a>(
        req: &'a RequirementNode,
        dp: &'a DataPointId,
        period: &'a ReportingPeriod,
        confidence: f32,
        at: DateTime<Utc>,
    ) -> Commit<'a> {
        Commit {
            requirement: req,
            data_point_id: dp,
            period,
            confidence,
            accepted_at: at,
        }
    }

    #[test]
    fn first_commit_is_active_with_validity() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let dp = DataPointId::new("dp-1");
        let period = fy2026();

        let outcome = ledger.try_commit(commit(&req, &dp, &period, 0.8, day(0))).unwrap();
        let entry = outcome.entry();
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(entry.valid_until, day(365));
        assert!(!outcome.is_duplicate());
    }

    #[test]
    fn higher_confidence_supersedes() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let first = DataPointId::new("dp-1");
        let second = DataPointId::new("dp-2");

        ledger.try_commit(commit(&req, &first, &period, 0.80, day(0))).unwrap();
        let outcome = ledger.try_commit(commit(&req, &second, &period, 0.91, day(10))).unwrap();

        match outcome {
            CommitOutcome::Appended { entry, superseded } => {
                assert_eq!(entry.status, EntryStatus::Active);
                let old = superseded.unwrap();
                assert_eq!(old.data_point_id, first);
                assert_eq!(old.status, EntryStatus::Superseded);
                assert_eq!(old.status_changed_at, Some(day(10)));
            }
            other => panic!("expected append, got {other:?}"),
        }

        let snap = ledger.snapshot(day(11));
        let active = snap.active_for(&req.id, &period).unwrap();
        assert_eq!(active.data_point_id, second);
        assert_eq!(snap.history(&req.id, &period).len(), 2);
    }

    #[test]
    fn lower_confidence_is_recorded_superseded() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let strong = DataPointId::new("dp-strong");
        let weak = DataPointId::new("dp-weak");

        ledger.try_commit(commit(&req, &strong, &period, 0.91, day(0))).unwrap();
        let outcome = ledger.try_commit(commit(&req, &weak, &period, 0.80, day(1))).unwrap();
        assert_eq!(outcome.entry().status, EntryStatus::Superseded);

        let snap = ledger.snapshot(day(2));
        assert_eq!(snap.active_for(&req.id, &period).unwrap().data_point_id, strong);
    }

    #[test]
    fn recommit_is_noop() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let dp = DataPointId::new("dp-1");

        let first = ledger.try_commit(commit(&req, &dp, &period, 0.8, day(0))).unwrap();
        let again = ledger.try_commit(commit(&req, &dp, &period, 0.8, day(5))).unwrap();
        assert!(again.is_duplicate());
        assert_eq!(again.entry(), first.entry());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn expire_sweeps_only_past_validity() {
        let ledger = EvidenceLedger::new();
        let short = requirement("E1-6", 30);
        let long = requirement("E2-4", 365);
        let period = fy2026();
        let a = DataPointId::new("dp-a");
        let b = DataPointId::new("dp-b");
        ledger.try_commit(commit(&short, &a, &period, 0.9, day(0))).unwrap();
        ledger.try_commit(commit(&long, &b, &period, 0.9, day(0))).unwrap();

        assert!(ledger.expire(day(30)).is_empty());
        let expired = ledger.expire(day(31));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data_point_id, a);
        assert_eq!(expired[0].status, EntryStatus::Expired);
        // Already swept.
        assert!(ledger.expire(day(40)).is_empty());
    }

    #[test]
    fn commit_expires_stale_active_first() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E1-6", 30);
        let period = fy2026();
        let old = DataPointId::new("dp-old");
        let new = DataPointId::new("dp-new");
        ledger.try_commit(commit(&req, &old, &period, 0.95, day(0))).unwrap();

        // Lower confidence, but the old entry is no longer valid.
        let outcome = ledger.try_commit(commit(&req, &new, &period, 0.8, day(60))).unwrap();
        assert_eq!(outcome.entry().status, EntryStatus::Active);

        let snap = ledger.snapshot(day(60));
        let history = snap.history(&req.id, &period);
        assert_eq!(history[0].status, EntryStatus::Expired);
        assert_eq!(history[1].status, EntryStatus::Active);
    }

    #[test]
    fn early_renewal_takes_over_when_primary_expires() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let old = DataPointId::new("dp-old");
        let renewal = DataPointId::new("dp-renewal");
        ledger.try_commit(commit(&req, &old, &period, 0.91, day(0))).unwrap();
        let outcome = ledger.try_commit(commit(&req, &renewal, &period, 0.82, day(340))).unwrap();
        assert_eq!(outcome.entry().status, EntryStatus::Superseded);

        // Before the sweep the renewal already covers the key.
        let snap = ledger.snapshot(day(400));
        let covering = snap.covering_for(&req.id, &period).unwrap();
        assert_eq!(covering.data_point_id, renewal);
        assert_eq!(covering.valid_until, day(705));

        let expired = ledger.expire(day(366));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data_point_id, old);

        let snap = ledger.snapshot(day(400));
        let active = snap.active_for(&req.id, &period).unwrap();
        assert_eq!(active.data_point_id, renewal);
        assert_eq!(active.valid_until, day(705));
        assert_eq!(active.accepted_at, day(366));
        assert_eq!(active.sequence, 3);
        assert_eq!(snap.history(&req.id, &period).len(), 3);

        // Re-committing the renewal is still a no-op.
        let again = ledger.try_commit(commit(&req, &renewal, &period, 0.82, day(401))).unwrap();
        assert!(again.is_duplicate());

        // Nothing left to reinstate once the renewal runs out too.
        assert_eq!(ledger.expire(day(706)).len(), 1);
        let snap = ledger.snapshot(day(707));
        assert!(snap.active_for(&req.id, &period).is_none());
        assert!(snap.covering_for(&req.id, &period).is_none());
    }

    #[test]
    fn commit_after_expiry_competes_with_reinstated_standby() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E1-6", 30);
        let period = fy2026();
        let primary = DataPointId::new("dp-primary");
        let standby = DataPointId::new("dp-standby");
        let late = DataPointId::new("dp-late");
        ledger.try_commit(commit(&req, &primary, &period, 0.95, day(0))).unwrap();
        ledger.try_commit(commit(&req, &standby, &period, 0.85, day(20))).unwrap();

        let outcome = ledger.try_commit(commit(&req, &late, &period, 0.80, day(40))).unwrap();
        assert_eq!(outcome.entry().status, EntryStatus::Superseded);

        let snap = ledger.snapshot(day(40));
        let statuses: Vec<(&str, EntryStatus)> = snap
            .history(&req.id, &period)
            .iter()
            .map(|e| (e.data_point_id.as_str(), e.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("dp-primary", EntryStatus::Expired),
                ("dp-standby", EntryStatus::Superseded),
                ("dp-standby", EntryStatus::Active),
                ("dp-late", EntryStatus::Superseded),
            ]
        );
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let first = DataPointId::new("dp-1");
        let second = DataPointId::new("dp-2");
        ledger.try_commit(commit(&req, &first, &period, 0.8, day(0))).unwrap();
        let before = ledger.snapshot(day(5));
        ledger.try_commit(commit(&req, &second, &period, 0.9, day(10))).unwrap();

        // Taken earlier: unaffected by the later commit.
        assert_eq!(before.len(), 1);
        assert_eq!(before.active_for(&req.id, &period).unwrap().data_point_id, first);

        // Taken later but as of an earlier instant: same view.
        let replay = ledger.snapshot(day(5));
        assert_eq!(replay.len(), 1);
        let active = replay.active_for(&req.id, &period).unwrap();
        assert_eq!(active.data_point_id, first);
        assert_eq!(active.status_changed_at, None);
    }

    #[test]
    fn status_only_moves_away_from_active() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 10);
        let period = fy2026();
        let ids: Vec<DataPointId> = (0..4).map(|i| DataPointId::new(format!("dp-{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            ledger
                .try_commit(commit(&req, id, &period, 0.5 + i as f32 * 0.1, day(i as i64 * 5)))
                .unwrap();
            ledger.expire(day(i as i64 * 5 + 3));
        }
        let snap = ledger.snapshot(day(100));
        let history = snap.history(&req.id, &period);
        assert_eq!(history.len(), 4);
        let active = history.iter().filter(|e| e.status == EntryStatus::Active).count();
        assert!(active <= 1);
        for entry in history {
            if entry.status != EntryStatus::Active {
                assert!(entry.status_changed_at.unwrap() >= entry.accepted_at);
            }
        }
        let sequences: Vec<u64> = snap.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn restore_continues_sequence() {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        let dp = DataPointId::new("dp-1");
        ledger.try_commit(commit(&req, &dp, &period, 0.8, day(0))).unwrap();

        let saved: Vec<LedgerEntry> = ledger.snapshot(day(1)).entries().into_iter().cloned().collect();
        let restored = EvidenceLedger::from_entries(saved);
        let next = DataPointId::new("dp-2");
        let outcome = restored.try_commit(commit(&req, &next, &period, 0.9, day(2))).unwrap();
        assert_eq!(outcome.entry().sequence, 2);
    }

    #[tokio::test]
    async fn concurrent_commits_to_one_key_leave_one_active() {
        let ledger = Arc::new(EvidenceLedger::new());
        let req = Arc::new(requirement("E2-4", 365));
        let period = fy2026();

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = Arc::clone(&ledger);
            let req = Arc::clone(&req);
            handles.push(tokio::spawn(async move {
                let dp = DataPointId::new(format!("dp-{i}"));
                let confidence = 0.5 + (i % 5) as f32 * 0.1;
                ledger
                    .commit(Commit {
                        requirement: &req,
                        data_point_id: &dp,
                        period: &period,
                        confidence,
                        accepted_at: day(0),
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = ledger.snapshot(day(1));
        let history = snap.history(&req.id, &period);
        assert_eq!(history.len(), 16);
        let active: Vec<_> = history.iter().filter(|e| e.status == EntryStatus::Active).collect();
        assert_eq!(active.len(), 1);
        assert!((active[0].confidence - 0.9).abs() < 1e-6);
    }
}
