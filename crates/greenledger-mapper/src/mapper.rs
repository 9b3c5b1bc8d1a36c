//! Maps extracted data points onto taxonomy requirements.
//!
//! For each data point the mapper scores every requirement that accepts the
//! point's evidence type and applies to the run's reporting period, orders
//! the candidates, and accepts at most one:
//! the best-ranked candidate, if it clears the acceptance threshold.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use greenledger_core::{DataPointId, ExtractedDataPoint, ReportingPeriod, RequirementId, Taxonomy};
use tracing::{debug, info};

use crate::scorer::{LexicalScorer, SimilarityScorer};

/// Share of the match score granted by evidence-type equality alone.
const TYPE_WEIGHT: f32 = 0.4;

/// A scored pairing of a data point with a requirement. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub data_point_id: DataPointId,
    pub requirement_id: RequirementId,
    pub match_score: f32,
    pub matched_at: DateTime<Utc>,
    /// Depth of the requirement in its tree; deeper is more specific.
    pub depth: usize,
    sort_key: String,
}

/// Outcome of mapping one data point.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingDecision {
    Accepted(MatchCandidate),
    /// Nothing cleared the threshold; `best` is the top candidate, if any.
    Unmapped { best: Option<MatchCandidate> },
}

/// Mapping results for a batch of data points.
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub accepted: Vec<MatchCandidate>,
    pub unmapped: Vec<DataPointId>,
}

/// Scores data points against a taxonomy and applies the acceptance policy.
#[derive(Clone)]
pub struct Mapper {
    scorer: Arc<dyn SimilarityScorer>,
    threshold: f32,
}

impl Mapper {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, threshold: f32) -> Self {
        Self { scorer, threshold }
    }

    /// Mapper using the deterministic [`LexicalScorer`].
    pub fn lexical(threshold: f32) -> Self {
        Self::new(Arc::new(LexicalScorer), threshold)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn scorer_version(&self) -> &str {
        self.scorer.version()
    }

    /// All candidates for `point`, best first.
    ///
    /// Only requirements that accept the point's evidence type and apply to
    /// `period` are scored. Order: score descending, then deeper requirement
    /// first, then disclosure-code order.
    pub fn match_candidates(
        &self,
        point: &ExtractedDataPoint,
        taxonomy: &Taxonomy,
        period: &ReportingPeriod,
        now: DateTime<Utc>,
    ) -> Vec<MatchCandidate> {
        let confidence = point.confidence.clamp(0.0, 1.0);
        let mut candidates: Vec<MatchCandidate> = taxonomy
            .nodes()
            .filter(|node| node.accepts(&point.evidence_type) && node.applies_to(period))
            .map(|node| {
                let similarity = self.scorer.similarity(point, node).clamp(0.0, 1.0);
                let match_score = confidence * (TYPE_WEIGHT + (1.0 - TYPE_WEIGHT) * similarity);
                MatchCandidate {
                    data_point_id: point.id.clone(),
                    requirement_id: node.id.clone(),
                    match_score,
                    matched_at: now,
                    depth: taxonomy.depth(&node.id),
                    sort_key: node.sort_key(),
                }
            })
            .collect();

        candidates.sort_by(rank);
        candidates
    }

    /// Accept the top candidate if it clears the threshold.
    pub fn decide(
        &self,
        point: &ExtractedDataPoint,
        taxonomy: &Taxonomy,
        period: &ReportingPeriod,
        now: DateTime<Utc>,
    ) -> MappingDecision {
        let best = self
            .match_candidates(point, taxonomy, period, now)
            .into_iter()
            .next();
        match best {
            Some(candidate) if candidate.match_score >= self.threshold => {
                debug!(
                    data_point = %candidate.data_point_id,
                    requirement = %candidate.requirement_id,
                    score = candidate.match_score,
                    "accepted match"
                );
                MappingDecision::Accepted(candidate)
            }
            best => {
                info!(
                    data_point = %point.id,
                    evidence_type = %point.evidence_type,
                    best_score = best.as_ref().map(|c| c.match_score),
                    threshold = self.threshold,
                    scorer = self.scorer.version(),
                    "unmapped data point"
                );
                MappingDecision::Unmapped { best }
            }
        }
    }

    /// Map a batch of points. Each point is decided independently.
    pub fn map_batch(
        &self,
        points: &[ExtractedDataPoint],
        taxonomy: &Taxonomy,
        period: &ReportingPeriod,
        now: DateTime<Utc>,
    ) -> MappingOutcome {
        let mut outcome = MappingOutcome::default();
        for point in points {
            match self.decide(point, taxonomy, period, now) {
                MappingDecision::Accepted(candidate) => outcome.accepted.push(candidate),
                MappingDecision::Unmapped { .. } => outcome.unmapped.push(point.id.clone()),
            }
        }
        outcome
    }
}

fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.match_score
        .partial_cmp(&a.match_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.depth.cmp(&a.depth))
        .then_with(|| a.sort_key.cmp(&b.sort_key))
}
