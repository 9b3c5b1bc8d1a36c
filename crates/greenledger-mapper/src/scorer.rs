//! Similarity scoring between a data point's text and a requirement's text.
//!
//! Scorers are versioned: the version string is recorded alongside mapping
//! decisions so a change of scoring function is visible when explaining
//! historical compliance.

use std::collections::HashSet;

use greenledger_core::{ExtractedDataPoint, RequirementNode};

/// Text similarity in `[0, 1]` between a data point and a requirement.
///
/// Implementations must be deterministic for a given version.
pub trait SimilarityScorer: Send + Sync {
    fn version(&self) -> &str;

    fn similarity(&self, point: &ExtractedDataPoint, requirement: &RequirementNode) -> f32;
}

/// Words that carry no matching signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "for", "from", "in", "into", "is", "its", "of",
    "on", "or", "per", "the", "to", "total", "with",
];

/// Stems are truncated to this many characters ("pollutant", "pollution" → "pollut").
const STEM_LEN: usize = 6;

/// Weight of requirement-label coverage versus label Dice overlap.
const COVERAGE_WEIGHT: f32 = 0.7;

/// Floor applied when every stem of a requirement keyword phrase is present.
const KEYWORD_HIT: f32 = 0.9;

/// Description coverage is discounted relative to label coverage.
const DESCRIPTION_WEIGHT: f32 = 0.8;

/// Deterministic bag-of-stems scorer (`lexical-v1`).
///
/// - coverage: share of requirement-label stems found in the point's label + snippet
/// - dice: Dice coefficient between point-label and requirement-label stems
/// - similarity = 0.7 × coverage + 0.3 × dice, raised to 0.9 on a full
///   keyword-phrase hit, and to 0.8 × description coverage when that is higher
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub const VERSION: &'static str = "lexical-v1";
}

impl SimilarityScorer for LexicalScorer {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn similarity(&self, point: &ExtractedDataPoint, requirement: &RequirementNode) -> f32 {
        let point_label = stems(&point.label);
        let mut point_text = point_label.clone();
        point_text.extend(stems(&point.raw_snippet));

        let req_label = stems(&requirement.label);
        let coverage = coverage_of(&req_label, &point_text);
        let dice = dice(&point_label, &req_label);
        let mut score = COVERAGE_WEIGHT * coverage + (1.0 - COVERAGE_WEIGHT) * dice;

        if let Some(description) = &requirement.description {
            let desc = stems(description);
            score = score.max(DESCRIPTION_WEIGHT * coverage_of(&desc, &point_text));
        }

        let keyword_hit = requirement.keywords.iter().any(|phrase| {
            let phrase = stems(phrase);
            !phrase.is_empty() && phrase.is_subset(&point_text)
        });
        if keyword_hit {
            score = score.max(KEYWORD_HIT);
        }

        score.clamp(0.0, 1.0)
    }
}

/// Lowercased, stop-word-free, prefix-stemmed words. Pure numbers are dropped.
pub fn stems(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .map(|w| w.chars().take(STEM_LEN).collect())
        .collect()
}

fn coverage_of(target: &HashSet<String>, found_in: &HashSet<String>) -> f32 {
    if target.is_empty() {
        return 0.0;
    }
    target.intersection(found_in).count() as f32 / target.len() as f32
}

fn dice(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    2.0 * a.intersection(b).count() as f32 / (a.len() + b.len()) as f32
}

/// Cosine similarity of two L2-normalized vectors.
pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use greenledger_core::{
        DataPointId, DataValue, EvidenceType, Obligation, Provenance, RequirementId,
    };

    pub(crate) fn point(label: &str, snippet: &str, evidence: &str, confidence: f32) -> ExtractedDataPoint {
        ExtractedDataPoint {
            id: DataPointId::new(format!("dp-{label}")),
            source_document_id: "doc-1".into(),
            evidence_type: EvidenceType::new(evidence),
            label: label.into(),
            value: DataValue::Numeric {
                value: 12.5,
                unit: Some("t".into()),
            },
            extracted_at: Utc::now(),
            raw_snippet: snippet.into(),
            confidence,
            provenance: Provenance::default(),
        }
    }

    pub(crate) fn requirement(id: &str, label: &str, evidence: &[&str], keywords: &[&str]) -> RequirementNode {
        RequirementNode {
            id: RequirementId::new(id),
            parent_id: None,
            code: format!("ESRS {id}"),
            label: label.into(),
            description: None,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            required_evidence_types: evidence.iter().map(|e| EvidenceType::new(*e)).collect(),
            validity_days: 365,
            applicable_from: None,
            applicable_until: None,
            obligation: Obligation::Mandatory,
            version: 1,
        }
    }

    #[test]
    fn stems_normalise_words() {
        let s = stems("Pollutants and pollution: 12.5 t of NOx, to water");
        assert!(s.contains("pollut"));
        assert!(s.contains("water"));
        assert!(s.contains("nox"));
        assert!(!s.contains("and"));
        assert!(!s.contains("12"));
        // "t" is too short to carry signal.
        assert!(!s.contains("t"));
    }

    #[test]
    fn identical_labels_score_one() {
        let req = requirement("E1-6", "Gross Scope 1 GHG emissions", &["GhgEmissions"], &[]);
        let dp = point("Gross Scope 1 GHG emissions", "", "GhgEmissions", 1.0);
        let sim = LexicalScorer.similarity(&dp, &req);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn unrelated_text_scores_zero() {
        let req = requirement("E2-4", "Pollution of air, water and soil", &["PollutantDischarge"], &[]);
        let dp = point("Office paper purchases", "Reams bought in Q3", "PollutantDischarge", 1.0);
        assert_eq!(LexicalScorer.similarity(&dp, &req), 0.0);
    }

    #[test]
    fn keyword_phrase_hit_sets_floor() {
        let req = requirement(
            "E2-4",
            "Pollution of air, water and soil",
            &["PollutantDischarge"],
            &["pollutant discharge"],
        );
        let dp = point(
            "Pollutant discharge to water",
            "Nitrogen discharged to water: 12.5 t",
            "PollutantDischarge",
            1.0,
        );
        let sim = LexicalScorer.similarity(&dp, &req);
        assert!((sim - KEYWORD_HIT).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn partial_overlap_is_between_bounds() {
        let req = requirement("E2-4", "Pollution of air, water and soil", &["PollutantDischarge"], &[]);
        let dp = point("Pollutant discharge to water", "", "PollutantDischarge", 1.0);
        let sim = LexicalScorer.similarity(&dp, &req);
        // coverage 2/4, dice 2*2/7
        let expected = 0.7 * 0.5 + 0.3 * (4.0 / 7.0);
        assert!((sim - expected).abs() < 1e-5, "got {sim}, expected {expected}");
    }

    #[test]
    fn description_contributes() {
        let mut req = requirement("E3-4", "Water consumption", &["WaterUse"], &[]);
        req.description = Some("Withdrawal and discharge volumes of water".into());
        let dp = point("Withdrawal volumes", "", "WaterUse", 1.0);
        let sim = LexicalScorer.similarity(&dp, &req);
        // description stems: withdr, discha, volume, water → 2 of 4 found
        assert!((sim - 0.4).abs() < 1e-5, "got {sim}");
    }

    #[test]
    fn scoring_is_deterministic() {
        let req = requirement("E2-4", "Pollution of air, water and soil", &["PollutantDischarge"], &[]);
        let dp = point("Pollutant discharge to water", "soil samples", "PollutantDischarge", 1.0);
        let first = LexicalScorer.similarity(&dp, &req);
        for _ in 0..10 {
            assert_eq!(LexicalScorer.similarity(&dp, &req), first);
        }
    }

    #[test]
    fn cosine_of_unit_vectors() {
        assert!((cosine_sim(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_sim(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
