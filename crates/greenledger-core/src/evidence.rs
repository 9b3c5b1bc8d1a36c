//! Evidence documents and the data points extracted from them.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::period::ReportingPeriod;

/// Kind of evidence a data point provides (e.g. `PollutantDischarge`).
///
/// Matching requires exact equality between a data point's type and one of
/// a requirement's required types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceType(String);

impl EvidenceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of an extracted data point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPointId(String);

impl DataPointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id from the document identity and the point's position in
    /// the extraction output, so re-extracting the same bytes yields the same ids.
    pub fn derive(source_document_id: &str, content_hash: &str, ordinal: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_document_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(content_hash.as_bytes());
        hasher.update([0u8]);
        hasher.update(ordinal.to_le_bytes());
        let digest = hasher.finalize();
        Self(format!("dp-{}", hex::encode(&digest[..12])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of a document's bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A raw evidence document submitted to the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub source_document_id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Reporting period the evidence is for; defaults to the submission period.
    pub reporting_period: Option<ReportingPeriod>,
    content_hash: String,
}

impl Document {
    pub fn new(
        source_document_id: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            source_document_id: source_document_id.into(),
            mime_type: mime_type.into(),
            bytes,
            reporting_period: None,
            content_hash,
        }
    }

    pub fn with_period(mut self, period: ReportingPeriod) -> Self {
        self.reporting_period = Some(period);
        self
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

/// Typed value carried by a data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataValue {
    Numeric {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Text {
        value: String,
    },
    Date {
        value: NaiveDate,
    },
    Boolean {
        value: bool,
    },
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric { value, unit: Some(u) } => write!(f, "{value} {u}"),
            Self::Numeric { value, unit: None } => write!(f, "{value}"),
            Self::Text { value } => f.write_str(value),
            Self::Date { value } => write!(f, "{value}"),
            Self::Boolean { value } => write!(f, "{value}"),
        }
    }
}

/// Where in the source document a data point was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// A structured field as returned by an extraction capability, before the
/// pipeline assigns it an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub evidence_type: EvidenceType,
    /// Short semantic label, e.g. "Nitrogen discharge to water".
    pub label: String,
    pub value: DataValue,
    #[serde(default)]
    pub raw_snippet: String,
    pub confidence: f32,
    #[serde(default)]
    pub provenance: Provenance,
}

impl ExtractedField {
    /// Stamp the field with its document identity.
    pub fn into_data_point(
        self,
        document: &Document,
        ordinal: usize,
        extracted_at: DateTime<Utc>,
    ) -> ExtractedDataPoint {
        ExtractedDataPoint {
            id: DataPointId::derive(&document.source_document_id, document.content_hash(), ordinal),
            source_document_id: document.source_document_id.clone(),
            evidence_type: self.evidence_type,
            label: self.label,
            value: self.value,
            extracted_at,
            raw_snippet: self.raw_snippet,
            confidence: self.confidence,
            provenance: self.provenance,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DataPointError {
    #[error("data point {0}: confidence {1} outside 0..=1")]
    Confidence(DataPointId, f32),
    #[error("data point {0}: empty label and snippet")]
    NoText(DataPointId),
    #[error("data point {0}: empty evidence type")]
    NoEvidenceType(DataPointId),
}

/// An immutable, typed data point with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDataPoint {
    pub id: DataPointId,
    pub source_document_id: String,
    pub evidence_type: EvidenceType,
    pub label: String,
    pub value: DataValue,
    pub extracted_at: DateTime<Utc>,
    pub raw_snippet: String,
    /// Extraction-side confidence in `0..=1`.
    pub confidence: f32,
    pub provenance: Provenance,
}

impl ExtractedDataPoint {
    /// Reject points the mapper cannot reason about.
    pub fn validate(&self) -> Result<(), DataPointError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DataPointError::Confidence(self.id.clone(), self.confidence));
        }
        if self.label.trim().is_empty() && self.raw_snippet.trim().is_empty() {
            return Err(DataPointError::NoText(self.id.clone()));
        }
        if self.evidence_type.as_str().trim().is_empty() {
            return Err(DataPointError::NoEvidenceType(self.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(confidence: f32) -> ExtractedField {
        ExtractedField {
            evidence_type: EvidenceType::new("PollutantDischarge"),
            label: "Nitrogen discharged to water".into(),
            value: DataValue::Numeric {
                value: 12.5,
                unit: Some("t".into()),
            },
            raw_snippet: "Total nitrogen discharge: 12.5 t".into(),
            confidence,
            provenance: Provenance {
                page: Some(4),
                section: None,
            },
        }
    }

    #[test]
    fn data_point_ids_are_deterministic() {
        let doc = Document::new("doc-1", "application/json", b"{}".to_vec());
        let now = Utc::now();
        let a = field(0.9).into_data_point(&doc, 0, now);
        let b = field(0.9).into_data_point(&doc, 0, now);
        let c = field(0.9).into_data_point(&doc, 1, now);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.as_str().starts_with("dp-"));
    }

    #[test]
    fn content_hash_changes_with_bytes() {
        let a = Document::new("doc-1", "text/plain", b"v1".to_vec());
        let b = Document::new("doc-1", "text/plain", b"v2".to_vec());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let doc = Document::new("doc-1", "application/json", Vec::new());
        let dp = field(1.3).into_data_point(&doc, 0, Utc::now());
        assert!(matches!(dp.validate(), Err(DataPointError::Confidence(_, _))));

        let ok = field(0.7).into_data_point(&doc, 0, Utc::now());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn validate_rejects_textless_point() {
        let doc = Document::new("doc-1", "application/json", Vec::new());
        let mut f = field(0.8);
        f.label = " ".into();
        f.raw_snippet.clear();
        let dp = f.into_data_point(&doc, 0, Utc::now());
        assert!(matches!(dp.validate(), Err(DataPointError::NoText(_))));
    }

    #[test]
    fn data_value_json_shape() {
        let json = r#"{"kind": "numeric", "value": 3.2, "unit": "tCO2e"}"#;
        let v: DataValue = serde_json::from_str(json).unwrap();
        assert_eq!(
            v,
            DataValue::Numeric {
                value: 3.2,
                unit: Some("tCO2e".into())
            }
        );
        assert_eq!(v.to_string(), "3.2 tCO2e");

        let json = r#"{"kind": "boolean", "value": true}"#;
        let v: DataValue = serde_json::from_str(json).unwrap();
        assert_eq!(v, DataValue::Boolean { value: true });
    }

    #[test]
    fn extracted_field_defaults_optional_parts() {
        let json = r#"{
            "evidence_type": "WaterWithdrawal",
            "label": "Water withdrawn",
            "value": {"kind": "numeric", "value": 1200.0},
            "confidence": 0.88
        }"#;
        let f: ExtractedField = serde_json::from_str(json).unwrap();
        assert!(f.raw_snippet.is_empty());
        assert_eq!(f.provenance, Provenance::default());
    }
}
