//! Built-in extractor for documents that already carry structured data
//! points as JSON.

use async_trait::async_trait;
use greenledger_core::ExtractedField;
use serde::Deserialize;

use crate::adapters::{ExtractionAdapter, ExtractionError};

pub const JSON_MIME: &str = "application/json";

/// Accepts either a bare array of fields or `{"data_points": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Fields(Vec<ExtractedField>),
    Wrapped { data_points: Vec<ExtractedField> },
}

/// Parse an extraction payload. Shared with adapters that receive the same
/// shape from a remote service.
pub fn parse_fields(bytes: &[u8]) -> Result<Vec<ExtractedField>, ExtractionError> {
    let payload: Payload =
        serde_json::from_slice(bytes).map_err(|e| ExtractionError::Malformed(e.to_string()))?;
    Ok(match payload {
        Payload::Fields(fields) | Payload::Wrapped { data_points: fields } => fields,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

#[async_trait]
impl ExtractionAdapter for JsonExtractor {
    fn name(&self) -> &str {
        "json"
    }

    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Vec<ExtractedField>, ExtractionError> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        if !essence.eq_ignore_ascii_case(JSON_MIME) {
            return Err(ExtractionError::Unsupported(mime_type.to_string()));
        }
        parse_fields(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenledger_core::DataValue;

    const DOC: &str = r#"{
        "data_points": [{
            "evidence_type": "PollutantDischarge",
            "label": "Nitrogen discharge to water",
            "value": {"kind": "numeric", "value": 12.5, "unit": "t"},
            "raw_snippet": "Nitrogen discharged to water: 12.5 t",
            "confidence": 0.92,
            "provenance": {"page": 14}
        }]
    }"#;

    #[tokio::test]
    async fn extracts_wrapped_fields() {
        let fields = JsonExtractor
            .extract(DOC.as_bytes(), "application/json; charset=utf-8")
            .await
            .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].evidence_type.as_str(), "PollutantDischarge");
        assert_eq!(fields[0].provenance.page, Some(14));
        assert!(matches!(fields[0].value, DataValue::Numeric { value, .. } if value == 12.5));
    }

    #[tokio::test]
    async fn extracts_bare_array() {
        let doc = r#"[{"evidence_type": "WaterUse", "label": "Water withdrawn",
                       "value": {"kind": "text", "value": "n/a"}, "confidence": 0.5}]"#;
        let fields = JsonExtractor.extract(doc.as_bytes(), JSON_MIME).await.unwrap();
        assert_eq!(fields[0].raw_snippet, "");
    }

    #[tokio::test]
    async fn rejects_other_types() {
        let err = JsonExtractor.extract(b"%PDF-1.7", "application/pdf").await.unwrap_err();
        assert_eq!(err, ExtractionError::Unsupported("application/pdf".into()));
    }

    #[tokio::test]
    async fn malformed_json() {
        let err = JsonExtractor.extract(b"{not json", JSON_MIME).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }
}
