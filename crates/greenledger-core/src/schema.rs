/// Arrow schema definitions for persisted and exported compliance state.
pub mod ledger {
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

    fn utc_timestamp() -> DataType {
        DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into()))
    }

    /// Schema for evidence ledger entries (append-only).
    pub fn ledger_entry_schema() -> Schema {
        Schema::new(vec![
            Field::new("sequence", DataType::UInt64, false),
            Field::new("requirement_id", DataType::Utf8, false),
            Field::new("data_point_id", DataType::Utf8, false),
            Field::new("period_start", DataType::Date32, false),
            Field::new("period_end", DataType::Date32, false),
            Field::new("confidence", DataType::Float32, false),
            Field::new("accepted_at", utc_timestamp(), false),
            Field::new("valid_until", utc_timestamp(), false),
            Field::new("status", DataType::Utf8, false),
            Field::new("status_changed_at", utc_timestamp(), true),
        ])
    }

    fn gap_fields() -> Vec<Field> {
        vec![
            Field::new("requirement_id", DataType::Utf8, false),
            Field::new("code", DataType::Utf8, false),
            Field::new("period_start", DataType::Date32, false),
            Field::new("period_end", DataType::Date32, false),
            Field::new("reason", DataType::Utf8, false),
            Field::new("days_until_expiry", DataType::Int64, true),
            Field::new("computed_at", utc_timestamp(), false),
            Field::new("open_leaves", DataType::UInt64, true),
            Field::new("in_scope_leaves", DataType::UInt64, true),
        ]
    }

    /// Schema for one detection cycle's gap set.
    pub fn gap_schema() -> Schema {
        Schema::new(gap_fields())
    }

    /// Schema for the alert state table: lifecycle columns followed by the
    /// gap each alert last observed.
    pub fn alert_schema() -> Schema {
        let mut fields = vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("dedupe_key", DataType::Utf8, false),
            Field::new("severity", DataType::Utf8, false),
            Field::new("first_seen_at", utc_timestamp(), false),
            Field::new("last_seen_at", utc_timestamp(), false),
            Field::new("suppressed_until", utc_timestamp(), true),
            Field::new("closed_at", utc_timestamp(), true),
        ];
        fields.extend(gap_fields());
        Schema::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::ledger;

    #[test]
    fn ledger_entry_schema_has_expected_fields() {
        let schema = ledger::ledger_entry_schema();
        assert_eq!(schema.fields().len(), 10);
        assert!(schema.field_with_name("requirement_id").is_ok());
        assert!(schema.field_with_name("status_changed_at").unwrap().is_nullable());
    }

    #[test]
    fn gap_schema_has_expected_fields() {
        let schema = ledger::gap_schema();
        assert_eq!(schema.fields().len(), 9);
        assert!(schema.field_with_name("days_until_expiry").is_ok());
    }

    #[test]
    fn alert_schema_embeds_gap_columns() {
        let schema = ledger::alert_schema();
        assert_eq!(schema.fields().len(), 16);
        assert!(schema.field_with_name("closed_at").unwrap().is_nullable());
        for field in ledger::gap_schema().fields() {
            assert_eq!(schema.field_with_name(field.name()).unwrap(), field.as_ref());
        }
    }
}
