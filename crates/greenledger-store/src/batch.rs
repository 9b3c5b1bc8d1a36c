//! Conversion between ledger entries, gaps, alerts and Arrow `RecordBatch`es.
//!
//! Readers cast each column to the canonical schema type first, so batches
//! that went through DuckDB (microsecond timestamps, string views) load the
//! same as batches written here.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Float32Array, Int64Array, StringArray,
    TimestampNanosecondArray, UInt64Array,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use greenledger_core::{
    Alert, DataPointId, EntryStatus, Gap, GapReason, LedgerEntry, ReportingPeriod, RequirementId,
    RollUp, Severity, ledger,
};
use uuid::Uuid;

use crate::StoreError;

/// 1970-01-01 counted from 0001-01-01 (day 1).
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_FROM_CE
}

fn days_to_date(days: i32) -> Result<NaiveDate, StoreError> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_FROM_CE).ok_or(StoreError::InvalidValue {
        column: "date",
        value: days.to_string(),
    })
}

fn to_nanos(column: &'static str, at: DateTime<Utc>) -> Result<i64, StoreError> {
    at.timestamp_nanos_opt().ok_or(StoreError::InvalidValue {
        column,
        value: at.to_rfc3339(),
    })
}

fn utc_nanos(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(TimestampNanosecondArray::from(values).with_timezone("UTC"))
}

/// Ledger entries as one batch in [`ledger::ledger_entry_schema`].
pub fn entries_to_batch(entries: &[LedgerEntry]) -> Result<RecordBatch, StoreError> {
    let mut accepted = Vec::with_capacity(entries.len());
    let mut valid_until = Vec::with_capacity(entries.len());
    let mut changed = Vec::with_capacity(entries.len());
    for e in entries {
        accepted.push(Some(to_nanos("accepted_at", e.accepted_at)?));
        valid_until.push(Some(to_nanos("valid_until", e.valid_until)?));
        changed.push(optional_nanos("status_changed_at", e.status_changed_at)?);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(entries.iter().map(|e| e.sequence))),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.requirement_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.data_point_id.as_str()),
        )),
        Arc::new(Date32Array::from_iter_values(
            entries.iter().map(|e| date_to_days(e.reporting_period.start)),
        )),
        Arc::new(Date32Array::from_iter_values(
            entries.iter().map(|e| date_to_days(e.reporting_period.end)),
        )),
        Arc::new(Float32Array::from_iter_values(entries.iter().map(|e| e.confidence))),
        utc_nanos(accepted),
        utc_nanos(valid_until),
        Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.status.as_str()))),
        utc_nanos(changed),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(ledger::ledger_entry_schema()),
        columns,
    )?)
}

/// Read ledger entries back from batches in (or castable to)
/// [`ledger::ledger_entry_schema`].
pub fn entries_from_batches(batches: &[RecordBatch]) -> Result<Vec<LedgerEntry>, StoreError> {
    let schema = ledger::ledger_entry_schema();
    let mut out = Vec::new();
    for batch in batches {
        let cols = Columns::new(batch, &schema);
        let sequence = cols.get::<UInt64Array>("sequence")?;
        let requirement = cols.get::<StringArray>("requirement_id")?;
        let data_point = cols.get::<StringArray>("data_point_id")?;
        let start = cols.get::<Date32Array>("period_start")?;
        let end = cols.get::<Date32Array>("period_end")?;
        let confidence = cols.get::<Float32Array>("confidence")?;
        let accepted = cols.get::<TimestampNanosecondArray>("accepted_at")?;
        let valid_until = cols.get::<TimestampNanosecondArray>("valid_until")?;
        let status = cols.get::<StringArray>("status")?;
        let changed = cols.get::<TimestampNanosecondArray>("status_changed_at")?;

        for row in 0..batch.num_rows() {
            let period = period_at(&start, &end, row)?;
            let status_str = status.value(row);
            out.push(LedgerEntry {
                sequence: sequence.value(row),
                requirement_id: RequirementId::new(requirement.value(row)),
                data_point_id: DataPointId::new(data_point.value(row)),
                reporting_period: period,
                confidence: confidence.value(row),
                accepted_at: DateTime::from_timestamp_nanos(accepted.value(row)),
                valid_until: DateTime::from_timestamp_nanos(valid_until.value(row)),
                status: EntryStatus::parse(status_str).ok_or_else(|| StoreError::InvalidValue {
                    column: "status",
                    value: status_str.to_string(),
                })?,
                status_changed_at: optional_instant(&changed, row),
            });
        }
    }
    Ok(out)
}

/// Columns for `gaps`, in [`ledger::gap_schema`] order.
fn gap_columns(gaps: &[&Gap]) -> Result<Vec<ArrayRef>, StoreError> {
    let computed = gaps
        .iter()
        .map(|g| to_nanos("computed_at", g.computed_at).map(Some))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(vec![
        Arc::new(StringArray::from_iter_values(
            gaps.iter().map(|g| g.requirement_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(gaps.iter().map(|g| g.code.as_str()))),
        Arc::new(Date32Array::from_iter_values(
            gaps.iter().map(|g| date_to_days(g.reporting_period.start)),
        )),
        Arc::new(Date32Array::from_iter_values(
            gaps.iter().map(|g| date_to_days(g.reporting_period.end)),
        )),
        Arc::new(StringArray::from_iter_values(gaps.iter().map(|g| g.reason.as_str()))),
        Arc::new(Int64Array::from(
            gaps.iter().map(|g| g.days_until_expiry).collect::<Vec<_>>(),
        )),
        utc_nanos(computed),
        Arc::new(UInt64Array::from(
            gaps.iter()
                .map(|g| g.roll_up.map(|r| r.open_leaves as u64))
                .collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            gaps.iter()
                .map(|g| g.roll_up.map(|r| r.in_scope_leaves as u64))
                .collect::<Vec<_>>(),
        )),
    ])
}

/// Read the gap columns of one batch.
fn read_gaps(cols: &Columns<'_>, rows: usize) -> Result<Vec<Gap>, StoreError> {
    let requirement = cols.get::<StringArray>("requirement_id")?;
    let code = cols.get::<StringArray>("code")?;
    let start = cols.get::<Date32Array>("period_start")?;
    let end = cols.get::<Date32Array>("period_end")?;
    let reason = cols.get::<StringArray>("reason")?;
    let days = cols.get::<Int64Array>("days_until_expiry")?;
    let computed = cols.get::<TimestampNanosecondArray>("computed_at")?;
    let open = cols.get::<UInt64Array>("open_leaves")?;
    let in_scope = cols.get::<UInt64Array>("in_scope_leaves")?;

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let reason_str = reason.value(row);
        let roll_up = (!open.is_null(row) && !in_scope.is_null(row)).then(|| RollUp {
            open_leaves: open.value(row) as usize,
            in_scope_leaves: in_scope.value(row) as usize,
        });
        out.push(Gap {
            requirement_id: RequirementId::new(requirement.value(row)),
            code: code.value(row).to_string(),
            reporting_period: period_at(&start, &end, row)?,
            reason: GapReason::parse(reason_str).ok_or_else(|| StoreError::InvalidValue {
                column: "reason",
                value: reason_str.to_string(),
            })?,
            days_until_expiry: (!days.is_null(row)).then(|| days.value(row)),
            computed_at: DateTime::from_timestamp_nanos(computed.value(row)),
            roll_up,
        });
    }
    Ok(out)
}

fn period_at(start: &Date32Array, end: &Date32Array, row: usize) -> Result<ReportingPeriod, StoreError> {
    ReportingPeriod::new(days_to_date(start.value(row))?, days_to_date(end.value(row))?).map_err(|e| {
        StoreError::InvalidValue {
            column: "period_start",
            value: e.to_string(),
        }
    })
}

fn optional_nanos(
    column: &'static str,
    at: Option<DateTime<Utc>>,
) -> Result<Option<i64>, StoreError> {
    at.map(|at| to_nanos(column, at)).transpose()
}

fn optional_instant(array: &TimestampNanosecondArray, row: usize) -> Option<DateTime<Utc>> {
    (!array.is_null(row)).then(|| DateTime::from_timestamp_nanos(array.value(row)))
}

/// Gaps as one batch in [`ledger::gap_schema`].
pub fn gaps_to_batch(gaps: &[Gap]) -> Result<RecordBatch, StoreError> {
    let gaps: Vec<&Gap> = gaps.iter().collect();
    Ok(RecordBatch::try_new(
        Arc::new(ledger::gap_schema()),
        gap_columns(&gaps)?,
    )?)
}

/// Alerts, open and closed, as one batch in [`ledger::alert_schema`].
pub fn alerts_to_batch(alerts: &[Alert]) -> Result<RecordBatch, StoreError> {
    let mut first_seen = Vec::with_capacity(alerts.len());
    let mut last_seen = Vec::with_capacity(alerts.len());
    let mut suppressed = Vec::with_capacity(alerts.len());
    let mut closed = Vec::with_capacity(alerts.len());
    for a in alerts {
        first_seen.push(Some(to_nanos("first_seen_at", a.first_seen_at)?));
        last_seen.push(Some(to_nanos("last_seen_at", a.last_seen_at)?));
        suppressed.push(optional_nanos("suppressed_until", a.suppressed_until)?);
        closed.push(optional_nanos("closed_at", a.closed_at)?);
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(alerts.iter().map(|a| a.id.to_string()))),
        Arc::new(StringArray::from_iter_values(
            alerts.iter().map(|a| a.dedupe_key.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(alerts.iter().map(|a| a.severity.as_str()))),
        utc_nanos(first_seen),
        utc_nanos(last_seen),
        utc_nanos(suppressed),
        utc_nanos(closed),
    ];
    let gaps: Vec<&Gap> = alerts.iter().map(|a| &a.gap).collect();
    columns.extend(gap_columns(&gaps)?);
    Ok(RecordBatch::try_new(Arc::new(ledger::alert_schema()), columns)?)
}

/// Read alerts back from batches in (or castable to) [`ledger::alert_schema`].
///
/// The dedupe key is recomputed from the stored gap.
pub fn alerts_from_batches(batches: &[RecordBatch]) -> Result<Vec<Alert>, StoreError> {
    let schema = ledger::alert_schema();
    let mut out = Vec::new();
    for batch in batches {
        let cols = Columns::new(batch, &schema);
        let id = cols.get::<StringArray>("id")?;
        let severity = cols.get::<StringArray>("severity")?;
        let first_seen = cols.get::<TimestampNanosecondArray>("first_seen_at")?;
        let last_seen = cols.get::<TimestampNanosecondArray>("last_seen_at")?;
        let suppressed = cols.get::<TimestampNanosecondArray>("suppressed_until")?;
        let closed = cols.get::<TimestampNanosecondArray>("closed_at")?;
        let gaps = read_gaps(&cols, batch.num_rows())?;

        for (row, gap) in gaps.into_iter().enumerate() {
            let id_str = id.value(row);
            let severity_str = severity.value(row);
            out.push(Alert {
                id: Uuid::parse_str(id_str).map_err(|_| StoreError::InvalidValue {
                    column: "id",
                    value: id_str.to_string(),
                })?,
                dedupe_key: gap.dedupe_key(),
                gap,
                severity: Severity::parse(severity_str).ok_or_else(|| StoreError::InvalidValue {
                    column: "severity",
                    value: severity_str.to_string(),
                })?,
                first_seen_at: DateTime::from_timestamp_nanos(first_seen.value(row)),
                last_seen_at: DateTime::from_timestamp_nanos(last_seen.value(row)),
                suppressed_until: optional_instant(&suppressed, row),
                closed_at: optional_instant(&closed, row),
            });
        }
    }
    Ok(out)
}

/// Columns of one batch, each cast to the type the schema expects.
struct Columns<'a> {
    batch: &'a RecordBatch,
    schema: &'a Schema,
}

impl<'a> Columns<'a> {
    fn new(batch: &'a RecordBatch, schema: &'a Schema) -> Self {
        Self { batch, schema }
    }

    fn get<T: Array + Clone + 'static>(&self, name: &str) -> Result<T, StoreError> {
        let field = self
            .schema
            .field_with_name(name)
            .map_err(|_| StoreError::Schema(name.to_string()))?;
        let column = self
            .batch
            .column_by_name(name)
            .ok_or_else(|| StoreError::Schema(name.to_string()))?;
        cast_to(column, field.data_type())?
            .as_any()
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| StoreError::Schema(format!("{name}: unexpected type")))
    }
}

fn cast_to(column: &ArrayRef, to: &DataType) -> Result<ArrayRef, StoreError> {
    if column.data_type() == to {
        return Ok(Arc::clone(column));
    }
    Ok(cast(column, to)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{day, fy2026};
    use arrow::datatypes::TimeUnit;

    fn entry(sequence: u64, status: EntryStatus) -> LedgerEntry {
        LedgerEntry {
            sequence,
            requirement_id: RequirementId::new("E2-4"),
            data_point_id: DataPointId::new(format!("dp-{sequence}")),
            reporting_period: fy2026(),
            confidence: 0.8,
            accepted_at: day(0),
            valid_until: day(365),
            status,
            status_changed_at: (status != EntryStatus::Active).then(|| day(3)),
        }
    }

    #[test]
    fn entries_survive_batch_conversion() {
        let entries = vec![entry(1, EntryStatus::Superseded), entry(2, EntryStatus::Active)];
        let batch = entries_to_batch(&entries).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 10);
        assert_eq!(entries_from_batches(&[batch]).unwrap(), entries);
    }

    #[test]
    fn reads_microsecond_timestamps() {
        let entries = vec![entry(7, EntryStatus::Expired)];
        let batch = entries_to_batch(&entries).unwrap();
        // Rebuild the batch the way DuckDB hands TIMESTAMPTZ back.
        let micros = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
        let columns: Vec<ArrayRef> = batch
            .columns()
            .iter()
            .map(|c| match c.data_type() {
                DataType::Timestamp(..) => cast(c, &micros).unwrap(),
                _ => Arc::clone(c),
            })
            .collect();
        let fields: Vec<_> = batch
            .schema()
            .fields()
            .iter()
            .zip(&columns)
            .map(|(f, c)| f.as_ref().clone().with_data_type(c.data_type().clone()))
            .collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        assert_eq!(entries_from_batches(&[batch]).unwrap(), entries);
    }

    #[test]
    fn missing_column_is_schema_error() {
        let batch = entries_to_batch(&[entry(1, EntryStatus::Active)]).unwrap();
        let trimmed = batch.project(&[0, 1, 2]).unwrap();
        assert!(matches!(
            entries_from_batches(&[trimmed]),
            Err(StoreError::Schema(_))
        ));
    }

    #[test]
    fn gaps_batch_carries_roll_ups() {
        let gaps = vec![
            Gap {
                requirement_id: RequirementId::new("E2"),
                code: "ESRS E2".into(),
                reporting_period: fy2026(),
                reason: GapReason::Unmet,
                days_until_expiry: None,
                computed_at: day(1),
                roll_up: Some(RollUp {
                    open_leaves: 1,
                    in_scope_leaves: 3,
                }),
            },
            Gap {
                requirement_id: RequirementId::new("E2-4"),
                code: "ESRS E2-4".into(),
                reporting_period: fy2026(),
                reason: GapReason::Expiring,
                days_until_expiry: Some(25),
                computed_at: day(1),
                roll_up: None,
            },
        ];
        let batch = gaps_to_batch(&gaps).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let open = batch
            .column_by_name("open_leaves")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(open.value(0), 1);
        assert!(open.is_null(1));
    }

    #[test]
    fn epoch_day_conversion() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_days(epoch), 0);
        let d = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        assert_eq!(days_to_date(date_to_days(d)).unwrap(), d);
    }

    #[test]
    fn alerts_survive_batch_conversion() {
        let expiring = Gap {
            requirement_id: RequirementId::new("E2-4"),
            code: "ESRS E2-4".into(),
            reporting_period: fy2026(),
            reason: GapReason::Expiring,
            days_until_expiry: Some(25),
            computed_at: day(340),
            roll_up: None,
        };
        let roll_up = Gap {
            requirement_id: RequirementId::new("E2"),
            code: "ESRS E2".into(),
            reason: GapReason::Unmet,
            days_until_expiry: None,
            roll_up: Some(RollUp {
                open_leaves: 1,
                in_scope_leaves: 2,
            }),
            ..expiring.clone()
        };
        let mut closed = Alert::open(expiring, Severity::Warning, day(340));
        closed.suppressed_until = Some(day(345));
        closed.closed_at = Some(day(366));
        let open = Alert::open(roll_up, Severity::Info, day(340));
        let alerts = vec![closed, open];

        let batch = alerts_to_batch(&alerts).unwrap();
        assert_eq!(batch.num_columns(), 16);
        assert_eq!(alerts_from_batches(&[batch]).unwrap(), alerts);
    }

    #[test]
    fn unknown_severity_is_invalid_value() {
        let gap = Gap {
            requirement_id: RequirementId::new("E3-4"),
            code: "ESRS E3-4".into(),
            reporting_period: fy2026(),
            reason: GapReason::Unmet,
            days_until_expiry: None,
            computed_at: day(0),
            roll_up: None,
        };
        let batch = alerts_to_batch(&[Alert::open(gap, Severity::Critical, day(0))]).unwrap();
        let mut columns = batch.columns().to_vec();
        columns[2] = Arc::new(StringArray::from(vec!["urgent"])) as ArrayRef;
        let batch = RecordBatch::try_new(batch.schema(), columns).unwrap();
        assert!(matches!(
            alerts_from_batches(&[batch]),
            Err(StoreError::InvalidValue { column: "severity", .. })
        ));
    }
}
