//! Row-mapping layer.
//!
//! Query results arrive as an ordered tuple of untyped column values. This
//! module projects such a tuple positionally onto a typed record with a
//! small, explicit set of coercions:
//!
//! - integers of any width are normalized to the field's integer type,
//!   provided the value fits
//! - text fields accept only text values
//! - timestamp fields accept only timestamp values
//!
//! Anything else, or a tuple shorter than the record, is a `DecodeError`.

use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::pipeline::Stage;

use super::types::{Claimant, Milestone, StageStatus, StageStatuses};

/// A single untyped column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// A value of a type the decoder does not understand, tagged with the
    /// source type name.
    Unsupported(String),
}

impl ColumnValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> String {
        match self {
            ColumnValue::Null => "null".to_string(),
            ColumnValue::Bool(_) => "bool".to_string(),
            ColumnValue::Int16(_) => "int16".to_string(),
            ColumnValue::Int32(_) => "int32".to_string(),
            ColumnValue::Int64(_) => "int64".to_string(),
            ColumnValue::Text(_) => "text".to_string(),
            ColumnValue::Timestamp(_) => "timestamp".to_string(),
            ColumnValue::Unsupported(name) => name.clone(),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i16> for ColumnValue {
    fn from(value: i16) -> Self {
        ColumnValue::Int16(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Int32(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int64(value)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(value: DateTime<Utc>) -> Self {
        ColumnValue::Timestamp(value)
    }
}

/// An ordered, untyped row as returned by a query.
pub type RowValues = Vec<ColumnValue>;

/// Types that can be decoded positionally from an untyped row.
pub trait FromRowValues: Sized {
    /// Number of leading columns the type consumes.
    const FIELD_COUNT: usize;

    /// Decodes the record from `values`. Extra trailing values are ignored.
    fn from_row_values(values: &[ColumnValue]) -> Result<Self, DecodeError>;
}

/// Decodes a text field.
pub fn text_field(value: &ColumnValue, field: &'static str) -> Result<String, DecodeError> {
    match value {
        ColumnValue::Text(s) => Ok(s.clone()),
        other => Err(mismatch(field, "text", other)),
    }
}

/// Decodes an integer field, accepting any integer width that fits `T`.
pub fn integer_field<T>(value: &ColumnValue, field: &'static str) -> Result<T, DecodeError>
where
    T: TryFrom<i64>,
{
    let wide = match value {
        ColumnValue::Int16(v) => i64::from(*v),
        ColumnValue::Int32(v) => i64::from(*v),
        ColumnValue::Int64(v) => *v,
        other => return Err(mismatch(field, "integer", other)),
    };
    T::try_from(wide).map_err(|_| DecodeError::OutOfRange { field, value: wide })
}

/// Decodes a timestamp field.
pub fn timestamp_field(
    value: &ColumnValue,
    field: &'static str,
) -> Result<DateTime<Utc>, DecodeError> {
    match value {
        ColumnValue::Timestamp(t) => Ok(*t),
        other => Err(mismatch(field, "timestamp", other)),
    }
}

/// Decodes a stage status column. The source must be text holding one of
/// the stored spellings.
pub fn status_field(value: &ColumnValue, field: &'static str) -> Result<StageStatus, DecodeError> {
    let raw = text_field(value, field)?;
    raw.parse()
        .map_err(|value| DecodeError::UnknownStatus { field, value })
}

fn mismatch(field: &'static str, expected: &'static str, actual: &ColumnValue) -> DecodeError {
    DecodeError::TypeMismatch {
        field,
        expected,
        actual: actual.type_name(),
    }
}

impl FromRowValues for Milestone {
    const FIELD_COUNT: usize = 13;

    fn from_row_values(values: &[ColumnValue]) -> Result<Self, DecodeError> {
        if values.len() < Self::FIELD_COUNT {
            return Err(DecodeError::TooFewColumns {
                expected: Self::FIELD_COUNT,
                actual: values.len(),
            });
        }

        let statuses = StageStatuses {
            ingest: status_field(&values[1], "ingest_status")?,
            transcode: status_field(&values[2], "transcode_status")?,
            metadata_gen: status_field(&values[3], "metadata_gen_status")?,
            assemble: status_field(&values[4], "assemble_status")?,
            publish: status_field(&values[5], "publish_status")?,
        };

        Ok(Milestone {
            id: text_field(&values[0], "milestone_id")?,
            statuses,
            overridden_by: text_field(&values[6], "overridden_by")?,
            claimant: Claimant {
                host: text_field(&values[7], "host_machine")?,
                process_id: integer_field(&values[8], "process_id")?,
            },
            retries: integer_field(&values[9], "retries")?,
            start_time: timestamp_field(&values[10], "start_time")?,
            end_time: timestamp_field(&values[11], "end_time")?,
            error_message: text_field(&values[12], "error_message")?,
        })
    }
}

impl Milestone {
    /// Encodes the milestone as a row in table column order.
    pub fn to_row_values(&self) -> RowValues {
        let mut values = vec![ColumnValue::from(self.id.as_str())];
        for stage in Stage::ALL {
            values.push(ColumnValue::from(self.status(stage).as_str()));
        }
        values.extend([
            ColumnValue::from(self.overridden_by.as_str()),
            ColumnValue::from(self.claimant.host.as_str()),
            ColumnValue::Int64(i64::from(self.claimant.process_id)),
            ColumnValue::Int32(i32::try_from(self.retries).unwrap_or(i32::MAX)),
            ColumnValue::Timestamp(self.start_time),
            ColumnValue::Timestamp(self.end_time),
            ColumnValue::from(self.error_message.as_str()),
        ]);
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> RowValues {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        vec![
            "id-123".into(),
            "completed".into(),
            "pending".into(),
            "pending".into(),
            "pending".into(),
            "pending".into(),
            "".into(),
            "host-a".into(),
            ColumnValue::Int32(42),
            ColumnValue::Int16(0),
            t0.into(),
            t1.into(),
            "".into(),
        ]
    }

    #[test]
    fn test_decode_full_row() {
        let m = Milestone::from_row_values(&sample_row()).expect("row should decode");

        assert_eq!(m.id, "id-123");
        assert_eq!(m.status(Stage::Ingest), StageStatus::Completed);
        assert_eq!(m.status(Stage::Transcode), StageStatus::Pending);
        assert_eq!(m.status(Stage::Publish), StageStatus::Pending);
        assert_eq!(m.overridden_by, "");
        assert_eq!(m.claimant, Claimant::new("host-a", 42));
        assert_eq!(m.retries, 0);
        assert_eq!(
            m.start_time,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(m.end_time, super::super::types::end_time_sentinel());
        assert_eq!(m.error_message, "");
    }

    #[test]
    fn test_decode_short_row_fails() {
        let mut row = sample_row();
        row.truncate(11);

        let err = Milestone::from_row_values(&row).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooFewColumns {
                expected: 13,
                actual: 11
            }
        );
    }

    #[test]
    fn test_decode_ignores_trailing_columns() {
        let mut row = sample_row();
        row.push(ColumnValue::Bool(true));
        assert!(Milestone::from_row_values(&row).is_ok());
    }

    #[test]
    fn test_integer_widths_normalize() {
        assert_eq!(integer_field::<u32>(&ColumnValue::Int16(5), "f"), Ok(5));
        assert_eq!(integer_field::<u32>(&ColumnValue::Int32(6), "f"), Ok(6));
        assert_eq!(integer_field::<u32>(&ColumnValue::Int64(7), "f"), Ok(7));
    }

    #[test]
    fn test_integer_out_of_range_is_error() {
        let err = integer_field::<u32>(&ColumnValue::Int64(-1), "retries").unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfRange {
                field: "retries",
                value: -1
            }
        );
    }

    #[test]
    fn test_text_target_rejects_integer() {
        let mut row = sample_row();
        row[7] = ColumnValue::Int32(1);

        let err = Milestone::from_row_values(&row).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TypeMismatch {
                field: "host_machine",
                ..
            }
        ));
    }

    #[test]
    fn test_timestamp_target_rejects_text() {
        let mut row = sample_row();
        row[10] = "2024-03-01 12:00:00".into();

        let err = Milestone::from_row_values(&row).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TypeMismatch {
                field: "start_time",
                expected: "timestamp",
                ..
            }
        ));
    }

    #[test]
    fn test_null_and_unsupported_rejected() {
        let mut row = sample_row();
        row[12] = ColumnValue::Null;
        assert!(Milestone::from_row_values(&row).is_err());

        let mut row = sample_row();
        row[9] = ColumnValue::Unsupported("NUMERIC".to_string());
        let err = Milestone::from_row_values(&row).unwrap_err();
        assert!(err.to_string().contains("NUMERIC"));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut row = sample_row();
        row[3] = "running".into();

        let err = Milestone::from_row_values(&row).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownStatus {
                field: "metadata_gen_status",
                value: "running".to_string()
            }
        );
    }

    #[test]
    fn test_encode_then_decode_preserves_milestone() {
        let mut original = Milestone::new(Claimant::new("host-b", 99));
        original.retries = 2;
        original.error_message = "boom".to_string();

        let decoded = Milestone::from_row_values(&original.to_row_values()).unwrap();
        assert_eq!(decoded, original);
    }
}
