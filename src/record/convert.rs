//! Raw row to record conversion
//!
//! A converter is bound once per input file: mapped columns are resolved to
//! positions up front, so a file missing a mapped column fails immediately
//! instead of rejecting every row.

use super::schema::{FieldRole, FieldSpec};
use super::{FieldValue, Record};
use crate::error::SourceError;
use crate::index::Coordinate;
use crate::source::RawRow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Why a row was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A required field is null or empty
    MissingField,
    /// A numeric field does not parse
    InvalidNumber,
    /// A flag field is not a recognised boolean
    InvalidFlag,
    /// RA/Dec outside the valid sky range
    CoordinateOutOfRange,
    /// The source could not decode the row
    MalformedRow,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingField => "missing_field",
            RejectReason::InvalidNumber => "invalid_number",
            RejectReason::InvalidFlag => "invalid_flag",
            RejectReason::CoordinateOutOfRange => "coordinate_out_of_range",
            RejectReason::MalformedRow => "malformed_row",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected row with a human-readable explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    column: usize,
    role: FieldRole,
    required: bool,
}

/// Converts raw rows of one file into records
#[derive(Debug, Clone)]
pub struct RecordConverter {
    bindings: Vec<Binding>,
}

impl RecordConverter {
    /// Resolve each field's raw column against the file's header
    pub fn bind(specs: &[FieldSpec], columns: &[String], path: &Path) -> Result<Self, SourceError> {
        let mut bindings = Vec::with_capacity(specs.len());
        let mut missing = Vec::new();

        for spec in specs {
            match columns.iter().position(|c| c == &spec.column) {
                Some(column) => bindings.push(Binding {
                    name: spec.def.name.clone(),
                    column,
                    role: spec.role,
                    required: !spec.def.nullable && spec.role != FieldRole::Flag,
                }),
                None => missing.push(spec.column.as_str()),
            }
        }

        if !missing.is_empty() {
            return Err(SourceError::Format {
                path: path.to_path_buf(),
                reason: format!("missing mapped column(s): {}", missing.join(", ")),
            });
        }

        Ok(Self { bindings })
    }

    /// Convert one row, returning its coordinate and record
    pub fn convert(&self, raw: &RawRow) -> Result<(Coordinate, Record), Rejection> {
        let mut values = Vec::with_capacity(self.bindings.len());
        let mut ra = None;
        let mut dec = None;

        for binding in &self.bindings {
            let text = raw.get(binding.column);

            let text = match text {
                Some(t) => t,
                None if binding.required => {
                    return Err(Rejection::new(
                        RejectReason::MissingField,
                        format!("row {}: '{}' is empty", raw.row, binding.name),
                    ));
                }
                None if binding.role == FieldRole::Flag => {
                    values.push(FieldValue::Boolean(false));
                    continue;
                }
                None => {
                    values.push(FieldValue::Null);
                    continue;
                }
            };

            let value = match binding.role {
                FieldRole::Id => FieldValue::Int64(parse_i64(text, raw.row, &binding.name)?),
                FieldRole::Ra => {
                    let v = parse_f64(text, raw.row, &binding.name)?;
                    ra = Some(v);
                    FieldValue::Float64(v)
                }
                FieldRole::Dec => {
                    let v = parse_f64(text, raw.row, &binding.name)?;
                    dec = Some(v);
                    FieldValue::Float64(v)
                }
                FieldRole::Float => FieldValue::Float64(parse_f64(text, raw.row, &binding.name)?),
                FieldRole::Flag => FieldValue::Boolean(parse_flag(text, raw.row, &binding.name)?),
                FieldRole::Text => FieldValue::Utf8(text.to_string()),
            };
            values.push(value);
        }

        let (ra, dec) = match (ra, dec) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => {
                return Err(Rejection::new(
                    RejectReason::MissingField,
                    format!("row {}: no coordinate", raw.row),
                ))
            }
        };

        let coord = Coordinate::new(ra, dec).map_err(|e| {
            Rejection::new(
                RejectReason::CoordinateOutOfRange,
                format!("row {}: {}", raw.row, e),
            )
        })?;

        Ok((coord, Record::new(values)))
    }
}

fn parse_i64(text: &str, row: u64, field: &str) -> Result<i64, Rejection> {
    text.parse::<i64>().map_err(|_| {
        Rejection::new(
            RejectReason::InvalidNumber,
            format!("row {}: '{}' is not an integer: '{}'", row, field, text),
        )
    })
}

fn parse_f64(text: &str, row: u64, field: &str) -> Result<f64, Rejection> {
    text.parse::<f64>().map_err(|_| {
        Rejection::new(
            RejectReason::InvalidNumber,
            format!("row {}: '{}' is not a number: '{}'", row, field, text),
        )
    })
}

fn parse_flag(text: &str, row: u64, field: &str) -> Result<bool, Rejection> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Ok(true),
        "0" | "false" | "f" | "no" | "n" => Ok(false),
        _ => Err(Rejection::new(
            RejectReason::InvalidFlag,
            format!("row {}: '{}' is not a flag: '{}'", row, field, text),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldMapping;

    fn converter(columns: &[&str]) -> RecordConverter {
        let mapping = FieldMapping {
            ra_err: Some("ra_err".into()),
            magnitudes: vec![("g".into(), "gmag".into())],
            flags: vec![("blended".into(), "blend".into())],
            extras: vec![("name".into(), "name".into())],
            ..FieldMapping::default()
        };
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        RecordConverter::bind(&mapping.field_specs().unwrap(), &columns, Path::new("t.csv"))
            .unwrap()
    }

    fn row(values: &[&str]) -> RawRow {
        RawRow::new(
            1,
            values
                .iter()
                .map(|v| (!v.is_empty()).then(|| v.to_string()))
                .collect(),
        )
    }

    const COLUMNS: &[&str] = &["name", "dec", "ra", "id", "gmag", "ra_err", "blend"];

    #[test]
    fn test_converts_in_schema_order() {
        let conv = converter(COLUMNS);
        let (coord, record) = conv
            .convert(&row(&["star-a", "-12.5", "150.25", "42", "17.3", "", "1"]))
            .unwrap();

        assert_eq!(coord.ra(), 150.25);
        assert_eq!(coord.dec(), -12.5);
        assert_eq!(
            record.values(),
            &[
                FieldValue::Int64(42),
                FieldValue::Float64(150.25),
                FieldValue::Float64(-12.5),
                FieldValue::Null,
                FieldValue::Float64(17.3),
                FieldValue::Boolean(true),
                FieldValue::Utf8("star-a".into()),
            ]
        );
        assert_eq!(record.id(), Some(42));
    }

    #[test]
    fn test_missing_required_field() {
        let conv = converter(COLUMNS);
        let err = conv
            .convert(&row(&["x", "1.0", "2.0", "", "", "", ""]))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::MissingField);
    }

    #[test]
    fn test_out_of_range_latitude() {
        let conv = converter(COLUMNS);
        let err = conv
            .convert(&row(&["x", "97", "2.0", "1", "", "", "0"]))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::CoordinateOutOfRange);
    }

    #[test]
    fn test_invalid_number_and_flag() {
        let conv = converter(COLUMNS);
        let err = conv
            .convert(&row(&["x", "1.0", "abc", "1", "", "", ""]))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidNumber);

        let err = conv
            .convert(&row(&["x", "1.0", "2.0", "1", "", "", "maybe"]))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidFlag);
    }

    #[test]
    fn test_empty_flag_is_false() {
        let conv = converter(COLUMNS);
        let (_, record) = conv
            .convert(&row(&["x", "1.0", "2.0", "1", "", "", ""]))
            .unwrap();
        assert_eq!(record.get(5), Some(&FieldValue::Boolean(false)));
    }

    #[test]
    fn test_bind_reports_missing_columns() {
        let mapping = FieldMapping::default();
        let columns = vec!["id".to_string(), "ra".to_string()];
        let err = RecordConverter::bind(&mapping.field_specs().unwrap(), &columns, Path::new("t.csv"))
            .unwrap_err();
        match err {
            SourceError::Format { reason, .. } => assert!(reason.contains("dec")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
