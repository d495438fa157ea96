//! Output records and their conversion from raw input rows
//!
//! A [`Record`] is created once per accepted input row and never changes
//! afterwards. Its values line up one-to-one with the [`CatalogSchema`].

pub mod convert;
pub mod schema;

pub use convert::{RecordConverter, RejectReason, Rejection};
pub use schema::{CatalogSchema, FieldDef, FieldMapping, FieldRole, FieldSpec, FieldType};

/// A single typed value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    Utf8(String),
}

impl FieldValue {
    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Int64(_) => "int64",
            FieldValue::Float64(_) => "float64",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Utf8(_) => "utf8",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

/// One converted catalog row
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<FieldValue>,
}

impl Record {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, field: usize) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the `id` column (always the first field)
    pub fn id(&self) -> Option<i64> {
        self.values.first().and_then(FieldValue::as_i64)
    }
}
