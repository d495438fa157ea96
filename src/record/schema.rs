//! Output record schema and field mapping
//!
//! The output schema is derived deterministically from the field mapping,
//! so every run that uses the same mapping writes identical shard layouts.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Column names of the fixed fields
pub mod names {
    pub const ID: &str = "id";
    pub const RA: &str = "coord_ra";
    pub const DEC: &str = "coord_dec";
    pub const RA_ERR: &str = "coord_raErr";
    pub const DEC_ERR: &str = "coord_decErr";
    pub const PM_RA: &str = "pm_ra";
    pub const PM_DEC: &str = "pm_dec";
    pub const EPOCH: &str = "epoch";
}

/// Storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Float64,
    Boolean,
    Utf8,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::Boolean => "boolean",
            FieldType::Utf8 => "utf8",
        }
    }
}

/// One column of the output schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDef {
    fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

impl fmt::Display for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.name,
            self.field_type.name(),
            if self.nullable { "?" } else { "" }
        )
    }
}

/// How a raw column is interpreted when filling a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Id,
    Ra,
    Dec,
    Float,
    Flag,
    Text,
}

/// A schema field together with the raw column that feeds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub def: FieldDef,
    pub column: String,
    pub role: FieldRole,
}

/// Logical field name to raw input column name.
///
/// Band, flag, and extra lists keep the order they were given in, which is
/// also the column order of the output schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub id: String,
    pub ra: String,
    pub dec: String,
    pub ra_err: Option<String>,
    pub dec_err: Option<String>,
    pub pm_ra: Option<String>,
    pub pm_dec: Option<String>,
    pub epoch: Option<String>,
    /// (band, column)
    pub magnitudes: Vec<(String, String)>,
    /// (band, column); every band must also have a magnitude
    pub magnitude_errors: Vec<(String, String)>,
    /// (output name, column)
    pub flags: Vec<(String, String)>,
    /// (output name, column), copied through as text
    pub extras: Vec<(String, String)>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id: "id".into(),
            ra: "ra".into(),
            dec: "dec".into(),
            ra_err: None,
            dec_err: None,
            pm_ra: None,
            pm_dec: None,
            epoch: None,
            magnitudes: Vec::new(),
            magnitude_errors: Vec::new(),
            flags: Vec::new(),
            extras: Vec::new(),
        }
    }
}

impl FieldMapping {
    /// Expand the mapping into ordered field specs
    pub fn field_specs(&self) -> Result<Vec<FieldSpec>, ConfigError> {
        let mut specs = vec![
            spec(names::ID, FieldType::Int64, false, &self.id, FieldRole::Id),
            spec(names::RA, FieldType::Float64, false, &self.ra, FieldRole::Ra),
            spec(names::DEC, FieldType::Float64, false, &self.dec, FieldRole::Dec),
        ];

        let optional = [
            (names::RA_ERR, &self.ra_err),
            (names::DEC_ERR, &self.dec_err),
            (names::PM_RA, &self.pm_ra),
            (names::PM_DEC, &self.pm_dec),
            (names::EPOCH, &self.epoch),
        ];
        for (name, column) in optional {
            if let Some(column) = column {
                specs.push(spec(name, FieldType::Float64, true, column, FieldRole::Float));
            }
        }

        for (band, _) in &self.magnitude_errors {
            if !self.magnitudes.iter().any(|(b, _)| b == band) {
                return Err(ConfigError::InvalidMapping {
                    arg: band.clone(),
                    reason: "magnitude error given for a band without a magnitude".into(),
                });
            }
        }

        for (band, column) in &self.magnitudes {
            specs.push(spec(
                &format!("{}_mag", band),
                FieldType::Float64,
                true,
                column,
                FieldRole::Float,
            ));
            if let Some((_, err_column)) = self.magnitude_errors.iter().find(|(b, _)| b == band) {
                specs.push(spec(
                    &format!("{}_magErr", band),
                    FieldType::Float64,
                    true,
                    err_column,
                    FieldRole::Float,
                ));
            }
        }

        for (name, column) in &self.flags {
            specs.push(spec(name, FieldType::Boolean, false, column, FieldRole::Flag));
        }

        for (name, column) in &self.extras {
            specs.push(spec(name, FieldType::Utf8, true, column, FieldRole::Text));
        }

        let mut seen = HashSet::new();
        for s in &specs {
            if !seen.insert(s.def.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    name: s.def.name.clone(),
                });
            }
        }

        Ok(specs)
    }
}

fn spec(name: &str, field_type: FieldType, nullable: bool, column: &str, role: FieldRole) -> FieldSpec {
    FieldSpec {
        def: FieldDef::new(name, field_type, nullable),
        column: column.to_string(),
        role,
    }
}

/// Ordered list of output fields shared by every shard of a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSchema {
    fields: Vec<FieldDef>,
}

impl CatalogSchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn from_specs(specs: &[FieldSpec]) -> Self {
        Self::new(specs.iter().map(|s| s.def.clone()).collect())
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Compact one-line rendering, used in mismatch errors
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
