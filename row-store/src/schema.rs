//! Entity descriptors: the declared shape of one table.
//!
//! A descriptor lists the fields of an entity in declaration order, each with
//! its semantic type and nullability, plus the ordered subset of fields that
//! forms the natural key. Descriptors are built once at start-up and shared
//! read-only behind an `Arc`.

use crate::value::{Row, RowKey, Value};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

/// Largest precision representable by `rust_decimal`.
pub const MAX_DECIMAL_PRECISION: u32 = 28;

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("entity {0} declares no fields")]
    NoFields(String),

    #[error("entity {entity} declares field {field} more than once")]
    DuplicateField { entity: String, field: String },

    #[error("entity {0} declares no key fields")]
    EmptyKey(String),

    #[error("entity {entity} key field {field} is not a declared field")]
    UnknownKeyField { entity: String, field: String },

    #[error("entity {entity} lists key field {field} more than once")]
    DuplicateKeyField { entity: String, field: String },

    #[error("entity {entity} key field {field} cannot be nullable")]
    NullableKeyField { entity: String, field: String },

    #[error("entity {entity} field {field}: {reason}")]
    InvalidField {
        entity: String,
        field: String,
        reason: String,
    },
}

/// Semantic type of a field.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Text {
        #[serde(default)]
        max_length: Option<u32>,
    },
    Integer,
    Decimal {
        precision: u32,
        scale: u32,
    },
    Date,
    Timestamp,
}

impl FieldType {
    pub const fn name(&self) -> &'static str {
        match self {
            FieldType::Text { .. } => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal { .. } => "decimal",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            FieldType::Text {
                max_length: Some(0),
            } => Err("max_length must be greater than 0".into()),
            FieldType::Decimal { precision, scale } => {
                if *precision == 0 || *precision > MAX_DECIMAL_PRECISION {
                    Err(format!(
                        "precision must be between 1 and {MAX_DECIMAL_PRECISION}"
                    ))
                } else if scale > precision {
                    Err("scale cannot exceed precision".into())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Checks that a non-null value fits this type.
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (FieldType::Text { max_length }, Value::Text(s)) => match max_length {
                Some(max) if s.chars().count() > *max as usize => Err(format!(
                    "text of {} characters exceeds max length {max}",
                    s.chars().count()
                )),
                _ => Ok(()),
            },
            (FieldType::Integer, Value::Integer(_)) => Ok(()),
            (FieldType::Decimal { precision, scale }, Value::Decimal(d)) => {
                let integer_digits = integer_digits(d);
                if integer_digits > precision - scale {
                    Err(format!(
                        "{d} is out of range for decimal({precision}, {scale})"
                    ))
                } else if d.scale() > *scale {
                    Err(format!("{d} has more than {scale} fractional digits"))
                } else {
                    Ok(())
                }
            }
            (FieldType::Date, Value::Date(_)) => Ok(()),
            (FieldType::Timestamp, Value::Timestamp(_)) => Ok(()),
            (field_type, value) => Err(format!(
                "expected {} but found {}",
                field_type.name(),
                value.kind()
            )),
        }
    }
}

fn integer_digits(d: &Decimal) -> u32 {
    let mut integer_part = d.trunc().abs().normalize().mantissa();
    let mut digits = 0;
    while integer_part > 0 {
        integer_part /= 10;
        digits += 1;
    }
    digits
}

/// A row failing the declared constraints of one of its fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

impl Violation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Violation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// One declared field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Value taken when a record omits the field.
    pub default: Value,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            field_type,
            nullable: true,
            default: Value::Null,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityDescriptor {
    name: String,
    fields: IndexMap<String, FieldSpec>,
    key_fields: Vec<String>,
}

impl EntityDescriptor {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
        key_fields: Vec<String>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();

        if fields.is_empty() {
            return Err(SchemaError::NoFields(name));
        }

        let mut field_map = IndexMap::with_capacity(fields.len());
        for field in fields {
            field
                .field_type
                .validate()
                .map_err(|reason| SchemaError::InvalidField {
                    entity: name.clone(),
                    field: field.name.clone(),
                    reason,
                })?;

            if field_map.contains_key(&field.name) {
                return Err(SchemaError::DuplicateField {
                    entity: name,
                    field: field.name,
                });
            }
            field_map.insert(field.name.clone(), field);
        }

        if key_fields.is_empty() {
            return Err(SchemaError::EmptyKey(name));
        }

        let mut seen = HashSet::new();
        for key_field in &key_fields {
            let Some(spec) = field_map.get(key_field) else {
                return Err(SchemaError::UnknownKeyField {
                    entity: name,
                    field: key_field.clone(),
                });
            };
            if !seen.insert(key_field) {
                return Err(SchemaError::DuplicateKeyField {
                    entity: name,
                    field: key_field.clone(),
                });
            }
            if spec.nullable {
                return Err(SchemaError::NullableKeyField {
                    entity: name,
                    field: key_field.clone(),
                });
            }
        }

        Ok(EntityDescriptor {
            name,
            fields: field_map,
            key_fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Extracts the natural key of `row`. Missing key fields read as null.
    pub fn key_of(&self, row: &Row) -> RowKey {
        RowKey(
            self.key_fields
                .iter()
                .map(|field| row.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Storage-boundary constraint check applied to every row written.
    pub fn check_row(&self, row: &Row) -> Result<(), Violation> {
        for spec in self.fields.values() {
            let value = row
                .get(&spec.name)
                .ok_or_else(|| Violation::new(&spec.name, "field is missing"))?;

            if value.is_null() {
                if !spec.nullable {
                    return Err(Violation::new(&spec.name, "null value in non-null field"));
                }
                continue;
            }

            spec.field_type
                .check(value)
                .map_err(|reason| Violation::new(&spec.name, reason))?;
        }

        if let Some(extra) = row.keys().find(|name| !self.fields.contains_key(*name)) {
            return Err(Violation::new(extra, "field is not declared"));
        }

        Ok(())
    }
}
