//! Field rules and transcoders.
//!
//! Rules for table `t` live in the data tree at `model.t`:
//!
//! ```json
//! {
//!   "name":  {"type": "string", "required": true, "regex": "^[a-z]+$"},
//!   "tags":  {"type": "csv", "default": []},
//!   "born":  {"type": "datetime"}
//! }
//! ```

use chrono::DateTime;
use regex::Regex;
use serde_json::{Map, Value};

use super::database::{Record, UID};
use crate::core::{Error, Result};
use crate::data::DataTree;
use crate::values::{is_truthy, to_plain_string};

/// Converts between the API representation and the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcoder {
    /// Any value, stored as a JSON string.
    Json,
    Bool,
    Int,
    Float,
    String,
    /// List stored as a comma-separated string.
    Csv,
    /// RFC 3339 timestamp string.
    Datetime,
}

impl Transcoder {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "json" => Self::Json,
            "bool" | "boolean" => Self::Bool,
            "int" | "integer" => Self::Int,
            "float" | "number" => Self::Float,
            "string" | "text" => Self::String,
            "csv" => Self::Csv,
            "datetime" => Self::Datetime,
            _ => return None,
        })
    }

    /// API value to stored value. Errors carry the validation reason.
    pub fn encode(&self, value: &Value) -> std::result::Result<Value, String> {
        match self {
            Self::Json => serde_json::to_string(value)
                .map(Value::String)
                .map_err(|e| e.to_string()),
            Self::Bool => Ok(Value::Bool(is_truthy(value))),
            Self::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Value::from(f as i64))
                    .ok_or_else(|| "must be an integer".to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| "must be an integer".to_string()),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                _ => Err("must be an integer".to_string()),
            },
            Self::Float => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(Value::from)
                    .ok_or_else(|| "must be a number".to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| "must be a number".to_string()),
                _ => Err("must be a number".to_string()),
            },
            Self::String => match value {
                Value::Array(_) | Value::Object(_) => Err("must be a string".to_string()),
                scalar => Ok(Value::String(to_plain_string(scalar))),
            },
            Self::Csv => match value {
                Value::Array(items) => Ok(Value::String(
                    items
                        .iter()
                        .map(to_plain_string)
                        .collect::<Vec<_>>()
                        .join(","),
                )),
                Value::String(_) => Ok(value.clone()),
                Value::Null => Ok(Value::String(String::new())),
                _ => Err("must be a list".to_string()),
            },
            Self::Datetime => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|_| value.clone())
                    .map_err(|_| "must be an RFC 3339 timestamp".to_string()),
                _ => Err("must be an RFC 3339 timestamp".to_string()),
            },
        }
    }

    /// Stored value to API value. Undecodable values pass through.
    pub fn decode(&self, value: &Value) -> Value {
        match (self, value) {
            (Self::Json, Value::String(s)) => {
                serde_json::from_str(s).unwrap_or_else(|_| value.clone())
            }
            (Self::Csv, Value::String(s)) if s.is_empty() => Value::Array(Vec::new()),
            (Self::Csv, Value::String(s)) => {
                Value::Array(s.split(',').map(Value::from).collect())
            }
            _ => value.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub transcoder: Option<Transcoder>,
    pub required: bool,
    pub regex: Option<Regex>,
    pub default: Option<Value>,
}

/// Ordered field rules for one table.
#[derive(Debug, Clone)]
pub struct Rules {
    table: String,
    fields: Vec<(String, FieldRule)>,
}

impl Rules {
    /// Parse a rules object. Unknown types and invalid regexes are errors.
    pub fn from_value(table: &str, value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Internal(format!(
                "rules for '{}' must be an object",
                table
            )));
        };

        let mut fields = Vec::with_capacity(map.len());
        for (field, spec) in map {
            let transcoder = match spec.get("type").and_then(Value::as_str) {
                Some(name) => Some(Transcoder::from_name(name).ok_or_else(|| {
                    Error::Internal(format!("{}.{}: unknown type '{}'", table, field, name))
                })?),
                None => None,
            };
            let regex = match spec.get("regex").and_then(Value::as_str) {
                Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                    Error::Internal(format!("{}.{}: invalid regex: {}", table, field, e))
                })?),
                None => None,
            };
            fields.push((
                field.clone(),
                FieldRule {
                    transcoder,
                    required: spec.get("required").is_some_and(is_truthy),
                    regex,
                    default: spec.get("default").cloned(),
                },
            ));
        }
        Ok(Self {
            table: table.to_string(),
            fields,
        })
    }

    /// Rules at `model.<table>` in the data tree; None for unknown tables.
    pub fn load(data: &DataTree, table: &str) -> Result<Option<Self>> {
        match data.get(&["model", table])? {
            Some(value) => Ok(Some(Self::from_value(table, &value)?)),
            None => Ok(None),
        }
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, rule)| rule)
    }

    /// Fill missing fields that have a default.
    pub fn apply_defaults(&self, record: &mut Record) {
        for (field, rule) in &self.fields {
            if let Some(default) = &rule.default {
                if record.get(field).map_or(true, Value::is_null) {
                    record.insert(field.clone(), default.clone());
                }
            }
        }
    }

    /// Check required fields and patterns, then transcode to the stored form.
    pub fn encode(&self, record: &Record) -> Result<Record> {
        self.validate(record)?;
        let mut encoded = Map::with_capacity(record.len());
        for (field, value) in record {
            if field == UID {
                encoded.insert(field.clone(), value.clone());
                continue;
            }
            let stored = match self.rule(field).and_then(|r| r.transcoder) {
                Some(transcoder) => transcoder.encode(value).map_err(|reason| Error::Validation {
                    field: field.clone(),
                    reason,
                })?,
                None => value.clone(),
            };
            encoded.insert(field.clone(), stored);
        }
        Ok(encoded)
    }

    pub fn validate(&self, record: &Record) -> Result<()> {
        for (field, rule) in &self.fields {
            let value = record.get(field).filter(|v| !v.is_null());
            let present = value.is_some_and(|v| !matches!(v, Value::String(s) if s.is_empty()));
            if rule.required && !present {
                return Err(Error::Validation {
                    field: field.clone(),
                    reason: "is required".to_string(),
                });
            }
            if let (Some(regex), Some(value)) = (&rule.regex, value) {
                if !regex.is_match(&to_plain_string(value)) {
                    return Err(Error::Validation {
                        field: field.clone(),
                        reason: format!("must match {}", regex.as_str()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stored form to API form.
    pub fn decode(&self, record: &Record) -> Record {
        record
            .iter()
            .map(|(field, value)| {
                let decoded = match self.rule(field).and_then(|r| r.transcoder) {
                    Some(transcoder) => transcoder.decode(value),
                    None => value.clone(),
                };
                (field.clone(), decoded)
            })
            .collect()
    }
}
