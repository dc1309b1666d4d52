//! The mapper: schema + raw input → typed output.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::var::{Kind, Vars};
use crate::Map;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// A single field that could not be mapped. `field` is a dotted path for
/// nested maps and carries an `[index]` suffix for array elements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{field} is required")]
    Missing { field: String },

    #[error("{field} expects {expected}")]
    Invalid { field: String, expected: &'static str },

    #[error("{field} is not declared")]
    Unexpected { field: String },
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            FieldError::Missing { field }
            | FieldError::Invalid { field, .. }
            | FieldError::Unexpected { field } => field,
        }
    }
}

/// Outcome of a [`map`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    errors: Vec<FieldError>,
}

impl Mapping {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fail(&self) -> bool {
        !self.ok()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("ok");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Options {
    nullable: bool,
    strict: bool,
    tz: FixedOffset,
}

/// Map `input` through `schema` into `output`.
///
/// - `nullable`: tolerate missing required arguments.
/// - `strict`: reject keys the schema does not declare (otherwise they are dropped).
/// - `tz`: offset used to read timestamps that carry no offset of their own.
///
/// Fields that map cleanly are written to `output` even when others fail.
pub fn map(
    schema: &Vars,
    input: &Map,
    output: &mut Map,
    nullable: bool,
    strict: bool,
    tz: FixedOffset,
) -> Mapping {
    let opts = Options {
        nullable,
        strict,
        tz,
    };
    let mut errors = Vec::new();
    map_into(schema, input, output, opts, "", &mut errors);
    Mapping { errors }
}

fn map_into(
    schema: &Vars,
    input: &Map,
    output: &mut Map,
    opts: Options,
    prefix: &str,
    errors: &mut Vec<FieldError>,
) {
    for (name, var) in schema.iter() {
        let path = join(prefix, name);
        match input.get(name) {
            None | Some(Value::Null) => {
                if let Some(default) = &var.default {
                    output.insert(name.to_string(), default.clone());
                } else if var.required && !opts.nullable {
                    errors.push(FieldError::Missing { field: path });
                }
            }
            Some(value) => {
                if let Some(coerced) = coerce(&var.kind, value, opts, &path, errors) {
                    output.insert(name.to_string(), coerced);
                }
            }
        }
    }

    if opts.strict {
        for key in input.keys() {
            if !schema.contains(key) {
                errors.push(FieldError::Unexpected {
                    field: join(prefix, key),
                });
            }
        }
    }
}

fn coerce(
    kind: &Kind,
    value: &Value,
    opts: Options,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    let coerced = match kind {
        Kind::Any => Some(value.clone()),
        Kind::String => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        Kind::Int => as_int(value).map(Value::from),
        Kind::Float => as_float(value)
            .and_then(Number::from_f64)
            .map(Value::Number),
        Kind::Bool => as_bool(value).map(Value::Bool),
        Kind::Timestamp => as_timestamp(value, opts.tz).map(|ts| Value::String(ts.to_rfc3339())),
        Kind::Array { of } => {
            let Value::Array(items) = value else {
                errors.push(invalid(path, kind));
                return None;
            };
            let before = errors.len();
            let mapped: Vec<Value> = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| coerce(of, item, opts, &format!("{path}[{i}]"), errors))
                .collect();
            // Element errors are already recorded.
            return (errors.len() == before).then_some(Value::Array(mapped));
        }
        Kind::Map { fields } => {
            let Value::Object(inner) = value else {
                errors.push(invalid(path, kind));
                return None;
            };
            let mut out = Map::new();
            let before = errors.len();
            map_into(fields, inner, &mut out, opts, path, errors);
            return (errors.len() == before).then_some(Value::Object(out));
        }
    };

    if coerced.is_none() {
        errors.push(invalid(path, kind));
    }
    coerced
}

fn invalid(path: &str, kind: &Kind) -> FieldError {
    FieldError::Invalid {
        field: path.to_string(),
        expected: kind.describe(),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_timestamp(value: &Value, tz: FixedOffset) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&tz))
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&tz));
            }
            for format in NAIVE_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return tz.from_local_datetime(&naive).single();
                }
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
        }
        _ => None,
    }
}
