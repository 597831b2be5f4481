use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::formula::{self, decimal_to_exact_json, decimal_to_json, value_as_decimal};
use super::{FieldErrors, FieldType, ModuleField, SchemaError};

/// Stored values of one row, keyed by field key
pub type RowValues = Map<String, Value>;

/// Attribute carrying the row identity in every projected row
pub const ROW_KEY: &str = "key";

const REQUIRED_MESSAGE: &str = "This field is required";
const NUMBER_MESSAGE: &str = "Expected a number";
const RANGE_MESSAGE: &str = "Number is outside the supported range (about ±7.9e28)";
const PRECISION_MESSAGE: &str = "Number has more precision than can be stored (15 significant digits)";

/// Validate and normalize client input against the module fields.
///
/// With `partial` set (PATCH), required checks are skipped and explicit
/// `null`s are kept so [`apply_patch`] can clear those values.
pub fn normalize_row(fields: &[ModuleField], input: &Value, partial: bool) -> Result<RowValues, SchemaError> {
    let object = input.as_object().ok_or_else(|| {
        SchemaError::invalid("Row data must be a JSON object", FieldErrors::new())
    })?;

    let by_key: HashMap<&str, &ModuleField> = fields.iter().map(|f| (f.key.as_str(), f)).collect();
    let mut errors = FieldErrors::new();
    let mut out = RowValues::new();

    for (key, value) in object {
        if key == ROW_KEY {
            continue;
        }
        let Some(field) = by_key.get(key.as_str()) else {
            errors.insert(key.clone(), "Unknown field".to_string());
            continue;
        };
        if field.field_type == FieldType::Compute {
            continue;
        }
        match normalize_value(field, value) {
            Ok(Some(v)) => {
                out.insert(key.clone(), v);
            }
            Ok(None) => {
                if partial {
                    out.insert(key.clone(), Value::Null);
                }
            }
            Err(msg) => {
                errors.insert(key.clone(), msg);
            }
        }
    }

    if !partial {
        check_required(fields, &out, &mut errors);
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(SchemaError::invalid("Invalid row data", errors))
    }
}

/// Apply normalized PATCH changes on top of stored values, then re-check
/// required fields
pub fn apply_patch(fields: &[ModuleField], existing: &RowValues, changes: &RowValues) -> Result<RowValues, SchemaError> {
    let mut merged = existing.clone();
    for (key, value) in changes {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }

    let mut errors = FieldErrors::new();
    check_required(fields, &merged, &mut errors);
    if errors.is_empty() {
        Ok(merged)
    } else {
        Err(SchemaError::invalid("Invalid row data", errors))
    }
}

fn check_required(fields: &[ModuleField], values: &RowValues, errors: &mut FieldErrors) {
    for field in fields.iter().filter(|f| f.required && f.field_type != FieldType::Compute) {
        let missing = match values.get(&field.key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            errors.entry(field.key.clone()).or_insert_with(|| REQUIRED_MESSAGE.to_string());
        }
    }
}

/// `Ok(None)` means "no value"
fn normalize_value(field: &ModuleField, value: &Value) -> Result<Option<Value>, String> {
    if value.is_null() {
        return Ok(None);
    }

    match field.field_type {
        FieldType::String => match value {
            Value::String(s) => Ok(Some(Value::String(s.clone()))),
            Value::Number(n) => Ok(Some(Value::String(n.to_string()))),
            Value::Bool(b) => Ok(Some(Value::String(b.to_string()))),
            _ => Err("Expected text".to_string()),
        },
        FieldType::Number => {
            if is_blank(value) {
                return Ok(None);
            }
            let Some(decimal) = value_as_decimal(value) else {
                let message = if looks_numeric(value) { RANGE_MESSAGE } else { NUMBER_MESSAGE };
                return Err(message.to_string());
            };
            decimal_to_exact_json(decimal)
                .map(Some)
                .ok_or_else(|| PRECISION_MESSAGE.to_string())
        }
        FieldType::Date => {
            if is_blank(value) {
                return Ok(None);
            }
            parse_date_millis(value)
                .map(|ms| Some(Value::from(ms)))
                .ok_or_else(|| "Expected a date (epoch milliseconds, RFC 3339 or YYYY-MM-DD)".to_string())
        }
        FieldType::Select => {
            if is_blank(value) {
                return Ok(None);
            }
            let choice = value.as_str().ok_or_else(|| "Expected one of the options".to_string())?;
            let options = field.options.as_deref().unwrap_or(&[]);
            if options.iter().any(|o| o == choice) {
                Ok(Some(Value::String(choice.to_string())))
            } else {
                Err(format!("'{}' is not one of: {}", choice, options.join(", ")))
            }
        }
        FieldType::Compute => Ok(None),
    }
}

/// A number Decimal cannot hold, such as `1e300`
fn looks_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => {
            let s = s.trim();
            s.bytes().any(|b| b.is_ascii_digit()) && s.parse::<f64>().is_ok_and(|f| !f.is_nan())
        }
        _ => false,
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

/// Dates are stored as epoch milliseconds
pub fn parse_date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| Utc.from_utc_datetime(&ndt).timestamp_millis())
        }
        _ => None,
    }
}

/// Build the client view of a row: `key`, stored values in field order, then
/// compute values. Values for keys no longer in the schema are dropped.
pub fn project_row(fields: &[ModuleField], key: &str, values: &RowValues) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(ROW_KEY.to_string(), Value::String(key.to_string()));

    let mut evaluator = Evaluator::new(fields, values);
    for field in fields {
        if field.field_type == FieldType::Compute {
            let computed = evaluator.compute(field, &mut Vec::new());
            out.insert(field.key.clone(), computed.map(decimal_to_json).unwrap_or(Value::Null));
        } else if let Some(v) = values.get(&field.key) {
            out.insert(field.key.clone(), v.clone());
        }
    }
    out
}

/// Resolves compute fields for one row, memoizing each result
struct Evaluator<'a> {
    by_alias: HashMap<&'a str, &'a ModuleField>,
    values: &'a RowValues,
    cache: HashMap<String, Option<Decimal>>,
}

impl<'a> Evaluator<'a> {
    fn new(fields: &'a [ModuleField], values: &'a RowValues) -> Self {
        let by_alias = fields
            .iter()
            .filter_map(|f| f.alias.as_deref().map(|a| (a, f)))
            .collect();
        Self { by_alias, values, cache: HashMap::new() }
    }

    fn field_value(&mut self, field: &'a ModuleField, stack: &mut Vec<String>) -> Option<Decimal> {
        match field.field_type {
            FieldType::Compute => self.compute(field, stack),
            _ => self.values.get(&field.key).and_then(value_as_decimal),
        }
    }

    fn compute(&mut self, field: &'a ModuleField, stack: &mut Vec<String>) -> Option<Decimal> {
        if let Some(cached) = self.cache.get(&field.key) {
            return *cached;
        }
        if stack.contains(&field.key) {
            return None;
        }

        let expr = field.formula.as_deref().and_then(|f| formula::parse(f).ok())?;
        stack.push(field.key.clone());
        let result = expr.evaluate(&mut |alias| {
            let target = self.by_alias.get(alias).copied()?;
            self.field_value(target, stack)
        });
        stack.pop();

        self.cache.insert(field.key.clone(), result);
        result
    }
}
