use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereInfo};
use crate::schema::formula::value_as_decimal;

/// Parsed WHERE tree, evaluated against projected rows
#[derive(Debug, Clone)]
pub enum Condition {
    Field(FilterWhereInfo),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

pub struct FilterWhere;

impl FilterWhere {
    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    pub fn parse(where_data: &Value) -> Result<Condition, FilterError> {
        Self::validate(where_data)?;
        let Value::Object(obj) = where_data else {
            return Ok(Condition::And(vec![]));
        };

        let mut conditions = Vec::new();
        for (key, value) in obj {
            if key.starts_with('$') {
                conditions.push(Self::parse_logical_operator(key, value)?);
            } else {
                conditions.extend(Self::parse_field_condition(key, value)?);
            }
        }
        Ok(Condition::And(conditions))
    }

    fn parse_logical_operator(op: &str, value: &Value) -> Result<Condition, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let parts = arr.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "$and" { Condition::And(parts) } else { Condition::Or(parts) })
            }
            "$not" => Ok(Condition::Not(Box::new(Self::parse(value)?))),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Condition>, FilterError> {
        // { field: { $op: data, ... } } or shorthand { field: data }
        let ops = match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => ops,
            _ => {
                return Ok(vec![Condition::Field(FilterWhereInfo {
                    column: field.to_string(),
                    operator: FilterOp::Eq,
                    data: value.clone(),
                })])
            }
        };

        let mut out = Vec::new();
        for (op, data) in ops {
            let operator = FilterOp::parse(op).ok_or_else(|| FilterError::UnsupportedOperator(op.clone()))?;
            match operator {
                FilterOp::In | FilterOp::NIn if !data.is_array() => {
                    return Err(FilterError::InvalidOperatorData(format!("{} requires array", op)));
                }
                FilterOp::Like | FilterOp::ILike if !data.is_string() => {
                    return Err(FilterError::InvalidOperatorData(format!("{} requires string pattern", op)));
                }
                FilterOp::Exists if !data.is_boolean() => {
                    return Err(FilterError::InvalidOperatorData("$exists requires boolean".to_string()));
                }
                _ => {}
            }
            out.push(Condition::Field(FilterWhereInfo {
                column: field.to_string(),
                operator,
                data: data.clone(),
            }));
        }
        Ok(out)
    }
}

impl Condition {
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Condition::And(parts) => parts.iter().all(|c| c.matches(row)),
            Condition::Or(parts) => parts.iter().any(|c| c.matches(row)),
            Condition::Not(inner) => !inner.matches(row),
            Condition::Field(info) => Self::field_matches(info, row.get(&info.column)),
        }
    }

    fn field_matches(info: &FilterWhereInfo, actual: Option<&Value>) -> bool {
        let actual = actual.filter(|v| !v.is_null());
        match info.operator {
            FilterOp::Exists => actual.is_some() == info.data.as_bool().unwrap_or(true),
            FilterOp::Eq => match actual {
                None => info.data.is_null(),
                Some(v) => values_equal(v, &info.data),
            },
            FilterOp::Ne => match actual {
                None => !info.data.is_null(),
                Some(v) => !values_equal(v, &info.data),
            },
            FilterOp::Gt => compare(actual, &info.data) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(compare(actual, &info.data), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => compare(actual, &info.data) == Some(Ordering::Less),
            FilterOp::Lte => matches!(compare(actual, &info.data), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::In => actual.map_or(false, |v| in_list(v, &info.data)),
            FilterOp::NIn => actual.map_or(true, |v| !in_list(v, &info.data)),
            FilterOp::Like => like(actual, &info.data, false),
            FilterOp::ILike => like(actual, &info.data, true),
        }
    }
}

/// Both sides as decimals, but only when at least one is a JSON number;
/// two strings always compare as text
fn as_numbers(a: &Value, b: &Value) -> Option<(Decimal, Decimal)> {
    if !a.is_number() && !b.is_number() {
        return None;
    }
    Some((value_as_decimal(a)?, value_as_decimal(b)?))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    as_numbers(a, b).is_some_and(|(x, y)| x == y)
}

/// Numeric when one side is a number and both read as numbers, otherwise
/// string order
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let Some((x, y)) = as_numbers(a, b) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    compare_values(actual?, expected)
}

fn in_list(actual: &Value, list: &Value) -> bool {
    list.as_array()
        .map_or(false, |items| items.iter().any(|item| values_equal(actual, item)))
}

fn like(actual: Option<&Value>, pattern: &Value, case_insensitive: bool) -> bool {
    let (Some(actual), Some(pattern)) = (actual, pattern.as_str()) else {
        return false;
    };
    let text = match actual {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if case_insensitive {
        like_match(&text.to_lowercase(), &pattern.to_lowercase())
    } else {
        like_match(&text, pattern)
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn shorthand_equality_and_operators() {
        let r = row(json!({"dept": "技术部", "level": 5}));
        assert!(FilterWhere::parse(&json!({"dept": "技术部"})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"level": {"$gte": 5, "$lt": 6}})).unwrap().matches(&r));
        assert!(!FilterWhere::parse(&json!({"level": {"$gt": 5}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"level": "5"})).unwrap().matches(&r));
    }

    #[test]
    fn text_values_never_compare_as_numbers() {
        let r = row(json!({"code": "01", "label": "10"}));
        assert!(!FilterWhere::parse(&json!({"code": "1"})).unwrap().matches(&r));
        assert!(!FilterWhere::parse(&json!({"code": {"$in": ["1", "1.0"]}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"code": {"$ne": "1"}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"code": "01"})).unwrap().matches(&r));
        // "10" < "9" as text
        assert!(FilterWhere::parse(&json!({"label": {"$lt": "9"}})).unwrap().matches(&r));
        // a numeric operand still coerces
        assert!(FilterWhere::parse(&json!({"code": 1})).unwrap().matches(&r));
    }

    #[test]
    fn logical_operators() {
        let r = row(json!({"dept": "市场部", "level": 3}));
        let cond = FilterWhere::parse(&json!({"$or": [{"dept": "技术部"}, {"level": {"$in": [1, 3]}}]})).unwrap();
        assert!(cond.matches(&r));
        let cond = FilterWhere::parse(&json!({"$not": {"dept": "市场部"}})).unwrap();
        assert!(!cond.matches(&r));
    }

    #[test]
    fn like_and_exists() {
        let r = row(json!({"name": "Zhang San", "joinDate": null}));
        assert!(FilterWhere::parse(&json!({"name": {"$like": "Zhang%"}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"name": {"$ilike": "%SAN"}})).unwrap().matches(&r));
        assert!(!FilterWhere::parse(&json!({"name": {"$like": "zhang%"}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"joinDate": {"$exists": false}})).unwrap().matches(&r));
        assert!(FilterWhere::parse(&json!({"name": {"$like": "Zh_ng San"}})).unwrap().matches(&r));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            FilterWhere::parse(&json!({"a": {"$regex": "x"}})),
            Err(FilterError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            FilterWhere::parse(&json!({"a": {"$in": 3}})),
            Err(FilterError::InvalidOperatorData(_))
        ));
        assert!(FilterWhere::parse(&json!("raw sql")).is_err());
    }
}
