use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::FilterError;
use super::filter_where::compare_values;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        match order {
            Value::Null => Ok(vec![]),
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                // Expect array of strings like ["joinDate desc", "name asc"]
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)?),
                        other => return Err(FilterError::InvalidOrder(format!("expected string, got {}", other))),
                    }
                }
                Ok(out)
            }
            Value::Object(obj) => {
                // { "joinDate": "desc", "name": "asc" }
                let mut out = Vec::new();
                for (k, v) in obj {
                    let dir = v.as_str().unwrap_or("asc");
                    out.push(FilterOrderInfo { column: k.clone(), sort: Self::parse_direction(dir)? });
                }
                Ok(out)
            }
            other => Err(FilterError::InvalidOrder(format!("unsupported order value {}", other))),
        }
    }

    fn parse_direction(dir: &str) -> Result<SortDirection, FilterError> {
        if dir.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else if dir.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else {
            Err(FilterError::InvalidOrder(format!("unknown direction '{}'", dir)))
        }
    }

    fn parse_order_string(s: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        // split on commas, then each token into column and direction
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                // "-field" is shorthand for descending
                let (col, default_dir) = match col.strip_prefix('-') {
                    Some(stripped) => (stripped, "desc"),
                    None => (col, "asc"),
                };
                let sort = Self::parse_direction(it.next().unwrap_or(default_dir))?;
                out.push(FilterOrderInfo { column: col.to_string(), sort });
            }
        }
        Ok(out)
    }

    /// Stable sort; rows missing a value sort last regardless of direction
    pub fn sort(rows: &mut [Map<String, Value>], infos: &[FilterOrderInfo]) {
        if infos.is_empty() { return; }
        rows.sort_by(|a, b| {
            for info in infos {
                let ord = Self::compare_column(a.get(&info.column), b.get(&info.column), info.sort);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    fn compare_column(a: Option<&Value>, b: Option<&Value>, sort: SortDirection) -> Ordering {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                match sort {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        }
    }
}
