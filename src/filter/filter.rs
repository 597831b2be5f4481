use serde::Serialize;
use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{Condition, FilterWhere};
use super::types::{FilterData, FilterOrderInfo};

/// Compiled listing query: WHERE, ORDER, then LIMIT/OFFSET
pub struct Filter {
    condition: Condition,
    order: Vec<FilterOrderInfo>,
    limit: usize,
    offset: usize,
}

/// One page of filtered rows together with the pre-pagination count
#[derive(Debug, Serialize)]
pub struct FilterPage {
    pub items: Vec<Map<String, Value>>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl Filter {
    pub fn new(data: &FilterData, default_limit: usize, max_limit: usize) -> Result<Self, FilterError> {
        let condition = match &data.where_clause {
            Some(w) => FilterWhere::parse(w)?,
            None => Condition::And(vec![]),
        };
        let order = match &data.order {
            Some(o) => FilterOrder::validate_and_parse(o)?,
            None => vec![],
        };
        let limit = data.limit.unwrap_or(default_limit);
        if limit == 0 {
            return Err(FilterError::InvalidLimit("limit must be positive".to_string()));
        }

        Ok(Self {
            condition,
            order,
            limit: limit.min(max_limit),
            offset: data.offset.unwrap_or(0),
        })
    }

    pub fn apply(&self, rows: Vec<Map<String, Value>>) -> FilterPage {
        let mut matched: Vec<Map<String, Value>> =
            rows.into_iter().filter(|r| self.condition.matches(r)).collect();
        FilterOrder::sort(&mut matched, &self.order);

        let total = matched.len();
        let items = matched.into_iter().skip(self.offset).take(self.limit).collect();
        FilterPage { items, total, limit: self.limit, offset: self.offset }
    }
}
