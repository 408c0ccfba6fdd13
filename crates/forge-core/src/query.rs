//! Query constraints and their in-process evaluation.
//!
//! Constraints are serialized into query cache keys, so their serde form is
//! part of the key format.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "in")]
    In,
}

/// Sort direction of an `orderBy` clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One clause of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryConstraint {
    Where {
        field: String,
        op: FilterOp,
        value: Value,
    },
    OrderBy {
        field: String,
        #[serde(default)]
        direction: Direction,
    },
    Limit {
        limit: usize,
    },
}

impl QueryConstraint {
    pub fn filter(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        QueryConstraint::Where {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn order_by(field: impl Into<String>, direction: Direction) -> Self {
        QueryConstraint::OrderBy {
            field: field.into(),
            direction,
        }
    }

    pub fn limit(limit: usize) -> Self {
        QueryConstraint::Limit { limit }
    }
}

/// Evaluate `constraints` over a collection's documents.
///
/// Filters apply first, then orderings in the order given, then the
/// smallest limit. Documents missing a filtered or ordered field are
/// excluded. Ties fall back to document id.
pub fn apply_constraints(
    documents: impl IntoIterator<Item = Document>,
    constraints: &[QueryConstraint],
) -> Vec<Document> {
    let mut orderings = Vec::new();
    let mut limit: Option<usize> = None;
    let mut filters = Vec::new();

    for constraint in constraints {
        match constraint {
            QueryConstraint::Where { field, op, value } => filters.push((field, *op, value)),
            QueryConstraint::OrderBy { field, direction } => orderings.push((field, *direction)),
            QueryConstraint::Limit { limit: n } => {
                limit = Some(limit.map_or(*n, |current| current.min(*n)));
            }
        }
    }

    let mut results: Vec<Document> = documents
        .into_iter()
        .filter(|doc| {
            filters.iter().all(|(field, op, value)| {
                doc.field(field)
                    .is_some_and(|actual| matches_filter(actual, *op, value))
            })
        })
        .filter(|doc| orderings.iter().all(|(field, _)| doc.field(field).is_some()))
        .collect();

    results.sort_by(|a, b| {
        for (field, direction) in &orderings {
            let ordering = match (a.field(field), b.field(field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                _ => Ordering::Equal,
            };
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });

    if let Some(limit) = limit {
        results.truncate(limit);
    }
    results
}

fn matches_filter(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    match op {
        FilterOp::Equal => same_type(actual, expected) && compare_values(actual, expected).is_eq(),
        FilterOp::NotEqual => {
            !(same_type(actual, expected) && compare_values(actual, expected).is_eq())
        }
        FilterOp::LessThan => ordered(actual, expected).is_some_and(Ordering::is_lt),
        FilterOp::LessThanOrEqual => ordered(actual, expected).is_some_and(Ordering::is_le),
        FilterOp::GreaterThan => ordered(actual, expected).is_some_and(Ordering::is_gt),
        FilterOp::GreaterThanOrEqual => ordered(actual, expected).is_some_and(Ordering::is_ge),
        FilterOp::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, expected))),
        FilterOp::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|option| values_equal(actual, option))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    same_type(a, b) && compare_values(a, b).is_eq()
}

/// Range comparisons only hold between values of the same type.
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    same_type(a, b).then(|| compare_values(a, b))
}

fn same_type(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type first, then by value.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens() -> Vec<Document> {
        vec![
            Document::new("t1", json!({ "symbol": "AAA", "supply": 100, "tags": ["meme"] })),
            Document::new("t2", json!({ "symbol": "BBB", "supply": 5000, "tags": ["defi", "stake"] })),
            Document::new("t3", json!({ "symbol": "CCC", "supply": 250.5 })),
            Document::new("t4", json!({ "symbol": "DDD" })),
        ]
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_no_constraints_orders_by_id() {
        let mut docs = tokens();
        docs.reverse();
        let result = apply_constraints(docs, &[]);
        assert_eq!(ids(&result), vec!["t1", "t2", "t3", "t4"]);
    }

    #[test]
    fn test_range_filter_skips_missing_fields() {
        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::filter("supply", FilterOp::GreaterThanOrEqual, json!(200))],
        );
        assert_eq!(ids(&result), vec!["t2", "t3"]);
    }

    #[test]
    fn test_equality_is_type_strict() {
        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::filter("supply", FilterOp::Equal, json!("100"))],
        );
        assert!(result.is_empty());

        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::filter("supply", FilterOp::Equal, json!(100.0))],
        );
        assert_eq!(ids(&result), vec!["t1"]);
    }

    #[test]
    fn test_array_contains_and_in() {
        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::filter("tags", FilterOp::ArrayContains, json!("stake"))],
        );
        assert_eq!(ids(&result), vec!["t2"]);

        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::filter("symbol", FilterOp::In, json!(["AAA", "DDD"]))],
        );
        assert_eq!(ids(&result), vec!["t1", "t4"]);
    }

    #[test]
    fn test_order_by_desc_with_limit() {
        let result = apply_constraints(
            tokens(),
            &[
                QueryConstraint::order_by("supply", Direction::Desc),
                QueryConstraint::limit(2),
            ],
        );
        assert_eq!(ids(&result), vec!["t2", "t3"]);
    }

    #[test]
    fn test_smallest_limit_wins() {
        let result = apply_constraints(
            tokens(),
            &[QueryConstraint::limit(3), QueryConstraint::limit(1)],
        );
        assert_eq!(ids(&result), vec!["t1"]);
    }

    #[test]
    fn test_constraint_serde_shape() {
        let constraint = QueryConstraint::filter("owner", FilterOp::ArrayContains, json!("0x1"));
        let json = serde_json::to_value(&constraint).unwrap();
        assert_eq!(
            json,
            json!({ "type": "where", "field": "owner", "op": "array-contains", "value": "0x1" })
        );

        let parsed: QueryConstraint =
            serde_json::from_value(json!({ "type": "orderBy", "field": "supply" })).unwrap();
        assert_eq!(parsed, QueryConstraint::order_by("supply", Direction::Asc));
    }
}
