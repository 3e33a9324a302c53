//! Record filtering for `where` clauses.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use urpc_core::RepositoryError;

/// A compiled `where` clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordFilter {
    clause: Map<String, Value>,
}

impl RecordFilter {
    /// Build a filter from the `where` option. `None` or `null` match everything.
    pub fn from_where(clause: Option<&Value>) -> Result<Self, RepositoryError> {
        match clause {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(map)) => Ok(Self { clause: map.clone() }),
            Some(other) => Err(RepositoryError::InvalidOptions(format!(
                "where must be an object, got {}",
                other
            ))),
        }
    }

    /// Returns true if the clause has no conditions.
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    /// Plain `field: value` equalities, used to seed records an upsert creates.
    pub fn equalities(&self) -> Map<String, Value> {
        self.clause
            .iter()
            .filter(|(field, value)| !field.starts_with('$') && !is_operator_object(value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Check a record against every condition.
    pub fn matches(&self, record: &Value) -> Result<bool, RepositoryError> {
        matches_clause(&self.clause, record)
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_clause(clause: &Map<String, Value>, record: &Value) -> Result<bool, RepositoryError> {
    for (field, condition) in clause {
        let matched = match field.as_str() {
            "$and" => sub_clauses(condition)?
                .iter()
                .try_fold(true, |acc, c| Ok::<_, RepositoryError>(acc && matches_clause(c, record)?))?,
            "$or" => sub_clauses(condition)?
                .iter()
                .try_fold(false, |acc, c| Ok::<_, RepositoryError>(acc || matches_clause(c, record)?))?,
            _ => {
                let actual = record.get(field).unwrap_or(&Value::Null);
                match condition {
                    Value::Object(ops) if is_operator_object(condition) => {
                        matches_operators(ops, actual)?
                    }
                    expected => values_equal(actual, expected),
                }
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_clauses(condition: &Value) -> Result<Vec<&Map<String, Value>>, RepositoryError> {
    condition
        .as_array()
        .ok_or_else(|| RepositoryError::InvalidOptions("$and/$or expects an array".into()))?
        .iter()
        .map(|c| {
            c.as_object()
                .ok_or_else(|| RepositoryError::InvalidOptions("$and/$or entries must be objects".into()))
        })
        .collect()
}

fn matches_operators(ops: &Map<String, Value>, actual: &Value) -> Result<bool, RepositoryError> {
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => values_equal(actual, operand),
            "$ne" => !values_equal(actual, operand),
            "$gt" => compare(actual, operand) == Some(Ordering::Greater),
            "$gte" => matches!(compare(actual, operand), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(actual, operand) == Some(Ordering::Less),
            "$lte" => matches!(compare(actual, operand), Some(Ordering::Less | Ordering::Equal)),
            "$in" => list_operand(op, operand)?.iter().any(|v| values_equal(actual, v)),
            "$nin" => !list_operand(op, operand)?.iter().any(|v| values_equal(actual, v)),
            "$like" => like(actual, operand),
            "$nlike" => !like(actual, operand),
            "$contains" => match actual {
                Value::String(s) => operand.as_str().map_or(false, |needle| s.contains(needle)),
                Value::Array(items) => items.iter().any(|v| values_equal(v, operand)),
                _ => false,
            },
            "$startsWith" => string_pair(actual, operand).map_or(false, |(s, p)| s.starts_with(p)),
            "$endsWith" => string_pair(actual, operand).map_or(false, |(s, p)| s.ends_with(p)),
            other => {
                return Err(RepositoryError::InvalidOptions(format!(
                    "unsupported operator {}",
                    other
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list_operand<'v>(op: &str, operand: &'v Value) -> Result<&'v Vec<Value>, RepositoryError> {
    operand
        .as_array()
        .ok_or_else(|| RepositoryError::InvalidOptions(format!("{} expects an array", op)))
}

fn string_pair<'v>(actual: &'v Value, operand: &'v Value) -> Option<(&'v str, &'v str)> {
    Some((actual.as_str()?, operand.as_str()?))
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two scalars of the same kind.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Case-insensitive SQL `LIKE`: `%` matches any run, `_` one character.
fn like(actual: &Value, pattern: &Value) -> bool {
    let (Some(text), Some(pattern)) = (actual.as_str(), pattern.as_str()) else {
        return false;
    };
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            _ => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && (*p == '_' || *p == text[j - 1]);
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}
