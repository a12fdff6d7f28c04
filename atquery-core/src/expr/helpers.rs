//! Value helpers shared by both evaluators.
//!
//! This module contains the host-side value semantics:
//! - values_equal: equality used by grouping and constant checks
//! - compare_values: total ordering used by sorting and min/max
//! - evaluate_binary_op / evaluate_unary_op: operator semantics
//! - to_bool: truthiness of filter results
//! - iterate_source: iterable adapter for collection sources

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::{BinaryOperator, UnaryOperator};
use crate::error::{AtError, AtResult};

/// Extract a field from an object value, `Value::Null` when absent.
#[inline]
pub fn get_field_value(value: &Value, field: &str) -> Value {
    value.get(field).cloned().unwrap_or(Value::Null)
}

/// Compare two values for equality.
///
/// Numbers are compared numerically, so `1` equals `1.0`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, x)| b.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// Compare two values for ordering.
///
/// Null < Bool < Number < String < Array < Object. Arrays compare
/// lexicographically, so tuple keys sort field by field.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
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

/// Convert a value to boolean.
///
/// - Bool: returns the value
/// - Null: returns false
/// - Number: returns false if 0, true otherwise
/// - String, Array, Object: returns false if empty, true otherwise
#[inline]
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Create a number value from an f64, falling back to 0 for NaN/infinity.
#[inline]
pub fn number_from_f64(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

/// Safely compile a regex with size limits.
pub fn safe_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if pattern.len() > 1000 {
        return Err(regex::Error::Syntax(
            "Pattern too long (max 1000 chars)".to_string(),
        ));
    }
    Regex::new(pattern)
}

/// Translate a SQL LIKE pattern (`%`, `_`) into an anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut regex_pattern = String::with_capacity(pattern.len() + 2);
    regex_pattern.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            '^' | '$' | '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                regex_pattern.push('\\');
                regex_pattern.push(c);
            }
            _ => regex_pattern.push(c),
        }
    }
    regex_pattern.push('$');
    regex_pattern
}

fn arithmetic(
    left: &Value,
    right: &Value,
    op: BinaryOperator,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> AtResult<Value> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return int_op(a, b).map(Value::from).ok_or_else(|| {
            AtError::eval(format!(
                "Integer overflow: {} {} {}",
                a,
                op.symbol(),
                b
            ))
        });
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(number_from_f64(float_op(a, b))),
        _ => Err(AtError::eval(format!(
            "Operator '{}' needs numbers, got {} and {}",
            op.symbol(),
            left,
            right
        ))),
    }
}

fn check_divisor(right: &Value) -> AtResult<()> {
    if right.as_f64() == Some(0.0) {
        return Err(AtError::eval("Division by zero"));
    }
    Ok(())
}

/// Evaluate a binary operation on two values.
///
/// `And`/`Or` are evaluated eagerly here; the frame short-circuits them before
/// reaching this function.
pub fn evaluate_binary_op(left: &Value, op: BinaryOperator, right: &Value) -> AtResult<Value> {
    match op {
        BinaryOperator::Equal => Ok(Value::Bool(values_equal(left, right))),
        BinaryOperator::NotEqual => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOperator::LessThan => Ok(Value::Bool(compare_values(left, right) == Ordering::Less)),
        BinaryOperator::LessThanOrEqual => Ok(Value::Bool(
            compare_values(left, right) != Ordering::Greater,
        )),
        BinaryOperator::GreaterThan => Ok(Value::Bool(
            compare_values(left, right) == Ordering::Greater,
        )),
        BinaryOperator::GreaterThanOrEqual => {
            Ok(Value::Bool(compare_values(left, right) != Ordering::Less))
        }

        BinaryOperator::Add => {
            if let (Some(a), Some(b)) = (left.as_str(), right.as_str()) {
                return Ok(Value::String(format!("{}{}", a, b)));
            }
            arithmetic(left, right, op, i64::checked_add, |a, b| a + b)
        }
        BinaryOperator::Subtract => arithmetic(left, right, op, i64::checked_sub, |a, b| a - b),
        BinaryOperator::Multiply => arithmetic(left, right, op, i64::checked_mul, |a, b| a * b),
        BinaryOperator::Divide => {
            check_divisor(right)?;
            arithmetic(left, right, op, i64::checked_div, |a, b| a / b)
        }
        BinaryOperator::Modulus => {
            check_divisor(right)?;
            arithmetic(left, right, op, i64::checked_rem, |a, b| a % b)
        }

        BinaryOperator::And => Ok(Value::Bool(to_bool(left) && to_bool(right))),
        BinaryOperator::Or => Ok(Value::Bool(to_bool(left) || to_bool(right))),

        BinaryOperator::Like => {
            let s = left.as_str().unwrap_or("");
            let pattern = right.as_str().unwrap_or("");
            match safe_regex(&like_to_regex(pattern)) {
                Ok(re) => Ok(Value::Bool(re.is_match(s))),
                Err(_) => Ok(Value::Bool(false)),
            }
        }

        BinaryOperator::In => match right {
            Value::Array(arr) => Ok(Value::Bool(arr.iter().any(|v| values_equal(left, v)))),
            Value::Object(obj) => Ok(Value::Bool(
                left.as_str().map(|k| obj.contains_key(k)).unwrap_or(false),
            )),
            _ => Ok(Value::Bool(false)),
        },
    }
}

/// Evaluate a unary operation on a value.
pub fn evaluate_unary_op(op: UnaryOperator, operand: &Value) -> AtResult<Value> {
    match op {
        UnaryOperator::Not => Ok(Value::Bool(!to_bool(operand))),
        UnaryOperator::Negate => {
            if let Some(n) = operand.as_i64() {
                n.checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| AtError::eval(format!("Integer overflow: -{}", n)))
            } else if let Some(n) = operand.as_f64() {
                Ok(number_from_f64(-n))
            } else {
                Err(AtError::eval("Cannot negate non-number"))
            }
        }
    }
}

/// Iterable adapter over a collection source value.
///
/// Lists iterate their elements; maps iterate `[key, value]` pairs in insertion order.
pub fn iterate_source(value: Value) -> AtResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
            .collect()),
        other => Err(AtError::eval(format!(
            "At-expression source must be a list or a map, got {}",
            other
        ))),
    }
}
