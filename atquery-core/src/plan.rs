//! Plan pieces shared by the collection and SQL evaluators.
//!
//! Everything in here is immutable once built and safe to share across threads;
//! per-call state lives in the summarizer, limiter and combiners instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AtError, AtResult};
use crate::expr::{Expression, Frame};

/// Sort direction of a what-field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn is_asc(&self) -> bool {
        matches!(self, SortDirection::Asc)
    }
}

/// Flags attached to a what-field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WhatFieldFlags {
    /// Computed (for grouping or sorting) but not part of the output
    pub omit: bool,
    /// Group key
    pub group: bool,
    /// Aggregated value (sum, min, max, count)
    pub aggregate: bool,
    pub sort: Option<SortDirection>,
}

impl WhatFieldFlags {
    pub const DEFAULT: WhatFieldFlags = WhatFieldFlags {
        omit: false,
        group: false,
        aggregate: false,
        sort: None,
    };

    pub fn group() -> Self {
        Self {
            group: true,
            ..Self::DEFAULT
        }
    }

    pub fn aggregate() -> Self {
        Self {
            aggregate: true,
            ..Self::DEFAULT
        }
    }

    pub fn sorted(direction: SortDirection) -> Self {
        Self {
            sort: Some(direction),
            ..Self::DEFAULT
        }
    }

    pub fn omitted(mut self) -> Self {
        self.omit = true;
        self
    }

    pub fn with_sort(mut self, direction: SortDirection) -> Self {
        self.sort = Some(direction);
        self
    }
}

/// Number of results an at-expression may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// `@`
    One,
    /// `@?`
    ZeroOrOne,
    /// `@*`
    ZeroOrMore,
    /// `@+`
    OneOrMore,
}

impl Cardinality {
    pub fn allows_zero(&self) -> bool {
        matches!(self, Cardinality::ZeroOrOne | Cardinality::ZeroOrMore)
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Cardinality::ZeroOrMore | Cardinality::OneOrMore)
    }

    pub fn matches(&self, count: usize) -> bool {
        !(count == 0 && !self.allows_zero() || count > 1 && !self.is_many())
    }

    pub fn check(&self, count: usize) -> AtResult<()> {
        if self.matches(count) {
            Ok(())
        } else {
            Err(AtError::CardinalityError {
                cardinality: *self,
                count,
            })
        }
    }

    /// Check the list size and turn it into the value the at-expression yields:
    /// the list itself for the many-kinds, otherwise the single item or null.
    pub fn wrap(&self, mut values: Vec<Value>) -> AtResult<Value> {
        self.check(values.len())?;
        if self.is_many() {
            Ok(Value::Array(values))
        } else {
            Ok(values.pop().unwrap_or(Value::Null))
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cardinality::One => "exactly one",
            Cardinality::ZeroOrOne => "zero or one",
            Cardinality::ZeroOrMore => "zero or more",
            Cardinality::OneOrMore => "one or more",
        };
        f.write_str(s)
    }
}

/// Limit and offset clauses, as expressions
#[derive(Debug, Clone, Default)]
pub struct AtExtras {
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

impl AtExtras {
    pub const NONE: AtExtras = AtExtras {
        limit: None,
        offset: None,
    };

    pub fn limit(limit: i64) -> Self {
        Self {
            limit: Some(Expression::literal(limit)),
            offset: None,
        }
    }

    pub fn offset(offset: i64) -> Self {
        Self {
            limit: None,
            offset: Some(Expression::literal(offset)),
        }
    }

    pub fn limit_offset(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(Expression::literal(limit)),
            offset: Some(Expression::literal(offset)),
        }
    }

    /// Evaluate both clauses once; the result is frozen for the whole call.
    pub fn evaluate(&self, frame: &Frame) -> AtResult<RtExtras> {
        let limit = Self::evaluate_clause(frame, self.limit.as_ref(), "limit")?;
        let offset = Self::evaluate_clause(frame, self.offset.as_ref(), "offset")?;
        Ok(RtExtras { limit, offset })
    }

    fn evaluate_clause(
        frame: &Frame,
        expr: Option<&Expression>,
        clause: &str,
    ) -> AtResult<Option<u64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let value = frame.evaluate(expr)?;
        match value.as_i64() {
            Some(n) if n < 0 => Err(AtError::eval(format!(
                "expr:at:{}:negative:{}",
                clause, n
            ))),
            Some(n) => Ok(Some(n as u64)),
            None => Err(AtError::eval(format!(
                "expr:at:{}:not_integer:{}",
                clause, value
            ))),
        }
    }
}

/// Limit and offset evaluated for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtExtras {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl RtExtras {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }
}

/// Turns the selected values of a result row into the produced value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDecoder {
    /// Exactly one selected value, passed through
    Simple,
    /// Positional tuple, as an array
    Tuple,
    /// Named fields, as an ordered object
    Struct(Vec<String>),
}

impl RowDecoder {
    /// Pick the decoder the way a compiler would: a single unnamed field passes
    /// through, anything else becomes a tuple (or a struct when every field is named).
    pub fn for_fields(names: &[Option<String>]) -> Self {
        if names.len() == 1 && names[0].is_none() {
            RowDecoder::Simple
        } else if !names.is_empty() && names.iter().all(|n| n.is_some()) {
            RowDecoder::Struct(names.iter().flatten().cloned().collect())
        } else {
            RowDecoder::Tuple
        }
    }

    pub fn decode(&self, mut values: Vec<Value>) -> AtResult<Value> {
        match self {
            RowDecoder::Simple => {
                if values.len() != 1 {
                    return Err(AtError::plan(format!(
                        "simple row decoder got {} values",
                        values.len()
                    )));
                }
                Ok(values.swap_remove(0))
            }
            RowDecoder::Tuple => Ok(Value::Array(values)),
            RowDecoder::Struct(names) => {
                if values.len() != names.len() {
                    return Err(AtError::plan(format!(
                        "struct row decoder got {} values for {} fields",
                        values.len(),
                        names.len()
                    )));
                }
                Ok(Value::Object(names.iter().cloned().zip(values).collect()))
            }
        }
    }
}

/// Configuration for query execution limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryLimits {
    /// Maximum number of source items a collection at-expression may scan (default: 1,000,000)
    pub max_scan_items: usize,
    /// Maximum number of rows a database at-expression may fetch (default: 1,000,000)
    pub max_result_rows: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_scan_items: 1_000_000,
            max_result_rows: 1_000_000,
        }
    }
}

impl QueryLimits {
    /// Limits suitable for request handlers that must stay small
    pub fn strict() -> Self {
        Self {
            max_scan_items: 10_000,
            max_result_rows: 1_000,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_scan_items: usize::MAX,
            max_result_rows: usize::MAX,
        }
    }
}
