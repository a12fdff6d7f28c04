//! Summarization: grouping and per-field aggregation of collection rows.
//!
//! A `Summarizer` is created per evaluation call, fed every row that passed the
//! filter, and consumed once to produce the summarized rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::error::{AtError, AtResult};
use crate::expr::{compare_values, evaluate_binary_op, values_equal, BinaryOperator};

/// Grouping discipline of an at-expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summarization {
    /// One row per passing item
    None,
    /// Exactly one implicit group, even over an empty source
    GroupAll,
    /// One group per distinct key tuple, in first-seen order
    GroupBy(Vec<usize>),
}

impl Summarization {
    pub fn is_none(&self) -> bool {
        matches!(self, Summarization::None)
    }
}

/// Which value of a group wins for `PickExtreme`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Min,
    Max,
}

impl Extreme {
    /// True when `candidate` strictly beats `current`; ties keep the earlier value.
    fn beats(&self, candidate: &Value, current: &Value) -> bool {
        let ord = compare_values(candidate, current);
        match self {
            Extreme::Min => ord == Ordering::Less,
            Extreme::Max => ord == Ordering::Greater,
        }
    }
}

/// Per-field aggregation policy
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAggregation {
    /// No aggregator: at most one row may contribute
    None,
    /// Every contributing value must equal the first one
    CheckConstant,
    /// Left fold with an associative operator; an empty group yields `zero`
    Combine { op: BinaryOperator, zero: Value },
    PickExtreme(Extreme),
}

impl FieldAggregation {
    pub fn sum() -> Self {
        FieldAggregation::Combine {
            op: BinaryOperator::Add,
            zero: Value::from(0),
        }
    }

    pub fn min() -> Self {
        FieldAggregation::PickExtreme(Extreme::Min)
    }

    pub fn max() -> Self {
        FieldAggregation::PickExtreme(Extreme::Max)
    }
}

static GROUP_KEY: FieldAggregation = FieldAggregation::CheckConstant;

struct ValueAccumulator<'p> {
    field: usize,
    aggregation: &'p FieldAggregation,
    value: Option<Value>,
}

impl<'p> ValueAccumulator<'p> {
    fn update(&mut self, value: Value) -> AtResult<()> {
        let Some(current) = self.value.take() else {
            self.value = Some(value);
            return Ok(());
        };

        let next = match self.aggregation {
            FieldAggregation::None => {
                return Err(AtError::AggregationError(format!(
                    "field {} is neither grouped nor aggregated, but several rows contribute to it",
                    self.field
                )));
            }
            FieldAggregation::CheckConstant => {
                if !values_equal(&current, &value) {
                    return Err(AtError::AggregationError(format!(
                        "field {} differs within a group: {} vs {}",
                        self.field, current, value
                    )));
                }
                current
            }
            FieldAggregation::Combine { op, .. } => evaluate_binary_op(&current, *op, &value)?,
            FieldAggregation::PickExtreme(extreme) => {
                if extreme.beats(&value, &current) {
                    value
                } else {
                    current
                }
            }
        };
        self.value = Some(next);
        Ok(())
    }

    fn result(self) -> Value {
        match (self.value, self.aggregation) {
            (Some(v), _) => v,
            (None, FieldAggregation::Combine { zero, .. }) => zero.clone(),
            (None, _) => Value::Null,
        }
    }
}

struct RowAggregator<'p> {
    accumulators: Vec<ValueAccumulator<'p>>,
}

impl<'p> RowAggregator<'p> {
    fn new(fields: &'p [FieldAggregation], keys: &[usize]) -> Self {
        let accumulators = fields
            .iter()
            .enumerate()
            .map(|(field, aggregation)| ValueAccumulator {
                field,
                aggregation: if keys.contains(&field) {
                    &GROUP_KEY
                } else {
                    aggregation
                },
                value: None,
            })
            .collect();
        Self { accumulators }
    }

    fn update(&mut self, row: Vec<Value>) -> AtResult<()> {
        for (acc, value) in self.accumulators.iter_mut().zip(row) {
            acc.update(value)?;
        }
        Ok(())
    }

    fn result(self) -> Vec<Value> {
        self.accumulators.into_iter().map(|a| a.result()).collect()
    }
}

enum SummarizerState<'p> {
    None(Vec<Vec<Value>>),
    All(RowAggregator<'p>),
    Group {
        keys: &'p [usize],
        index: HashMap<String, usize>,
        groups: Vec<RowAggregator<'p>>,
    },
}

/// Keys equal under `values_equal` must hash alike: integral reals become integers
/// and object entries are sorted by name.
fn normalize_key(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_key).collect()),
        Value::Object(obj) => {
            let mut entries: Vec<(&String, &Value)> = obj.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), normalize_key(v)))
                    .collect(),
            )
        }
        _ => value.clone(),
    }
}

fn group_key(keys: &[usize], row: &[Value]) -> AtResult<String> {
    let parts: Vec<Value> = keys.iter().map(|&k| normalize_key(&row[k])).collect();
    serde_json::to_string(&parts)
        .map_err(|e| AtError::eval(format!("Cannot hash group key: {}", e)))
}

/// Call-local accumulator for one evaluation.
pub struct Summarizer<'p> {
    fields: &'p [FieldAggregation],
    state: SummarizerState<'p>,
}

impl<'p> Summarizer<'p> {
    /// Fails with a plan error when a group key points past the declared fields.
    pub fn new(
        summarization: &'p Summarization,
        fields: &'p [FieldAggregation],
    ) -> AtResult<Self> {
        let state = match summarization {
            Summarization::None => SummarizerState::None(Vec::new()),
            Summarization::GroupAll => SummarizerState::All(RowAggregator::new(fields, &[])),
            Summarization::GroupBy(keys) => {
                if let Some(&key) = keys.iter().find(|&&k| k >= fields.len()) {
                    return Err(AtError::plan(format!(
                        "group key index {} out of range ({} fields)",
                        key,
                        fields.len()
                    )));
                }
                SummarizerState::Group {
                    keys,
                    index: HashMap::new(),
                    groups: Vec::new(),
                }
            }
        };
        Ok(Self { fields, state })
    }

    pub fn add_row(&mut self, row: Vec<Value>) -> AtResult<()> {
        if row.len() != self.fields.len() {
            return Err(AtError::plan(format!(
                "row has {} values, plan declares {} fields",
                row.len(),
                self.fields.len()
            )));
        }

        match &mut self.state {
            SummarizerState::None(rows) => {
                rows.push(row);
                Ok(())
            }
            SummarizerState::All(aggregator) => aggregator.update(row),
            SummarizerState::Group {
                keys,
                index,
                groups,
            } => {
                let key = group_key(keys, &row)?;
                let pos = match index.get(&key) {
                    Some(&pos) => pos,
                    None => {
                        groups.push(RowAggregator::new(self.fields, keys));
                        index.insert(key, groups.len() - 1);
                        groups.len() - 1
                    }
                };
                groups[pos].update(row)
            }
        }
    }

    pub fn finish(self) -> Vec<Vec<Value>> {
        match self.state {
            SummarizerState::None(rows) => rows,
            SummarizerState::All(aggregator) => vec![aggregator.result()],
            SummarizerState::Group { groups, .. } => {
                groups.into_iter().map(|g| g.result()).collect()
            }
        }
    }
}
