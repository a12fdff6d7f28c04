//! Combiners: decode raw database columns back into what-field values.
//!
//! Each selected what-field declares how many consecutive raw columns it consumes;
//! a row is sliced left to right and every slice handed to that field's combiner.

use std::cell::OnceCell;

use serde_json::{Map, Value};

use crate::error::{AtError, AtResult};
use crate::expr::{Expression, Frame};

use super::expr::DbExpr;
use super::SqlType;

/// Position of one input of a composite value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexItem {
    /// Value of the n-th database sub-value
    Db(usize),
    /// Value of the n-th host expression
    Host(usize),
}

/// How a composite value builds its result from its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplexMerge {
    Tuple,
    Struct(Vec<String>),
    /// Call a registered host function with the inputs as arguments
    Call(String),
}

/// How one what-field is computed: by the database, by the host, or both.
#[derive(Debug, Clone)]
pub enum DbWhatValue {
    /// One column
    Db { expr: DbExpr, sql_type: SqlType },
    /// No column; evaluated by the host for every row
    Host(Expression),
    Complex {
        subs: Vec<DbWhatValue>,
        host_exprs: Vec<Expression>,
        items: Vec<ComplexItem>,
        merge: ComplexMerge,
    },
    /// Several columns assembled into one struct value
    ToStruct {
        names: Vec<String>,
        exprs: Vec<(DbExpr, SqlType)>,
    },
}

impl DbWhatValue {
    pub fn db(expr: DbExpr, sql_type: SqlType) -> Self {
        DbWhatValue::Db { expr, sql_type }
    }

    pub fn host(expr: Expression) -> Self {
        DbWhatValue::Host(expr)
    }

    /// Composite value; every item must point at an existing sub-value or host expression.
    pub fn complex(
        subs: Vec<DbWhatValue>,
        host_exprs: Vec<Expression>,
        items: Vec<ComplexItem>,
        merge: ComplexMerge,
    ) -> AtResult<Self> {
        for item in &items {
            let (index, len) = match item {
                ComplexItem::Db(i) => (*i, subs.len()),
                ComplexItem::Host(i) => (*i, host_exprs.len()),
            };
            if index >= len {
                return Err(AtError::plan(format!(
                    "complex item {:?} out of range ({} available)",
                    item, len
                )));
            }
        }
        if let ComplexMerge::Struct(names) = &merge {
            if names.len() != items.len() {
                return Err(AtError::plan(format!(
                    "struct merge has {} names for {} items",
                    names.len(),
                    items.len()
                )));
            }
        }
        Ok(DbWhatValue::Complex {
            subs,
            host_exprs,
            items,
            merge,
        })
    }

    pub fn to_struct(names: Vec<String>, exprs: Vec<(DbExpr, SqlType)>) -> AtResult<Self> {
        if names.len() != exprs.len() {
            return Err(AtError::plan(format!(
                "to_struct has {} names for {} expressions",
                names.len(),
                exprs.len()
            )));
        }
        Ok(DbWhatValue::ToStruct { names, exprs })
    }

    pub fn raw_types(&self) -> Vec<SqlType> {
        match self {
            DbWhatValue::Db { sql_type, .. } => vec![*sql_type],
            DbWhatValue::Host(_) => Vec::new(),
            DbWhatValue::Complex { subs, .. } => subs.iter().flat_map(|s| s.raw_types()).collect(),
            DbWhatValue::ToStruct { exprs, .. } => exprs.iter().map(|(_, t)| *t).collect(),
        }
    }

    /// Database expressions to select, one per raw column.
    pub fn db_exprs(&self) -> Vec<&DbExpr> {
        match self {
            DbWhatValue::Db { expr, .. } => vec![expr],
            DbWhatValue::Host(_) => Vec::new(),
            DbWhatValue::Complex { subs, .. } => subs.iter().flat_map(|s| s.db_exprs()).collect(),
            DbWhatValue::ToStruct { exprs, .. } => exprs.iter().map(|(e, _)| e).collect(),
        }
    }

    pub fn combiner(&self) -> Combiner<'_> {
        match self {
            DbWhatValue::Db { .. } => Combiner::Simple,
            DbWhatValue::Host(expr) => Combiner::Host(expr),
            DbWhatValue::Complex {
                subs,
                host_exprs,
                items,
                merge,
            } => {
                let subs: Vec<Combiner<'_>> = subs.iter().map(|s| s.combiner()).collect();
                let db_count = subs.iter().map(|c| c.db_value_count()).sum();
                Combiner::Complex {
                    subs,
                    host_exprs,
                    items,
                    merge,
                    db_count,
                }
            }
            DbWhatValue::ToStruct { names, .. } => Combiner::ToStruct(names),
        }
    }
}

/// Call-local decoder of one what-field.
#[derive(Debug)]
pub enum Combiner<'p> {
    Simple,
    Host(&'p Expression),
    Complex {
        subs: Vec<Combiner<'p>>,
        host_exprs: &'p [Expression],
        items: &'p [ComplexItem],
        merge: &'p ComplexMerge,
        db_count: usize,
    },
    ToStruct(&'p [String]),
}

impl<'p> Combiner<'p> {
    /// Number of raw columns this combiner consumes
    pub fn db_value_count(&self) -> usize {
        match self {
            Combiner::Simple => 1,
            Combiner::Host(_) => 0,
            Combiner::Complex { db_count, .. } => *db_count,
            Combiner::ToStruct(names) => names.len(),
        }
    }

    pub fn combine(&self, frame: &Frame, mut db_values: Vec<Value>) -> AtResult<Value> {
        if db_values.len() != self.db_value_count() {
            return Err(AtError::plan(format!(
                "combiner expects {} columns, got {}",
                self.db_value_count(),
                db_values.len()
            )));
        }

        match self {
            Combiner::Simple => Ok(db_values.swap_remove(0)),

            Combiner::Host(expr) => frame.evaluate(expr),

            Combiner::Complex {
                subs,
                host_exprs,
                items,
                merge,
                ..
            } => {
                let db_results = combine_values(subs, frame, db_values)?;
                let host_results: Vec<MemoCell<'_>> =
                    host_exprs.iter().map(MemoCell::new).collect();

                let mut inputs = Vec::with_capacity(items.len());
                for item in items.iter() {
                    inputs.push(match item {
                        ComplexItem::Db(i) => db_results[*i].clone(),
                        ComplexItem::Host(i) => host_results[*i].value(frame)?,
                    });
                }
                merge_values(merge, frame, inputs)
            }

            Combiner::ToStruct(names) => {
                let map: Map<String, Value> = names.iter().cloned().zip(db_values).collect();
                Ok(Value::Object(map))
            }
        }
    }
}

/// Compute-once cell for a host expression within one row.
struct MemoCell<'p> {
    expr: &'p Expression,
    cell: OnceCell<Value>,
}

impl<'p> MemoCell<'p> {
    fn new(expr: &'p Expression) -> Self {
        Self {
            expr,
            cell: OnceCell::new(),
        }
    }

    fn value(&self, frame: &Frame) -> AtResult<Value> {
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }
        let value = frame.evaluate(self.expr)?;
        Ok(self.cell.get_or_init(|| value).clone())
    }
}

fn merge_values(merge: &ComplexMerge, frame: &Frame, inputs: Vec<Value>) -> AtResult<Value> {
    match merge {
        ComplexMerge::Tuple => Ok(Value::Array(inputs)),
        ComplexMerge::Struct(names) => Ok(Value::Object(names.iter().cloned().zip(inputs).collect())),
        ComplexMerge::Call(name) => frame.functions().call(name, &inputs),
    }
}

/// Slice `row` across `combiners` and decode every field.
pub fn combine_values(combiners: &[Combiner], frame: &Frame, row: Vec<Value>) -> AtResult<Vec<Value>> {
    let expected: usize = combiners.iter().map(|c| c.db_value_count()).sum();
    if expected != row.len() {
        return Err(AtError::plan(format!(
            "row has {} columns, combiners consume {}",
            row.len(),
            expected
        )));
    }

    let mut values = row.into_iter();
    let mut result = Vec::with_capacity(combiners.len());
    for combiner in combiners {
        let slice: Vec<Value> = values.by_ref().take(combiner.db_value_count()).collect();
        result.push(combiner.combine(frame, slice)?);
    }
    Ok(result)
}
