//! Collection evaluator: at-expressions over in-memory lists and maps.
//!
//! ```text
//! users @* { $.age > 18 } ( .name, @sort .age ) limit 10
//! ```
//!
//! The plan (`ColAtExpr`) is built once and may be evaluated any number of times,
//! from any thread. Each call owns its own summarizer and limiter.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{AtError, AtResult};
use crate::expr::{compare_values, iterate_source, to_bool, Expression, Frame};
use crate::limit::Limiter;
use crate::plan::{AtExtras, Cardinality, RowDecoder, SortDirection, WhatFieldFlags};
use crate::summarize::{FieldAggregation, Summarization, Summarizer};

/// One projected, grouped, aggregated or sort-only field.
#[derive(Debug, Clone)]
pub struct ColAtWhatField {
    pub name: Option<String>,
    pub expr: Expression,
    pub flags: WhatFieldFlags,
    pub aggregation: FieldAggregation,
}

impl ColAtWhatField {
    pub fn new(expr: Expression) -> Self {
        Self {
            name: None,
            expr,
            flags: WhatFieldFlags::DEFAULT,
            aggregation: FieldAggregation::None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Group key (`@group`)
    pub fn group(mut self) -> Self {
        self.flags.group = true;
        self.aggregation = FieldAggregation::CheckConstant;
        self
    }

    pub fn aggregate(mut self, aggregation: FieldAggregation) -> Self {
        self.flags.aggregate = true;
        self.aggregation = aggregation;
        self
    }

    pub fn sum(self) -> Self {
        self.aggregate(FieldAggregation::sum())
    }

    pub fn min(self) -> Self {
        self.aggregate(FieldAggregation::min())
    }

    pub fn max(self) -> Self {
        self.aggregate(FieldAggregation::max())
    }

    pub fn sort(mut self, direction: SortDirection) -> Self {
        self.flags.sort = Some(direction);
        self
    }

    /// Computed but not returned (`@omit`)
    pub fn omit(mut self) -> Self {
        self.flags.omit = true;
        self
    }
}

/// Source of a collection at-expression: an iterable host expression and the name
/// each item is bound to while the filter and fields are evaluated.
#[derive(Debug, Clone)]
pub struct ColAtFrom {
    pub param: String,
    pub expr: Expression,
}

/// Immutable plan of a collection at-expression.
#[derive(Debug, Clone)]
pub struct ColAtExpr {
    from: ColAtFrom,
    where_expr: Option<Expression>,
    fields: Vec<ColAtWhatField>,
    aggregations: Vec<FieldAggregation>,
    summarization: Summarization,
    selected: Vec<usize>,
    sorting: Vec<(usize, SortDirection)>,
    row_decoder: RowDecoder,
    cardinality: Cardinality,
    extras: AtExtras,
}

/// Builder for `ColAtExpr`; `build` validates the plan.
#[derive(Debug, Clone)]
pub struct ColAtExprBuilder {
    from: ColAtFrom,
    where_expr: Option<Expression>,
    fields: Vec<ColAtWhatField>,
    summarization: Option<Summarization>,
    row_decoder: Option<RowDecoder>,
    cardinality: Cardinality,
    extras: AtExtras,
}

impl ColAtExprBuilder {
    pub fn filter(mut self, expr: Expression) -> Self {
        self.where_expr = Some(expr);
        self
    }

    pub fn field(mut self, field: ColAtWhatField) -> Self {
        self.fields.push(field);
        self
    }

    /// Override the summarization otherwise derived from the field flags.
    pub fn summarization(mut self, summarization: Summarization) -> Self {
        self.summarization = Some(summarization);
        self
    }

    pub fn decoder(mut self, decoder: RowDecoder) -> Self {
        self.row_decoder = Some(decoder);
        self
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn extras(mut self, extras: AtExtras) -> Self {
        self.extras = extras;
        self
    }

    pub fn build(self) -> AtResult<ColAtExpr> {
        let fields = if self.fields.is_empty() {
            vec![ColAtWhatField::new(Expression::Variable(self.from.param.clone()))]
        } else {
            self.fields
        };

        let summarization = match self.summarization {
            Some(s) => s,
            None => derive_summarization(&fields),
        };

        if let Summarization::GroupBy(keys) = &summarization {
            for &key in keys {
                match fields.get(key) {
                    None => {
                        return Err(AtError::plan(format!(
                            "group key index {} out of range ({} fields)",
                            key,
                            fields.len()
                        )))
                    }
                    Some(f) if !f.flags.group => {
                        return Err(AtError::plan(format!(
                            "group key index {} points at a non-group field",
                            key
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        let selected: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.flags.omit)
            .map(|(i, _)| i)
            .collect();
        if selected.is_empty() {
            return Err(AtError::plan("at-expression selects no fields"));
        }

        let sorting = fields
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.flags.sort.map(|dir| (i, dir)))
            .collect();

        let row_decoder = match self.row_decoder {
            Some(d) => d,
            None => {
                let names: Vec<Option<String>> =
                    selected.iter().map(|&i| fields[i].name.clone()).collect();
                RowDecoder::for_fields(&names)
            }
        };
        match &row_decoder {
            RowDecoder::Simple if selected.len() != 1 => {
                return Err(AtError::plan(format!(
                    "simple decoder needs one selected field, got {}",
                    selected.len()
                )))
            }
            RowDecoder::Struct(names) if names.len() != selected.len() => {
                return Err(AtError::plan(format!(
                    "struct decoder has {} names for {} selected fields",
                    names.len(),
                    selected.len()
                )))
            }
            _ => {}
        }

        let aggregations = fields
            .iter()
            .map(|f| {
                if summarization.is_none() {
                    FieldAggregation::None
                } else {
                    f.aggregation.clone()
                }
            })
            .collect();

        Ok(ColAtExpr {
            from: self.from,
            where_expr: self.where_expr,
            fields,
            aggregations,
            summarization,
            selected,
            sorting,
            row_decoder,
            cardinality: self.cardinality,
            extras: self.extras,
        })
    }
}

fn derive_summarization(fields: &[ColAtWhatField]) -> Summarization {
    let keys: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.flags.group)
        .map(|(i, _)| i)
        .collect();
    if !keys.is_empty() {
        Summarization::GroupBy(keys)
    } else if fields.iter().any(|f| f.flags.aggregate) {
        Summarization::GroupAll
    } else {
        Summarization::None
    }
}

impl ColAtExpr {
    /// Start a plan over `source`, binding each item to `param`.
    pub fn builder(param: &str, source: Expression) -> ColAtExprBuilder {
        ColAtExprBuilder {
            from: ColAtFrom {
                param: param.to_string(),
                expr: source,
            },
            where_expr: None,
            fields: Vec::new(),
            summarization: None,
            row_decoder: None,
            cardinality: Cardinality::ZeroOrMore,
            extras: AtExtras::NONE,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn summarization(&self) -> &Summarization {
        &self.summarization
    }

    /// True when limit and offset are applied while scanning.
    pub fn uses_early_limit(&self) -> bool {
        self.summarization.is_none() && self.sorting.is_empty()
    }

    /// Evaluate the source expression and run the plan over its items.
    pub fn evaluate(&self, frame: &Frame) -> AtResult<Vec<Value>> {
        let source = iterate_source(frame.evaluate(&self.from.expr)?)?;
        self.evaluate_items(source, frame)
    }

    /// Run the plan over already materialised items.
    pub fn evaluate_items(&self, items: Vec<Value>, frame: &Frame) -> AtResult<Vec<Value>> {
        let extras = self.extras.evaluate(frame)?;
        if extras.limit == Some(0) {
            self.cardinality.check(0)?;
            return Ok(Vec::new());
        }

        let early = self.uses_early_limit();
        debug!(
            param = %self.from.param,
            items = items.len(),
            early,
            "Evaluating collection at-expression"
        );

        let max_scan = frame.limits().max_scan_items;
        let mut scope = frame.clone();
        let mut limiter = Limiter::new(extras, early);
        let mut summarizer = Summarizer::new(&self.summarization, &self.aggregations)?;
        let mut scanned = 0usize;

        for item in items {
            if !limiter.process_limit() {
                break;
            }
            if scanned >= max_scan {
                warn!(max_scan, "Collection at-expression exceeded max_scan_items");
                return Err(AtError::eval(format!(
                    "Scan limit exceeded: more than {} items",
                    max_scan
                )));
            }
            scanned += 1;

            scope.set_variable(&self.from.param, item);
            if let Some(filter) = &self.where_expr {
                if !to_bool(&scope.evaluate(filter)?) {
                    continue;
                }
            }
            if !limiter.process_offset() {
                continue;
            }

            let mut row = Vec::with_capacity(self.fields.len());
            for field in &self.fields {
                row.push(scope.evaluate(&field.expr)?);
            }
            summarizer.add_row(row)?;
        }

        let mut rows = summarizer.finish();
        if !self.sorting.is_empty() {
            rows.sort_by(|a, b| self.compare_rows(a, b));
        }
        let rows = limiter.apply(rows)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let values = self.selected.iter().map(|&i| row[i].clone()).collect();
            result.push(self.row_decoder.decode(values)?);
        }

        trace!(scanned, rows = result.len(), "Collection at-expression done");
        self.cardinality.check(result.len())?;
        Ok(result)
    }

    /// Evaluate and turn the result into the value the expression yields.
    pub fn evaluate_value(&self, frame: &Frame) -> AtResult<Value> {
        let values = self.evaluate(frame)?;
        self.cardinality.wrap(values)
    }

    fn compare_rows(&self, a: &[Value], b: &[Value]) -> Ordering {
        for &(idx, direction) in &self.sorting {
            let ord = compare_values(&a[idx], &b[idx]);
            let ord = if direction.is_asc() { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
