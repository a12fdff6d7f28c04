//! atquery-core - Storage-independent evaluation of at-expressions.
//!
//! An at-expression is a relational query over a source with optional filter,
//! projection, grouping, sorting and paging:
//!
//! ```text
//! source @ { where } ( what, @sort field, ... ) limit n offset m
//! ```
//!
//! This crate evaluates such queries in two ways that agree on their results:
//!
//! - **Collection evaluator** ([`ColAtExpr`]): walks an in-memory list or map.
//! - **SQL evaluator** ([`DbAtExpr`]): compiles to a parameterized SELECT (with
//!   implicit joins and correlated subqueries), runs it through a [`SqlExecutor`]
//!   and decodes the rows through [`Combiner`]s.
//!
//! Both share the [`Summarizer`] (grouping and aggregation), the [`Limiter`] (limit
//! and offset) and the [`RowDecoder`].
//!
//! # Example
//!
//! ```rust
//! use atquery_core::{AtExtras, ColAtExpr, ColAtWhatField, Expression, Frame, FunctionRegistry};
//! use serde_json::json;
//!
//! let plan = ColAtExpr::builder("x", Expression::literal(json!([1, 2, 3, 4, 5])))
//!     .field(ColAtWhatField::new(Expression::var("x")))
//!     .extras(AtExtras::limit_offset(3, 1))
//!     .build()
//!     .unwrap();
//!
//! let functions = FunctionRegistry::new();
//! let frame = Frame::new(&functions);
//! assert_eq!(plan.evaluate(&frame).unwrap(), vec![json!(2), json!(3), json!(4)]);
//! ```

pub mod collection;
pub mod error;
pub mod expr;
pub mod limit;
pub mod plan;
pub mod sql;
pub mod summarize;

pub use collection::{ColAtExpr, ColAtExprBuilder, ColAtFrom, ColAtWhatField};
pub use error::{AtError, AtResult};
pub use expr::{
    compare_values, values_equal, BinaryOperator, Expression, Frame, FunctionRegistry,
    HostFunction, UnaryOperator,
};
pub use limit::Limiter;
pub use plan::{
    AtExtras, Cardinality, QueryLimits, RowDecoder, RtExtras, SortDirection, WhatFieldFlags,
};
pub use sql::{
    AggregateFunction, AtEntityId, AtExprId, AttributeDef, Combiner, ComplexItem, ComplexMerge,
    DbAtEntity, DbAtExpr, DbAtExprBuilder, DbAtWhatField, DbExpr, DbSubquery, DbWhatValue,
    EntityDef, ParameterizedSql, SqlDialect, SqlExecutor, SqlFunction, SqlType,
};
pub use summarize::{Extreme, FieldAggregation, Summarization, Summarizer};
