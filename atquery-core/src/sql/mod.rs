//! Database at-expressions: SQL generation, execution and row decoding.
//!
//! ```text
//! user @* { .company.name == 'Acme' } ( .name, @sort_desc .score ) limit 10
//! ```
//!
//! compiles to
//!
//! ```text
//! SELECT A00."name" FROM "user" A00 INNER JOIN "company" A01 ON A00."company" = A01."rowid"
//!     WHERE (A01."name" = ?) ORDER BY A00."score" DESC LIMIT ?
//! ```
//!
//! The statement runs through a [`SqlExecutor`]; nothing in this module touches a
//! database directly.

mod builder;
mod combiner;
mod compile;
mod context;
mod evaluator;
mod expr;
mod model;

pub use builder::{ParameterizedSql, SqlBuilder, MAX_SQL_PARAMS};
pub use combiner::{combine_values, Combiner, ComplexItem, ComplexMerge, DbWhatValue};
pub use compile::{DbAtExprBase, DbAtWhatField};
pub use context::{SqlGenContext, SqlTableAlias};
pub use evaluator::{DbAtExpr, DbAtExprBuilder, DbSubquery};
pub use expr::{AggregateFunction, DbExpr, SqlFunction};
pub use model::{AtEntityId, AtExprId, AttributeDef, DbAtEntity, EntityDef, ExtraWhere};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AtResult;

/// Column type the executor decodes a raw value with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl SqlType {
    /// Column type used in `CREATE TABLE`
    pub fn ddl_name(&self) -> &'static str {
        match self {
            SqlType::Integer => "BIGINT",
            SqlType::Real => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "BOOLEAN",
        }
    }
}

/// SQL flavour of the generated statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

impl SqlDialect {
    /// LIMIT clause that means "no limit", needed before a bare OFFSET
    pub fn unlimited(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "ALL",
            SqlDialect::Sqlite => "-1",
        }
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            "sqlite" => Ok(SqlDialect::Sqlite),
            other => Err(format!("Unknown SQL dialect: {}", other)),
        }
    }
}

/// Synchronous SQL executor bound to the caller's session.
///
/// Implementations return exactly `column_types.len()` values per row, decoded with
/// the declared `SqlType`s, and report any failure as `AtError::ExecutionError`.
/// A statement whose fields are all host-side selects the placeholder `0` with no
/// declared types; its rows may be returned empty or with that single column.
pub trait SqlExecutor {
    fn execute(&self, sql: &ParameterizedSql, column_types: &[SqlType])
        -> AtResult<Vec<Vec<Value>>>;
}
