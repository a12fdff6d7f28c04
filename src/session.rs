//! Host-facing entry point for both evaluators.

use atquery_core::{ColAtExpr, DbAtExpr, Frame, FunctionRegistry};
use serde_json::Value;
use tracing::info_span;

use crate::config::EngineConfig;
use crate::error::QueryResult;
use crate::storage::SqliteExecutor;

/// One configuration, one function registry and an optional database.
pub struct QuerySession {
    config: EngineConfig,
    functions: FunctionRegistry,
    executor: Option<SqliteExecutor>,
}

impl QuerySession {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            functions: FunctionRegistry::new(),
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: SqliteExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn executor(&self) -> Option<&SqliteExecutor> {
        self.executor.as_ref()
    }

    /// A fresh top-level frame.
    ///
    /// With a database bound, statements are generated in its dialect; otherwise the
    /// configured dialect is used (compile-only sessions).
    pub fn frame(&self) -> Frame<'_> {
        let frame = Frame::new(&self.functions).with_limits(self.config.limits.clone());
        match &self.executor {
            Some(executor) => frame
                .with_dialect(executor.dialect())
                .with_executor(executor),
            None => frame.with_dialect(self.config.dialect),
        }
    }

    /// Evaluate a collection at-expression to its cardinality-wrapped value.
    pub fn collection_at(&self, plan: &ColAtExpr, frame: &Frame) -> QueryResult<Value> {
        let _span = info_span!("collection_at", cardinality = %plan.cardinality()).entered();
        Ok(plan.evaluate_value(frame)?)
    }

    /// Evaluate a database at-expression to its cardinality-wrapped value.
    pub fn db_at(&self, plan: &DbAtExpr, frame: &Frame) -> QueryResult<Value> {
        let _span = info_span!("db_at", cardinality = %plan.cardinality()).entered();
        Ok(plan.evaluate_value(frame)?)
    }
}
