//! Error types for atquery-core.
//!
//! Every failure of an at-expression evaluation is fatal for that call: nothing is
//! recovered locally and no partial result is returned.

use thiserror::Error;

use crate::plan::Cardinality;

/// At-expression evaluation error
#[derive(Error, Debug)]
pub enum AtError {
    /// Malformed plan (index out of range, column count mismatch). Never user-facing.
    #[error("Plan error: {0}")]
    PlanError(String),

    #[error("Aggregation failed: {0}")]
    AggregationError(String),

    #[error("Wrong number of records for {cardinality}: {}", count_message(.count))]
    CardinalityError {
        cardinality: Cardinality,
        count: usize,
    },

    /// The SQL executor failed; wraps the underlying cause.
    #[error("SQL execution error: {0}")]
    ExecutionError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

fn count_message(count: &usize) -> String {
    if *count == 0 {
        "No records found".to_string()
    } else {
        format!("Multiple records found: {}", count)
    }
}

impl AtError {
    pub fn plan(msg: impl Into<String>) -> Self {
        AtError::PlanError(msg.into())
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        AtError::EvaluationError(msg.into())
    }

    /// Wrap any executor-side failure.
    pub fn execution<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AtError::ExecutionError(Box::new(err))
    }
}

/// Result type for at-expression operations
pub type AtResult<T> = Result<T, AtError>;

impl serde::Serialize for AtError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AtError::plan("selected field index 3 out of range");
        assert_eq!(
            err.to_string(),
            "Plan error: selected field index 3 out of range"
        );

        let err = AtError::AggregationError("field 1 has several values".to_string());
        assert_eq!(
            err.to_string(),
            "Aggregation failed: field 1 has several values"
        );

        let err = AtError::eval("Division by zero");
        assert_eq!(err.to_string(), "Evaluation error: Division by zero");
    }

    #[test]
    fn test_cardinality_messages() {
        let err = AtError::CardinalityError {
            cardinality: Cardinality::One,
            count: 0,
        };
        assert_eq!(
            err.to_string(),
            "Wrong number of records for exactly one: No records found"
        );

        let err = AtError::CardinalityError {
            cardinality: Cardinality::ZeroOrOne,
            count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Wrong number of records for zero or one: Multiple records found: 3"
        );
    }

    #[test]
    fn test_execution_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = AtError::execution(io);
        assert_eq!(err.to_string(), "SQL execution error: disk gone");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_serialize_as_string() {
        let err = AtError::eval("boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!("Evaluation error: boom"));
    }
}
