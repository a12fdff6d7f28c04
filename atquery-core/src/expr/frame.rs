//! Execution frame: the live context an at-expression is evaluated in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::helpers::*;
use super::{BinaryOperator, Expression};
use crate::error::{AtError, AtResult};
use crate::plan::QueryLimits;
use crate::sql::{SqlDialect, SqlExecutor};

/// A host function callable from expressions by name.
pub type HostFunction = dyn Fn(&[Value]) -> AtResult<Value> + Send + Sync;

/// Named host functions available to expressions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<HostFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a function.
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> AtResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> AtResult<Value> {
        match self.functions.get(name) {
            Some(function) => function(args),
            None => Err(AtError::eval(format!("Unknown function: {}", name))),
        }
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Variables, functions and collaborators visible to an evaluation.
///
/// Cloning a frame opens a nested scope: variables set on the clone never reach
/// the original.
#[derive(Clone)]
pub struct Frame<'a> {
    variables: HashMap<String, Value>,
    functions: &'a FunctionRegistry,
    executor: Option<&'a dyn SqlExecutor>,
    limits: QueryLimits,
    dialect: SqlDialect,
}

impl<'a> Frame<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            variables: HashMap::new(),
            functions,
            executor: None,
            limits: QueryLimits::default(),
            dialect: SqlDialect::default(),
        }
    }

    /// Attach the executor that database at-expressions run against.
    pub fn with_executor(mut self, executor: &'a dyn SqlExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn functions(&self) -> &FunctionRegistry {
        self.functions
    }

    pub fn executor(&self) -> AtResult<&'a dyn SqlExecutor> {
        self.executor
            .ok_or_else(|| AtError::eval("No SQL executor bound to the frame"))
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    /// Evaluate an expression.
    pub fn evaluate(&self, expr: &Expression) -> AtResult<Value> {
        match expr {
            Expression::Literal(v) => Ok(v.clone()),

            Expression::Variable(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| AtError::eval(format!("Unknown variable: {}", name))),

            Expression::FieldAccess(base, field) => {
                let base_val = self.evaluate(base)?;
                Ok(get_field_value(&base_val, field))
            }

            Expression::IndexAccess(base, index) => match self.evaluate(base)? {
                Value::Array(arr) => arr.get(*index).cloned().ok_or_else(|| {
                    AtError::eval(format!(
                        "Index {} out of bounds for length {}",
                        index,
                        arr.len()
                    ))
                }),
                other => Err(AtError::eval(format!("Cannot index into {}", other))),
            },

            Expression::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    let left_val = self.evaluate(left)?;
                    if !to_bool(&left_val) {
                        return Ok(Value::Bool(false));
                    }
                    let right_val = self.evaluate(right)?;
                    Ok(Value::Bool(to_bool(&right_val)))
                }
                BinaryOperator::Or => {
                    let left_val = self.evaluate(left)?;
                    if to_bool(&left_val) {
                        return Ok(Value::Bool(true));
                    }
                    let right_val = self.evaluate(right)?;
                    Ok(Value::Bool(to_bool(&right_val)))
                }
                _ => {
                    let left_val = self.evaluate(left)?;
                    let right_val = self.evaluate(right)?;
                    evaluate_binary_op(&left_val, *op, &right_val)
                }
            },

            Expression::UnaryOp { op, operand } => {
                let operand_val = self.evaluate(operand)?;
                evaluate_unary_op(*op, &operand_val)
            }

            Expression::Array(elements) => {
                let mut arr = Vec::with_capacity(elements.len());
                for elem in elements {
                    arr.push(self.evaluate(elem)?);
                }
                Ok(Value::Array(arr))
            }

            Expression::Object(fields) => {
                let mut obj = serde_json::Map::new();
                for (key, value_expr) in fields {
                    let value = self.evaluate(value_expr)?;
                    obj.insert(key.clone(), value);
                }
                Ok(Value::Object(obj))
            }

            Expression::Call { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.evaluate(arg)?);
                }
                self.functions.call(name, &evaluated)
            }

            Expression::ColAt(at) => at.evaluate_value(self),

            Expression::DbAt(at) => at.evaluate_value(self),
        }
    }
}
