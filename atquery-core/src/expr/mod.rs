//! Host expressions.
//!
//! The host expression language is what the enclosing evaluator runs in-process:
//! filters and projections of collection at-expressions, host-only parts of database
//! projections, and the limit/offset clauses of both.

mod frame;
mod helpers;

pub use frame::{Frame, FunctionRegistry, HostFunction};
pub use helpers::*;

use std::sync::Arc;

use serde_json::Value;

use crate::collection::ColAtExpr;
use crate::sql::DbAtExpr;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    And,
    Or,
    Like,
    In,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Like => "like",
            BinaryOperator::In => "in",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

/// Host expression tree
#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Value),

    /// Variable bound in the current frame (`$` of a collection at-expression included)
    Variable(String),

    FieldAccess(Box<Expression>, String),

    IndexAccess(Box<Expression>, usize),

    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    Array(Vec<Expression>),

    Object(Vec<(String, Expression)>),

    /// Call of a function registered in the frame's `FunctionRegistry`
    Call { name: String, args: Vec<Expression> },

    /// Nested at-expression over a collection
    ColAt(Arc<ColAtExpr>),

    /// Nested at-expression over database entities
    DbAt(Arc<DbAtExpr>),
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn var(name: &str) -> Self {
        Expression::Variable(name.to_string())
    }

    pub fn field(self, name: &str) -> Self {
        Expression::FieldAccess(Box::new(self), name.to_string())
    }

    pub fn index(self, index: usize) -> Self {
        Expression::IndexAccess(Box::new(self), index)
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expression) -> Self {
        Expression::UnaryOp {
            op: UnaryOperator::Not,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: &str, args: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.to_string(),
            args,
        }
    }
}
