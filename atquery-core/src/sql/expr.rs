//! Database-side expressions and their SQL rendering.

use std::sync::Arc;

use crate::error::{AtError, AtResult};
use crate::expr::{BinaryOperator, Expression, Frame, UnaryOperator};

use super::builder::SqlBuilder;
use super::context::{SqlGenContext, SqlTableAlias};
use super::evaluator::DbSubquery;
use super::model::{DbAtEntity, EntityDef};

/// Scalar SQL functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFunction {
    Lower,
    Upper,
    Abs,
    Length,
}

impl SqlFunction {
    fn sql(&self) -> &'static str {
        match self {
            SqlFunction::Lower => "LOWER",
            SqlFunction::Upper => "UPPER",
            SqlFunction::Abs => "ABS",
            SqlFunction::Length => "LENGTH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Sum,
    Min,
    Max,
    Count,
}

/// Expression evaluated by the database.
#[derive(Debug, Clone)]
pub enum DbExpr {
    /// A FROM occurrence; as a value, its identity column
    Entity(DbAtEntity),

    /// The row referenced by a reference attribute (implicit INNER JOIN)
    Rel { base: Box<DbExpr>, attr: String },

    Attr { base: Box<DbExpr>, attr: String },

    /// Host expression, evaluated before execution and bound as a parameter
    Param(Expression),

    Binary {
        left: Box<DbExpr>,
        op: BinaryOperator,
        right: Box<DbExpr>,
    },

    Unary { op: UnaryOperator, expr: Box<DbExpr> },

    Call { func: SqlFunction, args: Vec<DbExpr> },

    Aggregate { func: AggregateFunction, expr: Box<DbExpr> },

    /// Nested at-expression as a scalar subquery
    Subquery(Arc<DbSubquery>),

    Exists(Arc<DbSubquery>),

    In {
        expr: Box<DbExpr>,
        subquery: Arc<DbSubquery>,
    },
}

impl DbExpr {
    pub fn entity(entity: &DbAtEntity) -> Self {
        DbExpr::Entity(entity.clone())
    }

    pub fn attr(self, name: &str) -> Self {
        DbExpr::Attr {
            base: Box::new(self),
            attr: name.to_string(),
        }
    }

    pub fn rel(self, name: &str) -> Self {
        DbExpr::Rel {
            base: Box::new(self),
            attr: name.to_string(),
        }
    }

    pub fn param(expr: Expression) -> Self {
        DbExpr::Param(expr)
    }

    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        DbExpr::Param(Expression::literal(value))
    }

    pub fn binary(left: DbExpr, op: BinaryOperator, right: DbExpr) -> Self {
        DbExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: DbExpr) -> Self {
        DbExpr::binary(self, BinaryOperator::Equal, right)
    }

    pub fn not(expr: DbExpr) -> Self {
        DbExpr::Unary {
            op: UnaryOperator::Not,
            expr: Box::new(expr),
        }
    }

    pub fn call(func: SqlFunction, args: Vec<DbExpr>) -> Self {
        DbExpr::Call { func, args }
    }

    pub fn aggregate(func: AggregateFunction, expr: DbExpr) -> Self {
        DbExpr::Aggregate {
            func,
            expr: Box::new(expr),
        }
    }

    pub fn subquery(subquery: Arc<DbSubquery>) -> Self {
        DbExpr::Subquery(subquery)
    }

    pub fn exists(subquery: Arc<DbSubquery>) -> Self {
        DbExpr::Exists(subquery)
    }

    pub fn in_subquery(self, subquery: Arc<DbSubquery>) -> Self {
        DbExpr::In {
            expr: Box::new(self),
            subquery,
        }
    }

    /// Left-nested AND chain; `None` for an empty list.
    pub fn and_chain(exprs: Vec<DbExpr>) -> Option<DbExpr> {
        exprs
            .into_iter()
            .reduce(|acc, e| DbExpr::binary(acc, BinaryOperator::And, e))
    }

    /// Entity of a table-valued expression (`Entity` or `Rel`).
    fn table_entity(&self) -> AtResult<Arc<EntityDef>> {
        match self {
            DbExpr::Entity(entity) => Ok(entity.entity.clone()),
            DbExpr::Rel { base, attr } => {
                let base_entity = base.table_entity()?;
                let attribute = base_entity.attribute(attr)?;
                attribute.reference.clone().ok_or_else(|| {
                    AtError::plan(format!(
                        "Attribute '{}.{}' is not a reference",
                        base_entity.name, attr
                    ))
                })
            }
            other => Err(AtError::plan(format!(
                "expression is not table-valued: {:?}",
                other
            ))),
        }
    }

    fn alias(&self, ctx: &SqlGenContext) -> AtResult<SqlTableAlias> {
        match self {
            DbExpr::Entity(entity) => ctx.entity_alias(entity),
            DbExpr::Rel { base, attr } => {
                let base_alias = base.alias(ctx)?;
                let attribute = base_alias.entity.attribute(attr)?;
                let target = self.table_entity()?;
                ctx.rel_alias(&base_alias, attribute, &target)
            }
            other => Err(AtError::plan(format!(
                "expression has no table alias: {:?}",
                other
            ))),
        }
    }

    /// Render into `b`, evaluating host parameters in `frame`.
    pub fn to_sql(&self, ctx: &SqlGenContext, frame: &Frame, b: &mut SqlBuilder) -> AtResult<()> {
        match self {
            DbExpr::Entity(_) | DbExpr::Rel { .. } => {
                let alias = self.alias(ctx)?;
                b.append_column(&alias.name, &alias.entity.rowid_column);
            }

            DbExpr::Attr { base, attr } => {
                let alias = base.alias(ctx)?;
                let column = alias.entity.attribute(attr)?.column.clone();
                b.append_column(&alias.name, &column);
            }

            DbExpr::Param(expr) => {
                let value = frame.evaluate(expr)?;
                b.append_param(value);
            }

            DbExpr::Binary { left, op, right } => {
                b.append("(");
                left.to_sql(ctx, frame, b)?;
                b.append(" ");
                b.append(binary_sql(*op)?);
                b.append(" ");
                right.to_sql(ctx, frame, b)?;
                b.append(")");
            }

            DbExpr::Unary { op, expr } => {
                b.append("(");
                b.append(match op {
                    UnaryOperator::Not => "NOT ",
                    UnaryOperator::Negate => "-",
                });
                expr.to_sql(ctx, frame, b)?;
                b.append(")");
            }

            DbExpr::Call { func, args } => {
                b.append(func.sql());
                b.append("(");
                b.append_list(args, ", ", |b, arg| arg.to_sql(ctx, frame, b))?;
                b.append(")");
            }

            DbExpr::Aggregate { func, expr } => match func {
                AggregateFunction::Sum => {
                    b.append("COALESCE(SUM(");
                    expr.to_sql(ctx, frame, b)?;
                    b.append("), 0)");
                }
                AggregateFunction::Min | AggregateFunction::Max | AggregateFunction::Count => {
                    b.append(match func {
                        AggregateFunction::Min => "MIN(",
                        AggregateFunction::Max => "MAX(",
                        _ => "COUNT(",
                    });
                    expr.to_sql(ctx, frame, b)?;
                    b.append(")");
                }
            },

            DbExpr::Subquery(subquery) => {
                b.append("(");
                subquery.to_sql(ctx, frame, b)?;
                b.append(")");
            }

            DbExpr::Exists(subquery) => {
                b.append("EXISTS(");
                subquery.to_sql(ctx, frame, b)?;
                b.append(")");
            }

            DbExpr::In { expr, subquery } => {
                b.append("(");
                expr.to_sql(ctx, frame, b)?;
                b.append(" IN (");
                subquery.to_sql(ctx, frame, b)?;
                b.append("))");
            }
        }
        Ok(())
    }
}

fn binary_sql(op: BinaryOperator) -> AtResult<&'static str> {
    Ok(match op {
        BinaryOperator::Equal => "=",
        BinaryOperator::NotEqual => "<>",
        BinaryOperator::LessThan => "<",
        BinaryOperator::LessThanOrEqual => "<=",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::Add => "+",
        BinaryOperator::Subtract => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulus => "%",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
        BinaryOperator::Like => "LIKE",
        BinaryOperator::In => {
            return Err(AtError::plan(
                "operator 'in' needs a subquery on the database side",
            ))
        }
    })
}
