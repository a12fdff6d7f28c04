//! Persisted entities and their occurrences inside at-expressions.

use std::fmt;
use std::sync::Arc;

use crate::error::{AtError, AtResult};
use crate::expr::Expression;

use super::SqlType;

/// One attribute of an entity, stored in one column.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub name: String,
    pub column: String,
    pub sql_type: SqlType,
    /// Set for attributes holding the identity of a row of another entity
    pub reference: Option<Arc<EntityDef>>,
}

impl AttributeDef {
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            sql_type,
            reference: None,
        }
    }

    pub fn reference(name: &str, target: Arc<EntityDef>) -> Self {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            sql_type: SqlType::Integer,
            reference: Some(target),
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }
}

/// Mandatory predicate of a table: `attribute = value` for every occurrence.
#[derive(Debug, Clone)]
pub struct ExtraWhere {
    pub attribute: String,
    pub value: Expression,
}

/// A persisted entity (one table).
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub rowid_column: String,
    pub attributes: Vec<AttributeDef>,
    pub extra_where: Option<ExtraWhere>,
}

impl EntityDef {
    pub fn new(name: &str, attributes: Vec<AttributeDef>) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_string(),
            rowid_column: "rowid".to_string(),
            attributes,
            extra_where: None,
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn with_extra_where(mut self, attribute: &str, value: Expression) -> Self {
        self.extra_where = Some(ExtraWhere {
            attribute: attribute.to_string(),
            value,
        });
        self
    }

    pub fn attribute(&self, name: &str) -> AtResult<&AttributeDef> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| {
                AtError::plan(format!("Entity '{}' has no attribute '{}'", self.name, name))
            })
    }
}

/// Identity of one at-expression within a statement tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtExprId(pub u32);

impl fmt::Display for AtExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtEntityId {
    pub expr: AtExprId,
    pub index: usize,
}

/// An entity as it occurs in the FROM list of an at-expression
#[derive(Debug, Clone)]
pub struct DbAtEntity {
    pub entity: Arc<EntityDef>,
    pub id: AtEntityId,
}

impl DbAtEntity {
    pub fn new(entity: Arc<EntityDef>, expr: AtExprId, index: usize) -> Self {
        Self {
            entity,
            id: AtEntityId { expr, index },
        }
    }

    /// All occurrences of one FROM list must belong to the same at-expression and
    /// carry distinct indices. Returns that at-expression's id.
    pub fn check_list(from: &[DbAtEntity]) -> AtResult<AtExprId> {
        let first = from
            .first()
            .ok_or_else(|| AtError::plan("at-expression has no entities in FROM"))?;
        let expr = first.id.expr;
        for (i, entity) in from.iter().enumerate() {
            if entity.id.expr != expr {
                return Err(AtError::plan(format!(
                    "FROM mixes at-expressions {} and {}",
                    expr, entity.id.expr
                )));
            }
            if from[..i].iter().any(|e| e.id.index == entity.id.index) {
                return Err(AtError::plan(format!(
                    "duplicate entity index {} in {}",
                    entity.id.index, expr
                )));
            }
        }
        Ok(expr)
    }
}
