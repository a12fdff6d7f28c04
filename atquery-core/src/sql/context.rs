//! Table aliases and implicit joins of a statement being generated.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{AtError, AtResult};

use super::model::{AtEntityId, AtExprId, AttributeDef, DbAtEntity, EntityDef};
use super::SqlDialect;

/// A table alias (`A00`, `A01`, ...) bound to the at-expression that introduced it.
#[derive(Debug, Clone)]
pub struct SqlTableAlias {
    pub entity: Arc<EntityDef>,
    pub expr: AtExprId,
    pub name: String,
}

#[derive(Debug)]
struct TableJoin {
    attr: String,
    column: String,
    alias: SqlTableAlias,
}

/// One FROM entry: an entity occurrence and the joins hanging off it (directly or
/// through other joined aliases).
#[derive(Debug)]
struct AliasTable {
    alias: SqlTableAlias,
    sub_aliases: Vec<(SqlTableAlias, Vec<TableJoin>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct FromJoin {
    pub base: SqlTableAlias,
    pub column: String,
    pub alias: SqlTableAlias,
}

#[derive(Debug, Clone)]
pub(crate) struct FromEntity {
    pub alias: SqlTableAlias,
    pub joins: Vec<FromJoin>,
}

/// Generation state of one (possibly nested) SELECT.
///
/// All contexts of a statement share one alias counter, so aliases are unique across
/// subqueries. Lookups for an alias owned by an enclosing SELECT walk the parent chain,
/// and joins needed on such an alias are recorded in the owner's FROM.
#[derive(Debug)]
pub struct SqlGenContext<'p> {
    parent: Option<&'p SqlGenContext<'p>>,
    dialect: SqlDialect,
    allocator: Rc<Cell<u32>>,
    expr: AtExprId,
    from: Vec<DbAtEntity>,
    entity_tables: HashMap<AtEntityId, usize>,
    alias_tables: RefCell<HashMap<String, usize>>,
    tables: RefCell<Vec<AliasTable>>,
}

impl<'p> SqlGenContext<'p> {
    pub fn top(from: &[DbAtEntity], dialect: SqlDialect) -> AtResult<Self> {
        Self::create(None, Rc::new(Cell::new(0)), from, dialect)
    }

    pub fn create_sub<'s>(&'s self, from: &[DbAtEntity]) -> AtResult<SqlGenContext<'s>> {
        SqlGenContext::create(Some(self), self.allocator.clone(), from, self.dialect)
    }

    fn create(
        parent: Option<&'p SqlGenContext<'p>>,
        allocator: Rc<Cell<u32>>,
        from: &[DbAtEntity],
        dialect: SqlDialect,
    ) -> AtResult<Self> {
        let expr = DbAtEntity::check_list(from)?;
        let mut entity_tables = HashMap::new();
        let mut alias_tables = HashMap::new();
        let mut tables = Vec::with_capacity(from.len());

        for entity in from {
            let alias = next_alias(&allocator, entity.entity.clone(), expr);
            alias_tables.insert(alias.name.clone(), tables.len());
            entity_tables.insert(entity.id, tables.len());
            tables.push(AliasTable {
                alias,
                sub_aliases: Vec::new(),
            });
        }

        Ok(Self {
            parent,
            dialect,
            allocator,
            expr,
            from: from.to_vec(),
            entity_tables,
            alias_tables: RefCell::new(alias_tables),
            tables: RefCell::new(tables),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn expr_id(&self) -> AtExprId {
        self.expr
    }

    pub fn entity_alias(&self, entity: &DbAtEntity) -> AtResult<SqlTableAlias> {
        let ctx = self.context_for(entity.id.expr)?;
        let idx = ctx.entity_tables.get(&entity.id).copied().ok_or_else(|| {
            AtError::plan(format!(
                "entity {} #{} is not in FROM of {}",
                entity.entity.name, entity.id.index, entity.id.expr
            ))
        })?;
        Ok(ctx.tables.borrow()[idx].alias.clone())
    }

    /// Alias of the row referenced by `attr` of `base`, joining it on first use.
    pub fn rel_alias(
        &self,
        base: &SqlTableAlias,
        attr: &AttributeDef,
        target: &Arc<EntityDef>,
    ) -> AtResult<SqlTableAlias> {
        let ctx = self.context_for(base.expr)?;
        let idx = ctx
            .alias_tables
            .borrow()
            .get(&base.name)
            .copied()
            .ok_or_else(|| AtError::plan(format!("unknown table alias {}", base.name)))?;

        let mut tables = ctx.tables.borrow_mut();
        let table = &mut tables[idx];
        let pos = match table
            .sub_aliases
            .iter()
            .position(|(alias, _)| alias.name == base.name)
        {
            Some(pos) => pos,
            None => {
                table.sub_aliases.push((base.clone(), Vec::new()));
                table.sub_aliases.len() - 1
            }
        };

        let joins = &mut table.sub_aliases[pos].1;
        if let Some(join) = joins.iter().find(|j| j.attr == attr.name) {
            return Ok(join.alias.clone());
        }

        let alias = next_alias(&self.allocator, target.clone(), base.expr);
        joins.push(TableJoin {
            attr: attr.name.clone(),
            column: attr.column.clone(),
            alias: alias.clone(),
        });
        ctx.alias_tables
            .borrow_mut()
            .insert(alias.name.clone(), idx);
        Ok(alias)
    }

    /// FROM entries in declaration order, joins in discovery order.
    pub(crate) fn from_info(&self) -> Vec<FromEntity> {
        let tables = self.tables.borrow();
        self.from
            .iter()
            .filter_map(|entity| self.entity_tables.get(&entity.id))
            .map(|&idx| {
                let table = &tables[idx];
                let joins = table
                    .sub_aliases
                    .iter()
                    .flat_map(|(base, joins)| {
                        joins.iter().map(move |j| FromJoin {
                            base: base.clone(),
                            column: j.column.clone(),
                            alias: j.alias.clone(),
                        })
                    })
                    .collect();
                FromEntity {
                    alias: table.alias.clone(),
                    joins,
                }
            })
            .collect()
    }

    fn context_for(&self, expr: AtExprId) -> AtResult<&SqlGenContext<'p>> {
        let mut ctx: &SqlGenContext<'p> = self;
        loop {
            if ctx.expr == expr {
                return Ok(ctx);
            }
            match ctx.parent {
                Some(parent) => ctx = parent,
                None => {
                    return Err(AtError::plan(format!(
                        "{} is not visible from {}",
                        expr, self.expr
                    )))
                }
            }
        }
    }
}

fn next_alias(allocator: &Cell<u32>, entity: Arc<EntityDef>, expr: AtExprId) -> SqlTableAlias {
    let n = allocator.get();
    allocator.set(n + 1);
    SqlTableAlias {
        entity,
        expr,
        name: format!("A{:02}", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlType;

    fn entities() -> (Arc<EntityDef>, Arc<EntityDef>) {
        let company = Arc::new(EntityDef::new(
            "company",
            vec![AttributeDef::new("name", SqlType::Text)],
        ));
        let user = Arc::new(EntityDef::new(
            "user",
            vec![
                AttributeDef::new("name", SqlType::Text),
                AttributeDef::reference("company", company.clone()),
            ],
        ));
        (company, user)
    }

    #[test]
    fn test_aliases_and_joins() {
        let (company, user) = entities();
        let from = vec![DbAtEntity::new(user.clone(), AtExprId(0), 0)];
        let ctx = SqlGenContext::top(&from, SqlDialect::Postgres).unwrap();

        let base = ctx.entity_alias(&from[0]).unwrap();
        assert_eq!(base.name, "A00");

        let attr = user.attribute("company").unwrap();
        let joined = ctx.rel_alias(&base, attr, &company).unwrap();
        assert_eq!(joined.name, "A01");
        // same (alias, attribute) pair reuses the join
        assert_eq!(ctx.rel_alias(&base, attr, &company).unwrap().name, "A01");

        let info = ctx.from_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].joins.len(), 1);
        assert_eq!(info[0].joins[0].base.name, "A00");
        assert_eq!(info[0].joins[0].column, "company");
    }

    #[test]
    fn test_sub_context_shares_counter_and_resolves_outer() {
        let (company, user) = entities();
        let outer_from = vec![DbAtEntity::new(user.clone(), AtExprId(0), 0)];
        let inner_from = vec![DbAtEntity::new(company.clone(), AtExprId(1), 0)];
        let top = SqlGenContext::top(&outer_from, SqlDialect::Sqlite).unwrap();
        let sub = top.create_sub(&inner_from).unwrap();

        assert_eq!(sub.entity_alias(&inner_from[0]).unwrap().name, "A01");
        let outer = sub.entity_alias(&outer_from[0]).unwrap();
        assert_eq!(outer.name, "A00");

        // join on the outer alias lands in the outer FROM
        let attr = user.attribute("company").unwrap();
        assert_eq!(sub.rel_alias(&outer, attr, &company).unwrap().name, "A02");
        assert_eq!(top.from_info()[0].joins.len(), 1);
        assert!(sub.from_info()[0].joins.is_empty());

        // the inner context is invisible from the outer one
        assert!(top.entity_alias(&inner_from[0]).is_err());
    }
}
