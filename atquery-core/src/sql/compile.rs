//! SELECT statement assembly for database at-expressions.

use tracing::debug;

use crate::error::AtResult;
use crate::expr::Frame;
use crate::plan::{RtExtras, SortDirection, WhatFieldFlags};

use super::builder::{ParameterizedSql, SqlBuilder};
use super::combiner::{Combiner, DbWhatValue};
use super::context::{FromEntity, SqlGenContext};
use super::expr::DbExpr;
use super::model::DbAtEntity;
use super::SqlType;

/// One what-field of a database at-expression.
#[derive(Debug, Clone)]
pub struct DbAtWhatField {
    pub name: Option<String>,
    pub flags: WhatFieldFlags,
    pub value: DbWhatValue,
}

impl DbAtWhatField {
    pub fn new(value: DbWhatValue) -> Self {
        Self {
            name: None,
            flags: WhatFieldFlags::DEFAULT,
            value,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn flags(mut self, flags: WhatFieldFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn group(mut self) -> Self {
        self.flags.group = true;
        self
    }

    pub fn aggregate(mut self) -> Self {
        self.flags.aggregate = true;
        self
    }

    pub fn sort(mut self, direction: SortDirection) -> Self {
        self.flags.sort = Some(direction);
        self
    }

    pub fn omit(mut self) -> Self {
        self.flags.omit = true;
        self
    }
}

/// A what-field reduced to one database expression.
struct SqlWhatField<'a> {
    expr: &'a DbExpr,
    flags: WhatFieldFlags,
}

enum OrderByElement<'a> {
    Expr(&'a DbExpr, SortDirection),
    Entity(&'a DbAtEntity),
}

/// The part of a database at-expression shared by top-level and nested use:
/// FROM, WHERE and what-fields, without cardinality or limit/offset.
#[derive(Debug, Clone)]
pub struct DbAtExprBase {
    from: Vec<DbAtEntity>,
    what: Vec<DbAtWhatField>,
    where_expr: Option<DbExpr>,
    is_many: bool,
    result_types: Vec<SqlType>,
}

impl DbAtExprBase {
    pub fn new(
        from: Vec<DbAtEntity>,
        what: Vec<DbAtWhatField>,
        where_expr: Option<DbExpr>,
        is_many: bool,
    ) -> AtResult<Self> {
        DbAtEntity::check_list(&from)?;
        let result_types = what
            .iter()
            .filter(|f| !f.flags.omit)
            .flat_map(|f| f.value.raw_types())
            .collect();
        Ok(Self {
            from,
            what,
            where_expr,
            is_many,
            result_types,
        })
    }

    pub fn from(&self) -> &[DbAtEntity] {
        &self.from
    }

    pub fn what(&self) -> &[DbAtWhatField] {
        &self.what
    }

    /// Types of the raw columns the statement returns, in order.
    pub fn result_types(&self) -> &[SqlType] {
        &self.result_types
    }

    /// Fresh combiners for one evaluation, one per selected field.
    pub fn combiners(&self) -> Vec<Combiner<'_>> {
        self.what
            .iter()
            .filter(|f| !f.flags.omit)
            .map(|f| f.value.combiner())
            .collect()
    }

    pub fn build_sql(&self, frame: &Frame, extras: RtExtras) -> AtResult<ParameterizedSql> {
        let ctx = SqlGenContext::top(&self.from, frame.dialect())?;
        let mut b = SqlBuilder::new();
        self.build_sql0(&ctx, frame, &mut b, extras)?;
        Ok(b.build())
    }

    pub fn build_nested_sql(
        &self,
        ctx: &SqlGenContext,
        frame: &Frame,
        b: &mut SqlBuilder,
        extras: RtExtras,
    ) -> AtResult<()> {
        let sub = ctx.create_sub(&self.from)?;
        self.build_sql0(&sub, frame, b, extras)
    }

    fn build_sql0(
        &self,
        ctx: &SqlGenContext,
        frame: &Frame,
        b: &mut SqlBuilder,
        extras: RtExtras,
    ) -> AtResult<()> {
        let fields = self.sql_what();

        // FROM last: translating the other clauses discovers the joins
        let where_sql = self.translate_where(ctx, frame)?;
        let what_sqls = translate_what(ctx, frame, &fields)?;
        let group_by_sqls = translate_group_by(ctx, frame, &fields)?;
        let order_by_sqls = self.translate_order_by(ctx, frame, &fields, extras)?;
        let from_info = ctx.from_info();
        let from_sqls: Vec<ParameterizedSql> = from_info.iter().map(translate_from_item).collect();

        debug!(
            expr = %ctx.expr_id(),
            tables = from_sqls.len(),
            order_by = order_by_sqls.len(),
            "Generated at-expression SELECT"
        );

        append_clause(b, "SELECT", &what_sqls);
        append_clause(b, " FROM", &from_sqls);
        append_clause(b, " WHERE", where_sql.as_slice());
        append_clause(b, " GROUP BY", &group_by_sqls);
        append_clause(b, " ORDER BY", &order_by_sqls);

        match (extras.limit, extras.offset) {
            (Some(limit), _) => {
                b.append(" LIMIT ");
                b.append_param(limit.into());
            }
            (None, Some(_)) => {
                b.append(" LIMIT ");
                b.append(ctx.dialect().unlimited());
            }
            (None, None) => {}
        }
        if let Some(offset) = extras.offset {
            b.append(" OFFSET ");
            b.append_param(offset.into());
        }
        Ok(())
    }

    fn sql_what(&self) -> Vec<SqlWhatField<'_>> {
        self.what
            .iter()
            .flat_map(|f| {
                f.value.db_exprs().into_iter().map(move |expr| SqlWhatField {
                    expr,
                    flags: f.flags,
                })
            })
            .collect()
    }

    /// Explicit filter AND-ed with the mandatory predicate of every FROM entity.
    fn full_where(&self) -> AtResult<Option<DbExpr>> {
        let mut exprs = Vec::new();
        if let Some(w) = &self.where_expr {
            exprs.push(w.clone());
        }
        for at in &self.from {
            if let Some(extra) = &at.entity.extra_where {
                at.entity.attribute(&extra.attribute)?;
                exprs.push(
                    DbExpr::entity(at)
                        .attr(&extra.attribute)
                        .eq(DbExpr::param(extra.value.clone())),
                );
            }
        }
        Ok(DbExpr::and_chain(exprs))
    }

    fn translate_where(
        &self,
        ctx: &SqlGenContext,
        frame: &Frame,
    ) -> AtResult<Option<ParameterizedSql>> {
        match self.full_where()? {
            Some(expr) => Ok(Some(translate_expr(ctx, frame, &expr)?)),
            None => Ok(None),
        }
    }

    fn translate_order_by(
        &self,
        ctx: &SqlGenContext,
        frame: &Frame,
        fields: &[SqlWhatField<'_>],
        extras: RtExtras,
    ) -> AtResult<Vec<ParameterizedSql>> {
        self.order_by_elements(fields, extras)
            .into_iter()
            .map(|element| {
                ParameterizedSql::generate(|b| match element {
                    OrderByElement::Expr(expr, direction) => {
                        expr.to_sql(ctx, frame, b)?;
                        if !direction.is_asc() {
                            b.append(" DESC");
                        }
                        Ok(())
                    }
                    OrderByElement::Entity(entity) => {
                        let alias = ctx.entity_alias(entity)?;
                        b.append_column(&alias.name, &entity.entity.rowid_column);
                        Ok(())
                    }
                })
            })
            .collect()
    }

    /// First applicable rule wins: explicit sorts, else group keys, else identities.
    fn order_by_elements<'a>(
        &'a self,
        fields: &[SqlWhatField<'a>],
        extras: RtExtras,
    ) -> Vec<OrderByElement<'a>> {
        let sorted: Vec<OrderByElement<'a>> = fields
            .iter()
            .filter_map(|f| f.flags.sort.map(|dir| OrderByElement::Expr(f.expr, dir)))
            .collect();
        if !sorted.is_empty() {
            return sorted;
        }

        let has_group = fields.iter().any(|f| f.flags.group);
        if has_group || fields.iter().any(|f| f.flags.aggregate) {
            return fields
                .iter()
                .filter(|f| f.flags.group)
                .map(|f| OrderByElement::Expr(f.expr, SortDirection::Asc))
                .collect();
        }

        if self.is_many || !extras.is_empty() {
            return self.from.iter().map(OrderByElement::Entity).collect();
        }
        Vec::new()
    }
}

fn translate_expr(ctx: &SqlGenContext, frame: &Frame, expr: &DbExpr) -> AtResult<ParameterizedSql> {
    ParameterizedSql::generate(|b| expr.to_sql(ctx, frame, b))
}

fn translate_what(
    ctx: &SqlGenContext,
    frame: &Frame,
    fields: &[SqlWhatField<'_>],
) -> AtResult<Vec<ParameterizedSql>> {
    let sqls = fields
        .iter()
        .filter(|f| !f.flags.omit)
        .map(|f| translate_expr(ctx, frame, f.expr))
        .collect::<AtResult<Vec<_>>>()?;
    if sqls.is_empty() {
        Ok(vec![ParameterizedSql::new("0", Vec::new())])
    } else {
        Ok(sqls)
    }
}

fn translate_group_by(
    ctx: &SqlGenContext,
    frame: &Frame,
    fields: &[SqlWhatField<'_>],
) -> AtResult<Vec<ParameterizedSql>> {
    fields
        .iter()
        .filter(|f| f.flags.group)
        .map(|f| translate_expr(ctx, frame, f.expr))
        .collect()
}

fn translate_from_item(entity: &FromEntity) -> ParameterizedSql {
    let mut b = SqlBuilder::new();
    b.append_name(&entity.alias.entity.table);
    b.append(" ");
    b.append(&entity.alias.name);

    for join in &entity.joins {
        b.append(" INNER JOIN ");
        b.append_name(&join.alias.entity.table);
        b.append(" ");
        b.append(&join.alias.name);
        b.append(" ON ");
        b.append_column(&join.base.name, &join.column);
        b.append(" = ");
        b.append_column(&join.alias.name, &join.alias.entity.rowid_column);
    }

    b.build()
}

fn append_clause(b: &mut SqlBuilder, clause: &str, sqls: &[ParameterizedSql]) {
    if sqls.is_empty() {
        return;
    }
    b.append(clause);
    b.append(" ");
    for (i, sql) in sqls.iter().enumerate() {
        if i > 0 {
            b.append(", ");
        }
        b.append_sql(sql);
    }
}
