//! Database at-expression evaluator: compile, execute, decode.

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{AtError, AtResult};
use crate::expr::Frame;
use crate::plan::{AtExtras, Cardinality, RowDecoder};

use super::builder::{ParameterizedSql, SqlBuilder};
use super::combiner::{combine_values, DbWhatValue};
use super::compile::{DbAtExprBase, DbAtWhatField};
use super::context::SqlGenContext;
use super::expr::DbExpr;
use super::model::DbAtEntity;
use super::SqlType;

/// A nested at-expression rendered as a parenthesised SELECT inside another one.
#[derive(Debug, Clone)]
pub struct DbSubquery {
    base: DbAtExprBase,
    extras: AtExtras,
}

impl DbSubquery {
    pub fn base(&self) -> &DbAtExprBase {
        &self.base
    }

    pub(crate) fn to_sql(&self, ctx: &SqlGenContext, frame: &Frame, b: &mut SqlBuilder) -> AtResult<()> {
        let extras = self.extras.evaluate(frame)?;
        self.base.build_nested_sql(ctx, frame, b, extras)
    }
}

/// Immutable plan of a database at-expression.
#[derive(Debug, Clone)]
pub struct DbAtExpr {
    base: DbAtExprBase,
    cardinality: Cardinality,
    extras: AtExtras,
    row_decoder: RowDecoder,
}

#[derive(Debug, Clone)]
pub struct DbAtExprBuilder {
    from: Vec<DbAtEntity>,
    where_expr: Option<DbExpr>,
    what: Vec<DbAtWhatField>,
    cardinality: Cardinality,
    extras: AtExtras,
    row_decoder: Option<RowDecoder>,
}

impl DbAtExprBuilder {
    pub fn filter(mut self, expr: DbExpr) -> Self {
        self.where_expr = Some(expr);
        self
    }

    pub fn field(mut self, field: DbAtWhatField) -> Self {
        self.what.push(field);
        self
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn extras(mut self, extras: AtExtras) -> Self {
        self.extras = extras;
        self
    }

    pub fn decoder(mut self, decoder: RowDecoder) -> Self {
        self.row_decoder = Some(decoder);
        self
    }

    pub fn build(self) -> AtResult<DbAtExpr> {
        let (base, row_decoder) = self.base()?;
        Ok(DbAtExpr {
            base,
            cardinality: self.cardinality,
            extras: self.extras,
            row_decoder,
        })
    }

    /// Build for use inside another at-expression (scalar, `EXISTS` or `IN`).
    pub fn build_subquery(self) -> AtResult<DbSubquery> {
        let (base, _) = self.base()?;
        Ok(DbSubquery {
            base,
            extras: self.extras,
        })
    }

    fn base(&self) -> AtResult<(DbAtExprBase, RowDecoder)> {
        let first = self
            .from
            .first()
            .ok_or_else(|| AtError::plan("at-expression has no entities in FROM"))?;

        // no what-part: the entity itself, i.e. its identity
        let what = if self.what.is_empty() {
            vec![DbAtWhatField::new(DbWhatValue::db(
                DbExpr::entity(first),
                SqlType::Integer,
            ))]
        } else {
            self.what.clone()
        };

        let selected: Vec<&DbAtWhatField> = what.iter().filter(|f| !f.flags.omit).collect();
        let row_decoder = match &self.row_decoder {
            Some(d) => d.clone(),
            None => {
                let names: Vec<Option<String>> = selected.iter().map(|f| f.name.clone()).collect();
                RowDecoder::for_fields(&names)
            }
        };
        match &row_decoder {
            RowDecoder::Simple if selected.len() != 1 => {
                return Err(AtError::plan(format!(
                    "simple decoder needs one selected field, got {}",
                    selected.len()
                )))
            }
            RowDecoder::Struct(names) if names.len() != selected.len() => {
                return Err(AtError::plan(format!(
                    "struct decoder has {} names for {} selected fields",
                    names.len(),
                    selected.len()
                )))
            }
            _ => {}
        }

        let base = DbAtExprBase::new(
            self.from.clone(),
            what,
            self.where_expr.clone(),
            self.cardinality.is_many(),
        )?;
        Ok((base, row_decoder))
    }
}

impl DbAtExpr {
    pub fn builder(from: Vec<DbAtEntity>) -> DbAtExprBuilder {
        DbAtExprBuilder {
            from,
            where_expr: None,
            what: Vec::new(),
            cardinality: Cardinality::ZeroOrMore,
            extras: AtExtras::NONE,
            row_decoder: None,
        }
    }

    pub fn base(&self) -> &DbAtExprBase {
        &self.base
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// The statement a call with this frame would run.
    pub fn compile(&self, frame: &Frame) -> AtResult<ParameterizedSql> {
        let extras = self.extras.evaluate(frame)?;
        self.base.build_sql(frame, extras)
    }

    pub fn evaluate(&self, frame: &Frame) -> AtResult<Vec<Value>> {
        let extras = self.extras.evaluate(frame)?;
        if extras.limit == Some(0) {
            self.cardinality.check(0)?;
            return Ok(Vec::new());
        }

        let sql = self.base.build_sql(frame, extras)?;
        sql.check_params()?;
        debug!(sql = %sql.sql, params = sql.params.len(), "Executing database at-expression");

        let rows = frame
            .executor()?
            .execute(&sql, self.base.result_types())?;

        let max_rows = frame.limits().max_result_rows;
        if rows.len() > max_rows {
            warn!(
                rows = rows.len(),
                max_rows, "Database at-expression exceeded max_result_rows"
            );
            return Err(AtError::eval(format!(
                "Result limit exceeded: {} rows, at most {} allowed",
                rows.len(),
                max_rows
            )));
        }

        let combiners = self.base.combiners();
        let placeholder_only = self.base.result_types().is_empty();
        let mut result = Vec::with_capacity(rows.len());
        for mut row in rows {
            // `SELECT 0` carries no field value
            if placeholder_only {
                row.clear();
            }
            let values = combine_values(&combiners, frame, row)?;
            result.push(self.row_decoder.decode(values)?);
        }

        trace!(rows = result.len(), "Database at-expression decoded");
        self.cardinality.check(result.len())?;
        Ok(result)
    }

    pub fn evaluate_value(&self, frame: &Frame) -> AtResult<Value> {
        let values = self.evaluate(frame)?;
        self.cardinality.wrap(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOperator, Expression, FunctionRegistry};
    use crate::plan::{QueryLimits, SortDirection};
    use crate::sql::model::{AtExprId, AttributeDef, EntityDef};
    use crate::sql::{AggregateFunction, SqlDialect, SqlExecutor};
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Records statements and replays canned rows.
    struct MockExecutor {
        rows: Vec<Vec<Value>>,
        seen: RefCell<Vec<ParameterizedSql>>,
    }

    impl MockExecutor {
        fn new(rows: Vec<Vec<Value>>) -> Self {
            Self {
                rows,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl SqlExecutor for MockExecutor {
        fn execute(&self, sql: &ParameterizedSql, _: &[SqlType]) -> AtResult<Vec<Vec<Value>>> {
            self.seen.borrow_mut().push(sql.clone());
            Ok(self.rows.clone())
        }
    }

    struct Schema {
        company: Arc<EntityDef>,
        user: Arc<EntityDef>,
    }

    fn schema() -> Schema {
        let company = Arc::new(EntityDef::new(
            "company",
            vec![AttributeDef::new("name", SqlType::Text)],
        ));
        let user = Arc::new(EntityDef::new(
            "user",
            vec![
                AttributeDef::new("name", SqlType::Text),
                AttributeDef::new("score", SqlType::Integer),
                AttributeDef::reference("company", company.clone()),
            ],
        ));
        Schema { company, user }
    }

    fn compile(expr: &DbAtExpr) -> ParameterizedSql {
        let functions = FunctionRegistry::new();
        let frame = Frame::new(&functions);
        expr.compile(&frame).unwrap()
    }

    fn name_of(at: &DbAtEntity) -> DbAtWhatField {
        DbAtWhatField::new(DbWhatValue::db(DbExpr::entity(at).attr("name"), SqlType::Text))
    }

    #[test]
    fn test_simple_select_orders_by_identity() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .filter(
                DbExpr::entity(&u)
                    .rel("company")
                    .attr("name")
                    .eq(DbExpr::value("Acme")),
            )
            .field(name_of(&u))
            .build()
            .unwrap();
        let sql = compile(&expr);
        assert_eq!(
            sql.sql,
            r#"SELECT A00."name" FROM "user" A00 INNER JOIN "company" A01 ON A00."company" = A01."rowid" WHERE (A01."name" = ?) ORDER BY A00."rowid""#
        );
        assert_eq!(sql.params, vec![json!("Acme")]);
    }

    #[test]
    fn test_single_row_has_no_order_by() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .cardinality(Cardinality::One)
            .build()
            .unwrap();
        assert_eq!(compile(&expr).sql, r#"SELECT A00."name" FROM "user" A00"#);

        // paging still needs a stable order
        let paged = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .cardinality(Cardinality::ZeroOrOne)
            .extras(AtExtras::offset(1))
            .build()
            .unwrap();
        assert_eq!(
            compile(&paged).sql,
            r#"SELECT A00."name" FROM "user" A00 ORDER BY A00."rowid" LIMIT ALL OFFSET ?"#
        );
    }

    #[test]
    fn test_group_by_orders_by_keys() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::entity(&u).rel("company").attr("name"),
                    SqlType::Text,
                ))
                .group(),
            )
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::aggregate(AggregateFunction::Sum, DbExpr::entity(&u).attr("score")),
                    SqlType::Integer,
                ))
                .aggregate(),
            )
            .extras(AtExtras::limit(10))
            .build()
            .unwrap();
        let sql = compile(&expr);
        assert_eq!(
            sql.sql,
            r#"SELECT A01."name", COALESCE(SUM(A00."score"), 0) FROM "user" A00 INNER JOIN "company" A01 ON A00."company" = A01."rowid" GROUP BY A01."name" ORDER BY A01."name" LIMIT ?"#
        );
        assert_eq!(sql.params, vec![json!(10)]);
    }

    #[test]
    fn test_explicit_sort_wins_and_omitted_fields_are_not_selected() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::entity(&u).attr("score"),
                    SqlType::Integer,
                ))
                .sort(SortDirection::Desc)
                .omit(),
            )
            .extras(AtExtras::limit_offset(5, 10))
            .build()
            .unwrap();
        let sql = compile(&expr);
        assert_eq!(
            sql.sql,
            r#"SELECT A00."name" FROM "user" A00 ORDER BY A00."score" DESC LIMIT ? OFFSET ?"#
        );
        assert_eq!(sql.params, vec![json!(5), json!(10)]);
        assert_eq!(expr.base().result_types(), &[SqlType::Text]);
    }

    #[test]
    fn test_placeholder_projection() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(DbAtWhatField::new(DbWhatValue::host(Expression::literal(1))))
            .build()
            .unwrap();
        assert_eq!(
            compile(&expr).sql,
            r#"SELECT 0 FROM "user" A00 ORDER BY A00."rowid""#
        );
    }

    #[test]
    fn test_placeholder_column_is_dropped() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(DbAtWhatField::new(DbWhatValue::host(Expression::literal("x"))))
            .build()
            .unwrap();

        let functions = FunctionRegistry::new();
        let full = MockExecutor::new(vec![vec![json!(0)], vec![json!(0)]]);
        let frame = Frame::new(&functions).with_executor(&full);
        assert_eq!(expr.evaluate(&frame).unwrap(), vec![json!("x"), json!("x")]);

        let trimmed = MockExecutor::new(vec![vec![], vec![]]);
        let frame = Frame::new(&functions).with_executor(&trimmed);
        assert_eq!(expr.evaluate(&frame).unwrap(), vec![json!("x"), json!("x")]);
    }

    #[test]
    fn test_extra_where_is_conjoined() {
        let scoped = Arc::new(
            EntityDef::new("company", vec![AttributeDef::new("name", SqlType::Text)])
                .with_table("c1.company")
                .with_extra_where("name", Expression::var("tenant")),
        );
        let c = DbAtEntity::new(scoped, AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![c.clone()])
            .filter(DbExpr::binary(
                DbExpr::entity(&c),
                BinaryOperator::GreaterThan,
                DbExpr::value(3),
            ))
            .cardinality(Cardinality::One)
            .build()
            .unwrap();

        let functions = FunctionRegistry::new();
        let mut frame = Frame::new(&functions);
        frame.set_variable("tenant", json!("acme"));
        let sql = expr.compile(&frame).unwrap();
        assert_eq!(
            sql.sql,
            r#"SELECT A00."rowid" FROM "c1.company" A00 WHERE ((A00."rowid" > ?) AND (A00."name" = ?))"#
        );
        assert_eq!(sql.params, vec![json!(3), json!("acme")]);
    }

    #[test]
    fn test_correlated_subquery() {
        let s = schema();
        let c = DbAtEntity::new(s.company.clone(), AtExprId(0), 0);
        let u = DbAtEntity::new(s.user.clone(), AtExprId(1), 0);

        let total = DbAtExpr::builder(vec![u.clone()])
            .filter(DbExpr::entity(&u).rel("company").eq(DbExpr::entity(&c)))
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::aggregate(AggregateFunction::Sum, DbExpr::entity(&u).attr("score")),
                    SqlType::Integer,
                ))
                .aggregate(),
            )
            .cardinality(Cardinality::One)
            .build_subquery()
            .unwrap();

        let expr = DbAtExpr::builder(vec![c.clone()])
            .field(name_of(&c).named("name"))
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::subquery(Arc::new(total)),
                    SqlType::Integer,
                ))
                .named("total"),
            )
            .build()
            .unwrap();

        assert_eq!(
            compile(&expr).sql,
            r#"SELECT A00."name", (SELECT COALESCE(SUM(A01."score"), 0) FROM "user" A01 INNER JOIN "company" A02 ON A01."company" = A02."rowid" WHERE (A02."rowid" = A00."rowid")) FROM "company" A00 ORDER BY A00."rowid""#
        );
    }

    #[test]
    fn test_exists_joins_outer_alias_in_outer_from() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let c = DbAtEntity::new(s.company.clone(), AtExprId(1), 0);

        let sub = DbAtExpr::builder(vec![c.clone()])
            .filter(
                DbExpr::entity(&c)
                    .attr("name")
                    .eq(DbExpr::entity(&u).rel("company").attr("name")),
            )
            .build_subquery()
            .unwrap();
        let expr = DbAtExpr::builder(vec![u.clone()])
            .filter(DbExpr::exists(Arc::new(sub)))
            .field(name_of(&u))
            .build()
            .unwrap();

        assert_eq!(
            compile(&expr).sql,
            r#"SELECT A00."name" FROM "user" A00 INNER JOIN "company" A02 ON A00."company" = A02."rowid" WHERE EXISTS(SELECT A01."rowid" FROM "company" A01 WHERE (A01."name" = A02."name") ORDER BY A01."rowid") ORDER BY A00."rowid""#
        );
    }

    #[test]
    fn test_sqlite_offset_without_limit() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .extras(AtExtras::offset(2))
            .build()
            .unwrap();
        let functions = FunctionRegistry::new();
        let frame = Frame::new(&functions).with_dialect(SqlDialect::Sqlite);
        assert_eq!(
            expr.compile(&frame).unwrap().sql,
            r#"SELECT A00."name" FROM "user" A00 ORDER BY A00."rowid" LIMIT -1 OFFSET ?"#
        );
    }

    #[test]
    fn test_evaluate_decodes_through_combiners() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u).named("name"))
            .field(DbAtWhatField::new(DbWhatValue::host(Expression::var("k"))).named("k"))
            .field(
                DbAtWhatField::new(DbWhatValue::db(
                    DbExpr::entity(&u).attr("score"),
                    SqlType::Integer,
                ))
                .named("score"),
            )
            .build()
            .unwrap();

        let executor = MockExecutor::new(vec![
            vec![json!("Bob"), json!(3)],
            vec![json!("Ann"), json!(5)],
        ]);
        let functions = FunctionRegistry::new();
        let mut frame = Frame::new(&functions).with_executor(&executor);
        frame.set_variable("k", json!(true));

        let out = expr.evaluate(&frame).unwrap();
        assert_eq!(
            out,
            vec![
                json!({"name": "Bob", "k": true, "score": 3}),
                json!({"name": "Ann", "k": true, "score": 5}),
            ]
        );
        assert_eq!(executor.seen.borrow().len(), 1);
    }

    #[test]
    fn test_evaluate_limits_and_cardinality() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let one = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .cardinality(Cardinality::One)
            .build()
            .unwrap();

        let executor = MockExecutor::new(vec![vec![json!("a")], vec![json!("b")]]);
        let functions = FunctionRegistry::new();
        let frame = Frame::new(&functions).with_executor(&executor);
        match one.evaluate_value(&frame) {
            Err(AtError::CardinalityError { count, .. }) => assert_eq!(count, 2),
            other => panic!("expected cardinality error, got {:?}", other),
        }

        let strict = Frame::new(&functions)
            .with_executor(&executor)
            .with_limits(QueryLimits {
                max_result_rows: 1,
                ..QueryLimits::default()
            });
        let many = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .build()
            .unwrap();
        assert!(matches!(
            many.evaluate(&strict),
            Err(AtError::EvaluationError(_))
        ));

        let none = DbAtExpr::builder(vec![u.clone()])
            .field(name_of(&u))
            .extras(AtExtras::limit(0))
            .build()
            .unwrap();
        assert!(none.evaluate(&frame).unwrap().is_empty());
        assert_eq!(executor.seen.borrow().len(), 2);
    }

    #[test]
    fn test_no_executor() {
        let s = schema();
        let u = DbAtEntity::new(s.user.clone(), AtExprId(0), 0);
        let expr = DbAtExpr::builder(vec![u]).build().unwrap();
        let functions = FunctionRegistry::new();
        let frame = Frame::new(&functions);
        assert!(matches!(
            expr.evaluate(&frame),
            Err(AtError::EvaluationError(_))
        ));
    }
}
