//! SQLite-backed SQL executor
//!
//! Runs the statements compiled by database at-expressions against a
//! `rusqlite::Connection` and decodes each column by its declared [`SqlType`].

use std::path::Path;

use atquery_core::sql::SqlBuilder;
use atquery_core::{
    AtError, AtResult, EntityDef, ParameterizedSql, SqlDialect, SqlExecutor, SqlType,
};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use tracing::{debug, trace};

use super::schema::{create_table_sql, insert_row_sql};
use crate::error::QueryResult;

pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> QueryResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> QueryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Statements for this executor must be generated in this dialect
    pub fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the table of an entity if it does not exist yet
    pub fn create_entity(&self, entity: &EntityDef) -> QueryResult<()> {
        let sql = create_table_sql(entity);
        debug!(entity = %entity.name, "{}", sql);
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    /// Insert one row (an object keyed by attribute name) and return its identity
    pub fn insert_row(&self, entity: &EntityDef, row: &Value) -> QueryResult<i64> {
        let sql = insert_row_sql(entity, row)?;
        let params = sql
            .params
            .iter()
            .map(to_sqlite_value)
            .collect::<AtResult<Vec<_>>>()?;
        self.conn.execute(&sql.sql, params_from_iter(params))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Read a whole table in identity order.
    ///
    /// Each row becomes an object with `rowid` first, then one key per attribute in
    /// declaration order; reference attributes hold the target's identity.
    pub fn mirror(&self, entity: &EntityDef) -> QueryResult<Vec<Value>> {
        let mut b = SqlBuilder::new();
        b.append("SELECT ");
        b.append_name(&entity.rowid_column);
        for attr in &entity.attributes {
            b.append(", ");
            b.append_name(&attr.column);
        }
        b.append(" FROM ");
        b.append_name(&entity.table);
        b.append(" ORDER BY ");
        b.append_name(&entity.rowid_column);
        let sql = b.build();

        let types: Vec<SqlType> = std::iter::once(SqlType::Integer)
            .chain(entity.attributes.iter().map(|a| a.sql_type))
            .collect();
        let names: Vec<&str> = std::iter::once("rowid")
            .chain(entity.attributes.iter().map(|a| a.name.as_str()))
            .collect();

        let rows = self.query(&sql, &types)?;
        let objects = rows
            .into_iter()
            .map(|row| {
                let obj: Map<String, Value> = names
                    .iter()
                    .map(|name| name.to_string())
                    .zip(row)
                    .collect();
                Value::Object(obj)
            })
            .collect();
        Ok(objects)
    }

    fn query(&self, sql: &ParameterizedSql, column_types: &[SqlType]) -> QueryResult<Vec<Vec<Value>>> {
        let params = sql
            .params
            .iter()
            .map(to_sqlite_value)
            .collect::<AtResult<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(&sql.sql)?;
        let raw_rows = stmt
            .query_map(params_from_iter(params), |row| {
                (0..column_types.len())
                    .map(|i| row.get::<_, SqliteValue>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let rows = raw_rows
            .into_iter()
            .map(|raw| {
                raw.into_iter()
                    .zip(column_types)
                    .enumerate()
                    .map(|(i, (value, ty))| decode_column(i, value, *ty))
                    .collect::<AtResult<Vec<_>>>()
            })
            .collect::<AtResult<Vec<_>>>()?;
        Ok(rows)
    }
}

impl SqlExecutor for SqliteExecutor {
    fn execute(
        &self,
        sql: &ParameterizedSql,
        column_types: &[SqlType],
    ) -> AtResult<Vec<Vec<Value>>> {
        trace!(params = sql.params.len(), "SQLite execute: {}", sql.sql);
        self.query(sql, column_types).map_err(|e| match e {
            crate::error::QueryError::Query(at) => at,
            other => AtError::execution(other),
        })
    }
}

/// Host value to bound SQLite value. Booleans are stored as 0/1.
fn to_sqlite_value(value: &Value) -> AtResult<SqliteValue> {
    match value {
        Value::Null => Ok(SqliteValue::Null),
        Value::Bool(b) => Ok(SqliteValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqliteValue::Integer(i))
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).map(SqliteValue::Integer).map_err(|_| {
                    AtError::eval(format!("Integer parameter out of range: {}", u))
                })
            } else {
                Ok(SqliteValue::Real(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Value::String(s) => Ok(SqliteValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(AtError::eval(format!(
            "Cannot bind {} as a SQL parameter",
            value
        ))),
    }
}

fn decode_column(index: usize, value: SqliteValue, ty: SqlType) -> AtResult<Value> {
    let mismatch = |value: &SqliteValue| {
        AtError::execution(rusqlite::Error::InvalidColumnType(
            index,
            format!("{:?}", ty),
            value.data_type(),
        ))
    };

    match (ty, value) {
        (_, SqliteValue::Null) => Ok(Value::Null),
        (SqlType::Integer, SqliteValue::Integer(i)) => Ok(Value::from(i)),
        (SqlType::Real, SqliteValue::Real(f)) => {
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        (SqlType::Real, SqliteValue::Integer(i)) => Ok(Number::from_f64(i as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        (SqlType::Text, SqliteValue::Text(s)) => Ok(Value::String(s)),
        (SqlType::Boolean, SqliteValue::Integer(i)) => Ok(Value::Bool(i != 0)),
        (_, other) => Err(mismatch(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atquery_core::AttributeDef;
    use serde_json::json;

    fn item() -> EntityDef {
        EntityDef::new(
            "item",
            vec![
                AttributeDef::new("name", SqlType::Text),
                AttributeDef::new("price", SqlType::Real),
                AttributeDef::new("active", SqlType::Boolean),
            ],
        )
    }

    #[test]
    fn test_insert_and_mirror() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let item = item();
        db.create_entity(&item).unwrap();

        let id = db
            .insert_row(&item, &json!({"name": "pen", "price": 2, "active": true}))
            .unwrap();
        assert_eq!(id, 1);
        db.insert_row(&item, &json!({"rowid": 10, "name": "ink"}))
            .unwrap();

        let rows = db.mirror(&item).unwrap();
        assert_eq!(
            rows,
            vec![
                json!({"rowid": 1, "name": "pen", "price": 2.0, "active": true}),
                json!({"rowid": 10, "name": "ink", "price": null, "active": null}),
            ]
        );
        // positional keys
        let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["rowid", "name", "price", "active"]);
    }

    #[test]
    fn test_execute_decodes_declared_columns() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let item = item();
        db.create_entity(&item).unwrap();
        db.insert_row(&item, &json!({"name": "pen", "price": 1.5, "active": false}))
            .unwrap();

        let sql = ParameterizedSql::new(
            r#"SELECT "name", "active", 0 FROM "item" WHERE "price" > ?"#,
            vec![json!(1)],
        );
        let rows = db
            .execute(&sql, &[SqlType::Text, SqlType::Boolean])
            .unwrap();
        assert_eq!(rows, vec![vec![json!("pen"), json!(false)]]);
    }

    #[test]
    fn test_execute_errors() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let sql = ParameterizedSql::new("SELECT * FROM missing", Vec::new());
        assert!(matches!(
            db.execute(&sql, &[SqlType::Integer]),
            Err(AtError::ExecutionError(_))
        ));

        let sql = ParameterizedSql::new("SELECT 'x'", Vec::new());
        assert!(matches!(
            db.execute(&sql, &[SqlType::Integer]),
            Err(AtError::ExecutionError(_))
        ));

        let sql = ParameterizedSql::new("SELECT ?", vec![json!([1])]);
        assert!(matches!(
            db.execute(&sql, &[SqlType::Integer]),
            Err(AtError::EvaluationError(_))
        ));

        let sql = ParameterizedSql::new("SELECT ?", vec![json!(u64::MAX)]);
        assert!(matches!(
            db.execute(&sql, &[SqlType::Integer]),
            Err(AtError::EvaluationError(_))
        ));

        let sql = ParameterizedSql::new("SELECT ?", vec![json!(i64::MAX as u64)]);
        assert_eq!(
            db.execute(&sql, &[SqlType::Integer]).unwrap(),
            vec![vec![json!(i64::MAX)]]
        );
    }
}
