//! DDL and DML for entity tables.

use atquery_core::sql::SqlBuilder;
use atquery_core::{AtResult, EntityDef, ParameterizedSql};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// `CREATE TABLE` for an entity: identity first, then one column per attribute.
/// Reference attributes get a foreign key to the target's identity.
pub fn create_table_sql(entity: &EntityDef) -> String {
    let mut b = SqlBuilder::new();
    b.append("CREATE TABLE IF NOT EXISTS ");
    b.append_name(&entity.table);
    b.append(" (");
    b.append_name(&entity.rowid_column);
    b.append(" INTEGER PRIMARY KEY");

    for attr in &entity.attributes {
        b.append(", ");
        b.append_name(&attr.column);
        b.append(" ");
        b.append(attr.sql_type.ddl_name());
        if let Some(target) = &attr.reference {
            b.append(" REFERENCES ");
            b.append_name(&target.table);
            b.append("(");
            b.append_name(&target.rowid_column);
            b.append(")");
        }
    }

    b.append(")");
    b.build().sql
}

/// `INSERT` of one row given as an object keyed by attribute name.
///
/// A `rowid` key sets the identity explicitly; missing attributes are stored as NULL.
pub fn insert_row_sql(entity: &EntityDef, row: &Value) -> QueryResult<ParameterizedSql> {
    let invalid = |message: String| QueryError::InvalidRow {
        entity: entity.name.clone(),
        message,
    };

    let obj = row
        .as_object()
        .ok_or_else(|| invalid(format!("expected an object, got {}", row)))?;

    for key in obj.keys() {
        if key != "rowid" && entity.attribute(key).is_err() {
            return Err(invalid(format!("unknown attribute '{}'", key)));
        }
    }

    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(rowid) = obj.get("rowid") {
        columns.push(&entity.rowid_column);
        values.push(rowid.clone());
    }
    for attr in &entity.attributes {
        columns.push(&attr.column);
        values.push(obj.get(&attr.name).cloned().unwrap_or(Value::Null));
    }

    let sql = ParameterizedSql::generate(|b| -> AtResult<()> {
        b.append("INSERT INTO ");
        b.append_name(&entity.table);
        b.append(" (");
        b.append_list(&columns, ", ", |b, column| {
            b.append_name(column);
            Ok(())
        })?;
        b.append(") VALUES (");
        b.append_list(&values, ", ", |b, value| {
            b.append_param(value.clone());
            Ok(())
        })?;
        b.append(")");
        Ok(())
    })?;
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atquery_core::{AttributeDef, SqlType};
    use serde_json::json;
    use std::sync::Arc;

    fn entities() -> (Arc<EntityDef>, EntityDef) {
        let company = Arc::new(EntityDef::new(
            "company",
            vec![AttributeDef::new("name", SqlType::Text)],
        ));
        let user = EntityDef::new(
            "user",
            vec![
                AttributeDef::new("name", SqlType::Text),
                AttributeDef::new("score", SqlType::Real).with_column("score_value"),
                AttributeDef::reference("company", company.clone()),
            ],
        );
        (company, user)
    }

    #[test]
    fn test_create_table() {
        let (company, user) = entities();
        assert_eq!(
            create_table_sql(&company),
            r#"CREATE TABLE IF NOT EXISTS "company" ("rowid" INTEGER PRIMARY KEY, "name" TEXT)"#
        );
        assert_eq!(
            create_table_sql(&user),
            r#"CREATE TABLE IF NOT EXISTS "user" ("rowid" INTEGER PRIMARY KEY, "name" TEXT, "score_value" DOUBLE PRECISION, "company" BIGINT REFERENCES "company"("rowid"))"#
        );
    }

    #[test]
    fn test_insert_row() {
        let (_, user) = entities();
        let sql = insert_row_sql(&user, &json!({"rowid": 7, "name": "Bob", "company": 1})).unwrap();
        assert_eq!(
            sql.sql,
            r#"INSERT INTO "user" ("rowid", "name", "score_value", "company") VALUES (?, ?, ?, ?)"#
        );
        assert_eq!(sql.params, vec![json!(7), json!("Bob"), json!(null), json!(1)]);

        let sql = insert_row_sql(&user, &json!({"name": "Ann"})).unwrap();
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn test_insert_invalid_row() {
        let (_, user) = entities();
        assert!(matches!(
            insert_row_sql(&user, &json!({"age": 3})),
            Err(QueryError::InvalidRow { .. })
        ));
        assert!(insert_row_sql(&user, &json!([1, 2])).is_err());
    }
}
