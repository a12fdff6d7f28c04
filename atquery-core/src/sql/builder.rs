use serde_json::Value;

use crate::error::{AtError, AtResult};

/// Most bound parameters a single statement may carry.
pub const MAX_SQL_PARAMS: usize = 32767;

/// Statement text with `?` placeholders and the values bound to them, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterizedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl ParameterizedSql {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn generate<F>(generator: F) -> AtResult<Self>
    where
        F: FnOnce(&mut SqlBuilder) -> AtResult<()>,
    {
        let mut b = SqlBuilder::new();
        generator(&mut b)?;
        Ok(b.build())
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.params.is_empty()
    }

    pub fn check_params(&self) -> AtResult<()> {
        if self.params.len() > MAX_SQL_PARAMS {
            return Err(AtError::eval(format!(
                "sql:too_many_params:{}: SQL query is too big ({} parameters)",
                self.params.len(),
                self.params.len()
            )));
        }
        Ok(())
    }
}

/// Append-only buffer for statement text and parameters.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.params.is_empty()
    }

    pub fn append(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Double-quoted identifier
    pub fn append_name(&mut self, name: &str) {
        self.sql.push('"');
        self.sql.push_str(&name.replace('"', "\"\""));
        self.sql.push('"');
    }

    pub fn append_column(&mut self, alias: &str, column: &str) {
        self.append(alias);
        self.append(".");
        self.append_name(column);
    }

    pub fn append_param(&mut self, value: Value) {
        self.sql.push('?');
        self.params.push(value);
    }

    pub fn append_sql(&mut self, sql: &ParameterizedSql) {
        self.sql.push_str(&sql.sql);
        self.params.extend(sql.params.iter().cloned());
    }

    /// Append every item with `sep` between them.
    pub fn append_list<T, F>(&mut self, items: &[T], sep: &str, mut f: F) -> AtResult<()>
    where
        F: FnMut(&mut Self, &T) -> AtResult<()>,
    {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.append(sep);
            }
            f(self, item)?;
        }
        Ok(())
    }

    pub fn build(self) -> ParameterizedSql {
        ParameterizedSql {
            sql: self.sql,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let mut b = SqlBuilder::new();
        assert!(b.is_empty());
        b.append("SELECT ");
        b.append_column("A00", "name");
        b.append(" FROM ");
        b.append_name("user");
        b.append(" A00 WHERE ");
        b.append_column("A00", "age");
        b.append(" > ");
        b.append_param(json!(18));
        let sql = b.build();
        assert_eq!(sql.sql, r#"SELECT A00."name" FROM "user" A00 WHERE A00."age" > ?"#);
        assert_eq!(sql.params, vec![json!(18)]);
    }

    #[test]
    fn test_quoted_name_escapes() {
        let mut b = SqlBuilder::new();
        b.append_name(r#"we"ird"#);
        assert_eq!(b.build().sql, r#""we""ird""#);
    }

    #[test]
    fn test_append_list() {
        let sql = ParameterizedSql::generate(|b| {
            b.append_list(&[1, 2, 3], ", ", |b, v| {
                b.append_param(json!(v));
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(sql.sql, "?, ?, ?");
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn test_too_many_params() {
        let sql = ParameterizedSql::new("", vec![Value::Null; MAX_SQL_PARAMS + 1]);
        assert!(matches!(sql.check_params(), Err(AtError::EvaluationError(_))));
        assert!(ParameterizedSql::default().check_params().is_ok());
    }
}
