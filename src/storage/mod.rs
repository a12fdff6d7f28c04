//! SQLite storage for persisted entities.

mod schema;
mod sqlite;

pub use schema::{create_table_sql, insert_row_sql};
pub use sqlite::SqliteExecutor;
