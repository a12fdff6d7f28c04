//! atquery - At-expression evaluation bound to a SQLite store.
//!
//! The evaluators themselves live in [`atquery_core`]. This package adds what a host
//! needs around them:
//!
//! - [`EngineConfig`]: dialect, query limits and log filter from TOML and environment
//! - [`logging::init_tracing`]: tracing subscriber setup
//! - [`SqliteExecutor`]: a `rusqlite` backed [`SqlExecutor`] plus table DDL and fixture loading
//! - [`QuerySession`]: runs collection and database at-expressions under one configuration

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;

pub use atquery_core::*;
pub use config::EngineConfig;
pub use error::{QueryError, QueryResult};
pub use session::QuerySession;
pub use storage::{create_table_sql, SqliteExecutor};
