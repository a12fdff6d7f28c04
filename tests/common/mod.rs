//! Common test utilities for at-expression tests
//!
//! Provides shared helper functions for:
//! - Defining the `company` / `user` entities
//! - Seeding an in-memory or file-backed SQLite database
//! - Building sessions and counting host function calls

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atquery::{
    AttributeDef, EngineConfig, EntityDef, FunctionRegistry, QuerySession, SqlType,
    SqliteExecutor,
};
use serde_json::{json, Value};
use tempfile::TempDir;

pub struct Schema {
    pub company: Arc<EntityDef>,
    pub user: Arc<EntityDef>,
}

pub fn schema() -> Schema {
    let company = Arc::new(EntityDef::new(
        "company",
        vec![
            AttributeDef::new("name", SqlType::Text),
            AttributeDef::new("city", SqlType::Text),
        ],
    ));
    let user = Arc::new(EntityDef::new(
        "user",
        vec![
            AttributeDef::new("name", SqlType::Text),
            AttributeDef::new("score", SqlType::Integer),
            AttributeDef::new("active", SqlType::Boolean),
            AttributeDef::reference("company", company.clone()),
        ],
    ));
    Schema { company, user }
}

pub const COMPANIES: &[(&str, &str)] = &[("Acme", "Paris"), ("Globex", "Berlin"), ("Initech", "Paris")];

/// (name, score, active, company rowid)
pub const USERS: &[(&str, i64, bool, i64)] = &[
    ("Alice", 30, true, 1),
    ("Bob", 25, true, 1),
    ("Carol", 35, false, 2),
    ("Dave", 28, true, 3),
    ("Eve", 40, true, 2),
];

pub fn seed(db: &SqliteExecutor, schema: &Schema) {
    db.create_entity(&schema.company).expect("Failed to create company");
    db.create_entity(&schema.user).expect("Failed to create user");

    for (name, city) in COMPANIES {
        db.insert_row(&schema.company, &json!({"name": name, "city": city}))
            .unwrap();
    }
    for (name, score, active, company) in USERS {
        db.insert_row(
            &schema.user,
            &json!({"name": name, "score": score, "active": active, "company": company}),
        )
        .unwrap();
    }
}

pub fn create_seeded_db() -> (SqliteExecutor, Schema) {
    let db = SqliteExecutor::open_in_memory().expect("Failed to open in-memory database");
    let schema = schema();
    seed(&db, &schema);
    (db, schema)
}

pub fn create_seeded_file_db() -> (TempDir, std::path::PathBuf, Schema) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = tmp_dir.path().join("atquery.db");
    let schema = schema();
    {
        let db = open_file_db(&path);
        seed(&db, &schema);
    }
    (tmp_dir, path, schema)
}

pub fn open_file_db(path: &Path) -> SqliteExecutor {
    SqliteExecutor::open(path).expect("Failed to open database file")
}

pub fn create_seeded_session() -> (QuerySession, Schema) {
    create_seeded_session_with(EngineConfig::default())
}

pub fn create_seeded_session_with(config: EngineConfig) -> (QuerySession, Schema) {
    let (db, schema) = create_seeded_db();
    (QuerySession::new(config).with_executor(db), schema)
}

/// Register `name` as an identity function that counts its calls.
pub fn register_counter(functions: &mut FunctionRegistry, name: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    functions.register(name, move |args: &[Value]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(args.first().cloned().unwrap_or(Value::Bool(true)))
    });
    calls
}

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Order-insensitive comparison for results of queries without an explicit sort.
pub fn sorted(mut values: Vec<Value>) -> Vec<Value> {
    values.sort_by(atquery::compare_values);
    values
}
