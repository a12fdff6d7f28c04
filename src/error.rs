use atquery_core::AtError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Query(#[from] AtError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid row for entity '{entity}': {message}")]
    InvalidRow { entity: String, message: String },
}

pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// The at-expression failure behind this error, if any
    pub fn as_at_error(&self) -> Option<&AtError> {
        match self {
            QueryError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
