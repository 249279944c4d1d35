#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("SQL connection error: {0}")]
    ConnectionError(#[source] sqlx::Error),
    #[error("SQL query error: {0}")]
    QueryError(#[source] sqlx::Error),
}

impl From<sqlx::Error> for SqlError {
    fn from(error: sqlx::Error) -> Self {
        SqlError::QueryError(error)
    }
}
