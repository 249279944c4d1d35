mod error;
mod queries;
mod relation;
mod sqlite_database;

pub use error::SqlError;
pub use queries::{Queries, Query};
pub use relation::{LastUpdated, SessionRelation};
pub use sqlite_database::SqliteDatabase;

#[cfg(test)]
pub(crate) use sqlite_database::{temporary_database, temporary_rollback_database};
