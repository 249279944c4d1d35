use crate::session_store::configuration::{validate_table_name, ConfigurationError};

/// Every statement the relation issues, parameterised by table name.
#[derive(Clone, Copy, Debug)]
pub enum Query {
    CreateTable,
    CreateKeyIndex,
    /// `$1` id, `$2` name.
    Load,
    /// `$1` id, `$2` name, `$3` key, `$4` value.
    Insert,
    /// `$1` id, `$2` name.
    DeleteSession,
    /// `$1` id.
    DeleteAll,
    /// First page of markers. `$1` reserved key, `$2` page size.
    ScanLastUpdated,
    /// Next page of markers. `$1` reserved key, `$2` last id seen, `$3` last
    /// name seen, `$4` page size.
    ScanLastUpdatedAfter,
    /// `$1` id, `$2` name, `$3` reserved key, `$4` scanned marker value.
    DeleteStale,
}

impl Query {
    pub fn render(self, table: &str) -> String {
        match self {
            Query::CreateTable => format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
                    id BLOB NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    "key" TEXT NOT NULL,
                    "value" TEXT NOT NULL,
                    PRIMARY KEY (id, name, "key")
                )"#
            ),
            Query::CreateKeyIndex => {
                format!(r#"CREATE INDEX IF NOT EXISTS {table}_key_idx ON {table} ("key", id, name)"#)
            }
            Query::Load => {
                format!(r#"SELECT "key", "value" FROM {table} WHERE id = $1 AND name = $2"#)
            }
            Query::Insert => format!(
                r#"INSERT INTO {table} (id, name, "key", "value") VALUES ($1, $2, $3, $4)"#
            ),
            Query::DeleteSession => format!("DELETE FROM {table} WHERE id = $1 AND name = $2"),
            Query::DeleteAll => format!("DELETE FROM {table} WHERE id = $1"),
            Query::ScanLastUpdated => format!(
                r#"SELECT id, name, "value" FROM {table} WHERE "key" = $1
                ORDER BY id, name LIMIT $2"#
            ),
            Query::ScanLastUpdatedAfter => format!(
                r#"SELECT id, name, "value" FROM {table} WHERE "key" = $1 AND (id, name) > ($2, $3)
                ORDER BY id, name LIMIT $4"#
            ),
            Query::DeleteStale => format!(
                r#"DELETE FROM {table} WHERE id = $1 AND name = $2 AND EXISTS (
                    SELECT 1 FROM {table}
                    WHERE id = $1 AND name = $2 AND "key" = $3 AND "value" = $4
                )"#
            ),
        }
    }
}

/// The statements rendered once for a validated table name. sqlx keeps the
/// prepared form of each per connection.
#[derive(Clone, Debug)]
pub struct Queries {
    pub create_table: String,
    pub create_key_index: String,
    pub load: String,
    pub insert: String,
    pub delete_session: String,
    pub delete_all: String,
    pub scan_last_updated: String,
    pub scan_last_updated_after: String,
    pub delete_stale: String,
}

impl Queries {
    pub fn new(table: &str) -> Result<Self, ConfigurationError> {
        validate_table_name(table)?;
        Ok(Self {
            create_table: Query::CreateTable.render(table),
            create_key_index: Query::CreateKeyIndex.render(table),
            load: Query::Load.render(table),
            insert: Query::Insert.render(table),
            delete_session: Query::DeleteSession.render(table),
            delete_all: Query::DeleteAll.render(table),
            scan_last_updated: Query::ScanLastUpdated.render(table),
            scan_last_updated_after: Query::ScanLastUpdatedAfter.render(table),
            delete_stale: Query::DeleteStale.render(table),
        })
    }
}
