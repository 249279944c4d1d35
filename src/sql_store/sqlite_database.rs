use std::str::FromStr;

use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    session_state::SessionState,
    session_store::configuration::{Configuration, ConfigurationError},
    sql_store::{
        queries::Queries,
        relation::{LastUpdated, SessionRelation},
        SqlError,
    },
    SessionKey, StoreError,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Markers read per scan query.
const SCAN_PAGE_SIZE: i64 = 256;

/// Where the marker scan resumes.
enum Cursor {
    Start,
    After(SessionKey, String),
    Done,
}

pub struct SqliteDatabase {
    pool: SqlitePool,
    queries: Queries,
    last_updated_key: String,
}

impl SqliteDatabase {
    /// Opens (creating if needed) the database at `url` in WAL mode and makes
    /// sure the session table exists.
    pub async fn connect(url: &str, config: &Configuration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(SqlError::ConnectionError)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect_with(options, config).await
    }

    pub async fn connect_with(
        options: SqliteConnectOptions,
        config: &Configuration,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(SqlError::ConnectionError)?;
        let database = Self::new(pool, config)?;
        database.migrate().await?;
        tracing::debug!(table = %config.table_name, "session table ready");
        Ok(database)
    }

    /// Wraps an existing pool. The caller runs [`SessionRelation::migrate`].
    pub fn new(pool: SqlitePool, config: &Configuration) -> Result<Self, ConfigurationError> {
        let queries = Queries::new(&config.table_name)?;
        Ok(Self {
            pool,
            queries,
            last_updated_key: config.last_updated_key.clone(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Up to [`SCAN_PAGE_SIZE`] markers ordered by `(id, name)`, starting
    /// after `after`. The query runs to completion, so no cursor outlives it.
    async fn marker_page(
        &self,
        after: Option<(&SessionKey, &str)>,
    ) -> Result<Vec<LastUpdated>, SqlError> {
        let rows = match after {
            None => {
                sqlx::query_as::<_, (Vec<u8>, String, String)>(&self.queries.scan_last_updated)
                    .bind(self.last_updated_key.as_str())
                    .bind(SCAN_PAGE_SIZE)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some((id, name)) => sqlx::query_as::<_, (Vec<u8>, String, String)>(
                &self.queries.scan_last_updated_after,
            )
            .bind(self.last_updated_key.as_str())
            .bind(id.as_bytes())
            .bind(name)
            .bind(SCAN_PAGE_SIZE)
            .fetch_all(&self.pool)
            .await?,
        };
        Ok(rows
            .into_iter()
            .map(|(id, name, value)| LastUpdated {
                id: SessionKey::from(id),
                name,
                value,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl SessionRelation for SqliteDatabase {
    async fn migrate(&self) -> Result<(), SqlError> {
        sqlx::query(&self.queries.create_table)
            .execute(&self.pool)
            .await?;
        sqlx::query(&self.queries.create_key_index)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_attributes(
        &self,
        id: &SessionKey,
        name: &str,
    ) -> Result<SessionState, SqlError> {
        let rows = sqlx::query_as::<_, (String, String)>(&self.queries.load)
            .bind(id.as_bytes())
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn replace_attributes(
        &self,
        id: &SessionKey,
        name: &str,
        state: &SessionState,
    ) -> Result<(), SqlError> {
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.queries.delete_session)
            .bind(id.as_bytes())
            .bind(name)
            .execute(&mut *tx)
            .await?;
        for (key, value) in state {
            sqlx::query(&self.queries.insert)
                .bind(id.as_bytes())
                .bind(name)
                .bind(key.as_str())
                .bind(value.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_attributes(&self, id: &SessionKey, name: &str) -> Result<u64, SqlError> {
        let result = sqlx::query(&self.queries.delete_session)
            .bind(id.as_bytes())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, id: &SessionKey) -> Result<u64, SqlError> {
        let result = sqlx::query(&self.queries.delete_all)
            .bind(id.as_bytes())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Paged so the consumer can write to the table between items without
    // waiting on a cursor this stream keeps open.
    fn scan_last_updated(&self) -> BoxStream<'_, Result<LastUpdated, SqlError>> {
        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let page = match cursor {
                Cursor::Done => return Ok(None),
                Cursor::Start => self.marker_page(None).await?,
                Cursor::After(id, name) => self.marker_page(Some((&id, name.as_str()))).await?,
            };
            let next = match page.last() {
                Some(last) if page.len() as i64 == SCAN_PAGE_SIZE => {
                    Cursor::After(last.id.clone(), last.name.clone())
                }
                _ => Cursor::Done,
            };
            Ok::<_, SqlError>(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn delete_stale(&self, marker: &LastUpdated) -> Result<bool, SqlError> {
        let result = sqlx::query(&self.queries.delete_stale)
            .bind(marker.id.as_bytes())
            .bind(marker.name.as_str())
            .bind(self.last_updated_key.as_str())
            .bind(marker.value.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// A migrated database in a throwaway directory. The directory must outlive
/// the database.
#[cfg(test)]
pub(crate) async fn temporary_database(
    config: &Configuration,
) -> (tempfile::TempDir, SqliteDatabase) {
    let dir = tempfile::tempdir().expect("Unable to create temporary directory");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("sessions.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let database = SqliteDatabase::connect_with(options, config)
        .await
        .expect("Unable to open SQLite database");
    (dir, database)
}

/// A migrated single-connection database in rollback-journal mode, where a
/// reader left open on the only connection would starve every writer.
#[cfg(test)]
pub(crate) async fn temporary_rollback_database(
    config: &Configuration,
) -> (tempfile::TempDir, SqliteDatabase) {
    let dir = tempfile::tempdir().expect("Unable to create temporary directory");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("sessions.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Unable to open SQLite database");
    let database = SqliteDatabase::new(pool, config).expect("Unable to wrap pool");
    database.migrate().await.expect("Unable to migrate");
    (dir, database)
}
