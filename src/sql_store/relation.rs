use futures::stream::BoxStream;

use crate::{session_state::SessionState, sql_store::SqlError, SessionKey};

/// One last-updated marker row, as seen by the staleness sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastUpdated {
    pub id: SessionKey,
    pub name: String,
    pub value: String,
}

/// The attribute relation: one row per `(id, name, key)`.
///
/// A session exists only through its rows, so loading an unknown identity
/// and loading an empty session are the same thing. Each operation is atomic
/// in the underlying database; errors are returned as they come, without
/// retries.
#[async_trait::async_trait]
pub trait SessionRelation: Send + Sync {
    /// Creates the table and its index if they are missing.
    async fn migrate(&self) -> Result<(), SqlError>;

    async fn load_attributes(&self, id: &SessionKey, name: &str)
        -> Result<SessionState, SqlError>;

    /// Swaps the `(id, name)` row set for `state` in one transaction.
    async fn replace_attributes(
        &self,
        id: &SessionKey,
        name: &str,
        state: &SessionState,
    ) -> Result<(), SqlError>;

    /// Removes the `(id, name)` rows. Returns the number of rows removed.
    async fn delete_attributes(&self, id: &SessionKey, name: &str) -> Result<u64, SqlError>;

    /// Removes every row of `id`, whatever the name.
    async fn delete_all(&self, id: &SessionKey) -> Result<u64, SqlError>;

    /// Streams every last-updated marker in the table. The stream is lazy and
    /// can be consumed once.
    fn scan_last_updated(&self) -> BoxStream<'_, Result<LastUpdated, SqlError>>;

    /// Removes the marker's session, unless it was saved again after the
    /// marker was read. Returns whether anything was removed.
    async fn delete_stale(&self, marker: &LastUpdated) -> Result<bool, SqlError>;
}
