use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use cookie::Cookie;
use futures::TryStreamExt;
use tokio::sync::Mutex;

use crate::{
    cookie_codec::{CookieCodec, CookieError},
    cookies::{RequestCookies, ResponseCookies},
    keyed_locks::KeyedLocks,
    session::Session,
    session_store::{
        configuration::{Configuration, ConfigurationError},
        error::StoreError,
        session_key::SessionKey,
        store::Store,
    },
    sql_store::SessionRelation,
};

/// Last-updated markers are RFC 3339 with nine fractional digits, so every
/// marker has the same width and sorts chronologically as text.
pub(crate) fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|source| StoreError::TimestampError {
            value: value.to_string(),
            source,
        })
}

/// Session store over a [`SessionRelation`], tracking identities with an
/// authenticated, encrypted cookie.
///
/// Loads hold a shared lock on the identity and saves and deletes an
/// exclusive one, so concurrent requests for one session never see a
/// half-written row set. Identities never contend with each other.
pub struct SqlSessionStore<R> {
    relation: R,
    config: Configuration,
    codec: CookieCodec,
    locks: KeyedLocks<SessionKey>,
    sweep: Mutex<()>,
}

impl<R> SqlSessionStore<R>
where
    R: SessionRelation,
{
    /// Opens a store with freshly generated cookie keys. Cookies issued by a
    /// previous process are not accepted; use [`SqlSessionStore::set_keys`]
    /// to keep sessions across restarts.
    pub fn open(relation: R, config: Configuration) -> Result<Self, ConfigurationError> {
        let codec = CookieCodec::generate()?;
        Ok(Self::with_codec(relation, config, codec))
    }

    pub fn with_codec(relation: R, config: Configuration, codec: CookieCodec) -> Self {
        let codec = Self::bounded(codec, &config);
        Self {
            relation,
            config,
            codec,
            locks: KeyedLocks::new(),
            sweep: Mutex::new(()),
        }
    }

    /// Replaces the cookie keys. See [`CookieCodec::new`] for the rules.
    /// Stores sharing keys accept each other's cookies.
    pub fn set_keys(
        &mut self,
        hash_key: &[u8],
        block_key: Option<&[u8]>,
    ) -> Result<(), ConfigurationError> {
        let codec = CookieCodec::new(hash_key, block_key)?;
        self.codec = Self::bounded(codec, &self.config);
        Ok(())
    }

    fn bounded(codec: CookieCodec, config: &Configuration) -> CookieCodec {
        match config.cookie.max_age {
            Some(seconds) => codec.with_max_age(seconds),
            None => codec,
        }
    }

    pub fn relation(&self) -> &R {
        &self.relation
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// The identity carried by the request's cookie, or a new one. The flag
    /// is true when the identity was minted here.
    pub fn resolve_identity<Q>(&self, request: &Q) -> (SessionKey, bool)
    where
        Q: RequestCookies + ?Sized,
    {
        let name = &self.config.cookie.name;
        if let Some(token) = request.cookie(name) {
            match self.codec.decode(name, token) {
                Ok(id) if !id.is_empty() => return (SessionKey::from(id), false),
                Ok(_) => tracing::debug!("session cookie carried an empty identity"),
                Err(error) => tracing::debug!(%error, "discarding undecodable session cookie"),
            }
        }
        tracing::debug!("minting a new session identity");
        (SessionKey::generate(), true)
    }

    /// Removes every session stored under `id`, whatever its name.
    pub async fn delete_identity(&self, id: &SessionKey) -> Result<u64, StoreError> {
        let _guard = self.locks.write(id).await;
        let removed = self.relation.delete_all(id).await?;
        Ok(removed)
    }

    fn session_cookie(&self, id: &SessionKey) -> Result<Cookie<'static>, CookieError> {
        let config = &self.config.cookie;
        let value = self.codec.encode(&config.name, id.as_bytes())?;
        let mut cookie = Cookie::build((config.name.clone(), value))
            .path(config.path.clone())
            .http_only(config.http_only)
            .secure(config.secure);
        if let Some(max_age) = config.max_age {
            let seconds = i64::try_from(max_age).unwrap_or(i64::MAX);
            cookie = cookie.max_age(cookie::time::Duration::seconds(seconds));
        }
        Ok(cookie.build())
    }
}

#[async_trait::async_trait]
impl<R> Store for SqlSessionStore<R>
where
    R: SessionRelation,
{
    type Error = StoreError;

    #[tracing::instrument(skip_all, fields(name = %name))]
    async fn new<Q>(&self, request: &Q, name: &str) -> Result<Session, Self::Error>
    where
        Q: RequestCookies + Sync + ?Sized,
    {
        let (id, fresh) = self.resolve_identity(request);
        let state = {
            let _guard = self.locks.read(&id).await;
            self.relation.load_attributes(&id, name).await?
        };
        Ok(Session::new(id, name, state).with_fresh_identity(fresh))
    }

    /// Writes the attributes in one transaction, then emits the identity
    /// cookie. A failed write leaves the response without a cookie.
    #[tracing::instrument(skip_all, fields(name = %session.name()))]
    async fn save<Q, W>(
        &self,
        _request: &Q,
        response: &mut W,
        session: &mut Session,
    ) -> Result<(), Self::Error>
    where
        Q: RequestCookies + Sync + ?Sized,
        W: ResponseCookies + Send + ?Sized,
    {
        if !session.active() {
            return Err(StoreError::SessionDestroyedError);
        }
        let _guard = self.locks.write(session.id()).await;

        let cookie = self.session_cookie(session.id())?;
        session.stamp(&self.config.last_updated_key, format_timestamp(Utc::now()));
        self.relation
            .replace_attributes(session.id(), session.name(), session.state())
            .await?;

        response.set_cookie(cookie);
        session.mark_saved();
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(name = %session.name()))]
    async fn delete(&self, session: &mut Session) -> Result<(), Self::Error> {
        let _guard = self.locks.write(session.id()).await;
        self.relation
            .delete_attributes(session.id(), session.name())
            .await?;
        session.mark_destroyed();
        Ok(())
    }

    /// Sweeps never overlap each other, but each one only locks the identity
    /// it is deleting. Sessions removed before an error stay removed.
    #[tracing::instrument(skip_all, fields(inactive = ?inactive))]
    async fn clean(&self, inactive: Duration) -> Result<u64, Self::Error> {
        let _sweep = self.sweep.lock().await;
        let threshold = chrono::Duration::from_std(inactive)
            .map_err(|_| StoreError::InvalidThreshold(inactive))?;
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .ok_or(StoreError::InvalidThreshold(inactive))?;

        let mut removed = 0;
        let mut markers = self.relation.scan_last_updated();
        while let Some(marker) = markers.try_next().await? {
            if parse_timestamp(&marker.value)? >= cutoff {
                continue;
            }
            let _guard = self.locks.write(&marker.id).await;
            if self.relation.delete_stale(&marker).await? {
                removed += 1;
            }
        }

        tracing::info!(removed, "swept inactive sessions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use cookie::CookieJar;
    use futures::stream::{self, BoxStream, StreamExt};

    use super::*;
    use crate::{
        session_state::SessionState,
        session_status::SessionStatus,
        sql_store::{
            temporary_database, temporary_rollback_database, LastUpdated, SqlError,
            SqliteDatabase,
        },
        storage::Storage,
    };

    const DAY: Duration = Duration::from_secs(86400);

    async fn store() -> (tempfile::TempDir, SqlSessionStore<SqliteDatabase>) {
        let config = Configuration::default();
        let (dir, database) = temporary_database(&config).await;
        let store = SqlSessionStore::open(database, config).expect("Unable to open store");
        (dir, store)
    }

    /// The request a browser would send back after receiving `response`.
    fn follow_up(response: &CookieJar) -> CookieJar {
        let mut request = CookieJar::new();
        for cookie in response.delta() {
            request.add_original(cookie.clone());
        }
        request
    }

    fn marker_key() -> String {
        Configuration::default().last_updated_key
    }

    fn without_marker(state: &SessionState) -> SessionState {
        let marker = marker_key();
        state
            .iter()
            .filter(|(k, _)| **k != marker)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn new_mints_an_identity_when_no_cookie_is_sent() {
        let (_dir, store) = store().await;
        let request = CookieJar::new();

        let first = store.new(&request, "app").await.expect("Unable to load");
        let second = store.new(&request, "app").await.expect("Unable to load");

        assert!(first.is_new());
        assert!(!first.id().is_empty());
        assert_ne!(first.id(), second.id());
        assert!(first.state().is_empty());
        assert_eq!(first.status(), SessionStatus::Unchanged);
    }

    #[tokio::test]
    async fn new_mints_an_identity_when_the_cookie_is_corrupted() {
        let (_dir, store) = store().await;
        let mut request = CookieJar::new();
        request.add_original(Cookie::new("sess_sessionid", "corrupted-value"));

        let (id, fresh) = store.resolve_identity(&request);
        assert!(fresh);
        assert_eq!(id.len(), 64);
        assert_ne!(store.resolve_identity(&request).0, id);
    }

    #[tokio::test]
    async fn save_then_new_returns_the_saved_attributes() {
        let (_dir, store) = store().await;
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();
        session
            .insert("user_id", &"abc-123".to_string())
            .expect("Unable to insert user id");

        let before = Utc::now();
        let mut response = CookieJar::new();
        store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .expect("Unable to save session");
        assert_eq!(session.status(), SessionStatus::Saved);

        let loaded = store.new(&follow_up(&response), "app").await.unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.state(), session.state());
        assert_eq!(
            loaded.get::<String>("user_id").unwrap().as_deref(),
            Some("abc-123")
        );

        let stamped = loaded.state().get(&marker_key()).unwrap();
        let stamped = parse_timestamp(stamped).unwrap();
        assert!(stamped >= before && stamped <= Utc::now());
    }

    #[tokio::test]
    async fn save_replaces_rather_than_merges() {
        let (_dir, store) = store().await;
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();
        session.insert("a", &1).unwrap();
        session.insert("b", &2).unwrap();
        let mut response = CookieJar::new();
        store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .unwrap();

        let request = follow_up(&response);
        let mut session = store.new(&request, "app").await.unwrap();
        session.remove::<i32>("a").unwrap();
        session.remove::<i32>("b").unwrap();
        session.insert("c", &3).unwrap();
        store
            .save(&request, &mut CookieJar::new(), &mut session)
            .await
            .unwrap();

        let loaded = store.new(&request, "app").await.unwrap();
        let expected: SessionState = [("c".to_string(), "3".to_string())].into_iter().collect();
        assert_eq!(without_marker(loaded.state()), expected);
        assert_eq!(loaded.state().len(), 2);
    }

    #[tokio::test]
    async fn save_writes_the_identity_cookie() {
        let config = Configuration::default().with_cookie(crate::CookieConfiguration {
            secure: true,
            max_age: Some(3600),
            ..Default::default()
        });
        let (_dir, database) = temporary_database(&config).await;
        let store = SqlSessionStore::open(database, config).unwrap();
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();

        let mut response = CookieJar::new();
        store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .unwrap();

        let cookie = response.get("sess_sessionid").expect("expected a cookie");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(
            cookie.max_age(),
            Some(cookie::time::Duration::seconds(3600))
        );
        assert_ne!(cookie.value().as_bytes(), session.id().as_bytes());
    }

    #[tokio::test]
    async fn cookies_are_only_accepted_by_stores_sharing_keys() {
        let (_dir, mut issuer) = store().await;
        issuer.set_keys(b"hash-key", Some(&[9; 32])).unwrap();
        let mut session = issuer.new(&CookieJar::new(), "app").await.unwrap();
        let mut response = CookieJar::new();
        issuer
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .unwrap();
        let request = follow_up(&response);

        let (_other_dir, mut restarted) = store().await;
        let (id, fresh) = restarted.resolve_identity(&request);
        assert!(fresh);
        assert_ne!(&id, session.id());

        restarted.set_keys(b"hash-key", Some(&[9; 32])).unwrap();
        let (id, fresh) = restarted.resolve_identity(&request);
        assert!(!fresh);
        assert_eq!(&id, session.id());
    }

    #[tokio::test]
    async fn set_keys_rejects_invalid_block_keys() {
        let (_dir, mut store) = store().await;
        let err = store
            .set_keys(b"hash-key", Some(&[1; 20]))
            .expect_err("expected the block key to be rejected");
        assert!(matches!(err, ConfigurationError::InvalidBlockKey(20)));
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_session_never_interleave() {
        let (_dir, store) = store().await;
        let id = SessionKey::generate();
        let first_state: SessionState = (0..20)
            .map(|i| (format!("first-{i}"), i.to_string()))
            .collect();
        let second_state: SessionState = (0..20)
            .map(|i| (format!("second-{i}"), i.to_string()))
            .collect();
        let mut first = Session::new(id.clone(), "app", first_state.clone());
        let mut second = Session::new(id.clone(), "app", second_state.clone());
        let (mut first_response, mut second_response) = (CookieJar::new(), CookieJar::new());
        let request = CookieJar::new();

        let (a, b) = tokio::join!(
            store.save(&request, &mut first_response, &mut first),
            store.save(&request, &mut second_response, &mut second),
        );
        a.expect("Unable to save first session");
        b.expect("Unable to save second session");

        let stored = store
            .relation()
            .load_attributes(&id, "app")
            .await
            .unwrap();
        let stored = without_marker(&stored);
        assert!(stored == first_state || stored == second_state);
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn saves_of_different_sessions_proceed_independently() {
        let (_dir, store) = store().await;
        let request = CookieJar::new();
        let mut first = store.new(&request, "app").await.unwrap();
        let mut second = store.new(&request, "app").await.unwrap();
        first.insert("who", &"first").unwrap();
        second.insert("who", &"second").unwrap();

        let held = store.locks.write(first.id()).await;
        let mut response = CookieJar::new();
        store
            .save(&request, &mut response, &mut second)
            .await
            .expect("a locked identity must not block another one");
        drop(held);

        store
            .save(&request, &mut CookieJar::new(), &mut first)
            .await
            .unwrap();
        let loaded = store.new(&follow_up(&response), "app").await.unwrap();
        assert_eq!(loaded.get::<String>("who").unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn delete_removes_the_session() {
        let (_dir, store) = store().await;
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();
        session.insert("user_id", &"abc-123").unwrap();
        let mut response = CookieJar::new();
        store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .unwrap();

        store.delete(&mut session).await.expect("Unable to delete");
        assert_eq!(session.status(), SessionStatus::Destroyed);
        let loaded = store.new(&follow_up(&response), "app").await.unwrap();
        assert!(loaded.state().is_empty());

        let err = store
            .save(&CookieJar::new(), &mut CookieJar::new(), &mut session)
            .await
            .expect_err("expected destroyed sessions to stay destroyed");
        assert!(matches!(err, StoreError::SessionDestroyedError));
        assert!(store.delete(&mut session).await.is_ok());
    }

    #[tokio::test]
    async fn delete_identity_removes_every_named_session() {
        let (_dir, store) = store().await;
        let id = SessionKey::generate();
        for name in ["cart", "auth"] {
            let mut session = Session::new(id.clone(), name, SessionState::default());
            store
                .save(&CookieJar::new(), &mut CookieJar::new(), &mut session)
                .await
                .unwrap();
        }

        assert_eq!(store.delete_identity(&id).await.unwrap(), 2);
        assert_eq!(store.delete_identity(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_loads_like_new() {
        let (_dir, store) = store().await;
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();
        session.insert("n", &1).unwrap();
        let mut response = CookieJar::new();
        store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .unwrap();

        let request = follow_up(&response);
        let first = store.get(&request, "app").await.unwrap();
        let second = store.get(&request, "app").await.unwrap();
        assert_eq!(first.state(), second.state());
        assert_eq!(first.id(), session.id());
    }

    async fn stored_at<R>(store: &SqlSessionStore<R>, age: Duration) -> SessionKey
    where
        R: SessionRelation,
    {
        let id = SessionKey::generate();
        let saved_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let state: SessionState = [
            (
                store.configuration().last_updated_key.clone(),
                format_timestamp(saved_at),
            ),
            ("user_id".to_string(), "\"abc\"".to_string()),
        ]
        .into_iter()
        .collect();
        store
            .relation()
            .replace_attributes(&id, "app", &state)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn clean_removes_only_inactive_sessions() {
        let (_dir, store) = store().await;
        let old = stored_at(&store, 10 * DAY).await;
        let recent = stored_at(&store, DAY).await;

        let removed = store.clean(5 * DAY).await.expect("Unable to clean");

        assert_eq!(removed, 1);
        let relation = store.relation();
        assert!(relation.load_attributes(&old, "app").await.unwrap().is_empty());
        assert_eq!(relation.load_attributes(&recent, "app").await.unwrap().len(), 2);
    }

    /// Sweeps `stale` old sessions while a recent one survives.
    async fn sweep_many<R>(store: &SqlSessionStore<R>, stale: u64)
    where
        R: SessionRelation,
    {
        for _ in 0..stale {
            stored_at(store, 10 * DAY).await;
        }
        let recent = stored_at(store, DAY).await;

        let removed = tokio::time::timeout(Duration::from_secs(30), store.clean(5 * DAY))
            .await
            .expect("clean must not stall")
            .expect("Unable to clean");

        assert_eq!(removed, stale);
        let relation = store.relation();
        assert_eq!(relation.load_attributes(&recent, "app").await.unwrap().len(), 2);
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn clean_sweeps_an_in_memory_database() {
        let config = Configuration::default();
        let database = SqliteDatabase::connect("sqlite::memory:", &config)
            .await
            .expect("Unable to open in-memory database");
        let store = SqlSessionStore::open(database, config).unwrap();
        sweep_many(&store, 600).await;
    }

    #[tokio::test]
    async fn clean_sweeps_a_single_rollback_journal_connection() {
        let config = Configuration::default();
        let (_dir, database) = temporary_rollback_database(&config).await;
        let store = SqlSessionStore::open(database, config).unwrap();
        sweep_many(&store, 600).await;
    }

    #[tokio::test]
    async fn clean_stops_at_malformed_timestamps() {
        let (_dir, store) = store().await;
        let id = SessionKey::generate();
        let state: SessionState = [(marker_key(), "yesterday".to_string())]
            .into_iter()
            .collect();
        store
            .relation()
            .replace_attributes(&id, "app", &state)
            .await
            .unwrap();

        let err = store.clean(DAY).await.expect_err("expected a parse error");
        assert!(matches!(err, StoreError::TimestampError { ref value, .. } if value == "yesterday"));
    }

    #[tokio::test]
    async fn clean_rejects_thresholds_out_of_range() {
        let (_dir, store) = store().await;
        let err = store.clean(Duration::MAX).await.expect_err("expected overflow");
        assert!(matches!(err, StoreError::InvalidThreshold(_)));
    }

    /// A relation whose writes always fail.
    #[derive(Default)]
    struct BrokenRelation {
        attempted: AtomicBool,
    }

    fn broken() -> SqlError {
        SqlError::QueryError(sqlx::Error::PoolClosed)
    }

    #[async_trait::async_trait]
    impl SessionRelation for BrokenRelation {
        async fn migrate(&self) -> Result<(), SqlError> {
            Ok(())
        }

        async fn load_attributes(
            &self,
            _id: &SessionKey,
            _name: &str,
        ) -> Result<SessionState, SqlError> {
            Ok(SessionState::default())
        }

        async fn replace_attributes(
            &self,
            _id: &SessionKey,
            _name: &str,
            _state: &SessionState,
        ) -> Result<(), SqlError> {
            self.attempted.store(true, Ordering::SeqCst);
            Err(broken())
        }

        async fn delete_attributes(&self, _id: &SessionKey, _name: &str) -> Result<u64, SqlError> {
            Err(broken())
        }

        async fn delete_all(&self, _id: &SessionKey) -> Result<u64, SqlError> {
            Err(broken())
        }

        fn scan_last_updated(&self) -> BoxStream<'_, Result<LastUpdated, SqlError>> {
            stream::iter(vec![Err(broken())]).boxed()
        }

        async fn delete_stale(&self, _marker: &LastUpdated) -> Result<bool, SqlError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn failed_saves_do_not_emit_a_cookie() {
        let store = SqlSessionStore::open(BrokenRelation::default(), Configuration::default())
            .unwrap();
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();
        let mut response = CookieJar::new();

        let err = store
            .save(&CookieJar::new(), &mut response, &mut session)
            .await
            .expect_err("expected the save to fail");

        assert!(matches!(err, StoreError::SqlError(SqlError::QueryError(_))));
        assert!(store.relation().attempted.load(Ordering::SeqCst));
        assert!(response.get("sess_sessionid").is_none());
        assert_ne!(session.status(), SessionStatus::Saved);
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn relation_errors_propagate_unchanged() {
        let store = SqlSessionStore::open(BrokenRelation::default(), Configuration::default())
            .unwrap();
        let mut session = store.new(&CookieJar::new(), "app").await.unwrap();

        assert!(matches!(
            store.delete(&mut session).await,
            Err(StoreError::SqlError(SqlError::QueryError(sqlx::Error::PoolClosed)))
        ));
        assert_eq!(session.status(), SessionStatus::Unchanged);
        assert!(matches!(
            store.clean(DAY).await,
            Err(StoreError::SqlError(_))
        ));
    }
}
