pub mod cookie_codec;
mod cookies;
pub mod keyed_locks;
mod session;
mod session_state;
mod session_status;
mod session_store;
pub mod sql_store;
mod storage;

pub use cookie_codec::{CookieCodec, CookieError};
pub use cookies::{RequestCookies, ResponseCookies};
pub use keyed_locks::KeyedLocks;
pub use session::{Session, SessionError};
pub use session_state::SessionState;
pub use session_status::SessionStatus;
pub use session_store::{
    Configuration, ConfigurationError, CookieConfiguration, SessionKey, SqlSessionStore, Store,
    StoreError, SESSION_KEY_LEN,
};
pub use sql_store::{SessionRelation, SqlError, SqliteDatabase};
pub use storage::{Storage, StorageError};
