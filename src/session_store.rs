pub(crate) mod configuration;
mod error;
mod session_key;
mod sql_session_store;
mod store;

pub use configuration::{Configuration, ConfigurationError, CookieConfiguration};
pub use error::StoreError;
pub use session_key::{SessionKey, SESSION_KEY_LEN};
pub use sql_session_store::SqlSessionStore;
pub use store::Store;
