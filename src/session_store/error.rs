use std::time::Duration;

use crate::{cookie_codec::CookieError, sql_store::SqlError, ConfigurationError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    SqlError(#[from] SqlError),
    #[error(transparent)]
    ConfigurationError(#[from] ConfigurationError),
    #[error("Unable to encode the session cookie: {0}")]
    CookieError(#[from] CookieError),
    #[error("Unable to parse last-updated timestamp \"{value}\": {source}")]
    TimestampError {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Inactivity threshold {0:?} is out of range")]
    InvalidThreshold(Duration),
    #[error("Session is destroyed")]
    SessionDestroyedError,
}
