use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Configuration error: the hash key must not be empty")]
    MissingHashKey,
    #[error("Configuration error: block key must be 16, 24 or 32 bytes, got {0}")]
    InvalidBlockKey(usize),
    #[error("Configuration error: \"{0}\" is not a valid table name")]
    InvalidTableName(String),
}

/// Everything the store needs that is not a secret or a connection.
///
/// Deserializes with defaults for missing fields, so a host can embed it in
/// its own TOML or JSON configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Configuration {
    pub table_name: String,
    /// Reserved attribute holding the time of the last save. Applications
    /// must not use it for their own data.
    pub last_updated_key: String,
    pub cookie: CookieConfiguration,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CookieConfiguration {
    pub name: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    /// Cookie `Max-Age` in seconds. Also bounds how old an accepted token may
    /// be; without it tokens are accepted for 30 days.
    pub max_age: Option<u64>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            table_name: "sess_session".to_string(),
            last_updated_key: "__sess_last_updated".to_string(),
            cookie: CookieConfiguration::default(),
        }
    }
}

impl Default for CookieConfiguration {
    fn default() -> Self {
        Self {
            name: "sess_sessionid".to_string(),
            path: "/".to_string(),
            http_only: true,
            secure: false,
            max_age: None,
        }
    }
}

impl Configuration {
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_last_updated_key(mut self, key: impl Into<String>) -> Self {
        self.last_updated_key = key.into();
        self
    }

    pub fn with_cookie(mut self, cookie: CookieConfiguration) -> Self {
        self.cookie = cookie;
        self
    }
}

/// Table names are spliced into SQL text, so only plain identifiers pass.
pub(crate) fn validate_table_name(name: &str) -> Result<(), ConfigurationError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidTableName(name.to_string()))
    }
}
