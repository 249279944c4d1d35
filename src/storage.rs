use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unable to serialize value for attribute \"{key}\": {source}")]
    SerializeError {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unable to deserialize value of attribute \"{key}\": {source}")]
    DeserializeError {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn serialize(key: &str, source: serde_json::Error) -> Self {
        Self::SerializeError {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn deserialize(key: &str, source: serde_json::Error) -> Self {
        Self::DeserializeError {
            key: key.to_string(),
            source,
        }
    }
}

/// Typed access to a string-valued attribute bag.
///
/// Values are kept as their JSON text, so anything `serde` can round-trip
/// fits in a single attribute row.
pub trait Storage<K> {
    type Error;

    fn insert<T: Serialize>(&mut self, key: K, value: &T) -> Result<(), Self::Error>;
    fn remove<T: DeserializeOwned>(&mut self, key: K) -> Result<Option<T>, Self::Error>;
    fn get<T: DeserializeOwned>(&self, key: K) -> Result<Option<T>, Self::Error>;
    fn contains_key(&self, key: K) -> Result<bool, Self::Error>;
}
