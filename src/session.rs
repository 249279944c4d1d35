use serde::{de::DeserializeOwned, Serialize};

use crate::{
    session_state::SessionState,
    session_status::SessionStatus,
    storage::{Storage, StorageError},
    SessionKey,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    SessionStorageError(#[from] StorageError),
    #[error("Session is destroyed")]
    SessionDestroyedError,
}

/// One named session bound to one identity.
///
/// Sessions are built fresh by every load; nothing here is shared between
/// requests. Mutations stay in memory until the store saves the session.
#[derive(Debug, Default)]
pub struct Session {
    id: SessionKey,
    name: String,
    state: SessionState,
    status: SessionStatus,
    fresh: bool,
}

impl Session {
    pub fn new(id: SessionKey, name: impl Into<String>, state: SessionState) -> Self {
        Session {
            id,
            name: name.into(),
            state,
            status: SessionStatus::Unchanged,
            fresh: false,
        }
    }

    pub(crate) fn with_fresh_identity(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn id(&self) -> &SessionKey {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Raw access to the attribute bag. Marks the session as changed.
    pub fn state_mut(&mut self) -> Result<&mut SessionState, SessionError> {
        self.touch()?;
        Ok(&mut self.state)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// True when the identity was minted for this request rather than read
    /// from the client's cookie.
    pub fn is_new(&self) -> bool {
        self.fresh
    }

    pub fn active(&self) -> bool {
        self.status != SessionStatus::Destroyed
    }

    pub(crate) fn stamp(&mut self, key: &str, value: String) {
        self.state.insert(key, value);
    }

    pub(crate) fn mark_saved(&mut self) {
        self.status = SessionStatus::Saved;
        self.fresh = false;
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.status = SessionStatus::Destroyed;
    }

    fn touch(&mut self) -> Result<(), SessionError> {
        if !self.active() {
            return Err(SessionError::SessionDestroyedError);
        }
        self.status = SessionStatus::Changed;
        Ok(())
    }
}

impl From<Session> for SessionState {
    fn from(session: Session) -> Self {
        session.state
    }
}

impl From<&Session> for SessionState {
    fn from(session: &Session) -> Self {
        session.state().clone()
    }
}

impl Storage<&str> for Session {
    type Error = SessionError;

    fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), Self::Error> {
        let insert =
            serde_json::to_string(value).map_err(|e| StorageError::serialize(key, e))?;
        self.touch()?;
        self.state.insert(key, insert);
        Ok(())
    }

    fn remove<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, Self::Error> {
        self.touch()?;
        let removed = self
            .state
            .remove(key)
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e| StorageError::deserialize(key, e))?;
        Ok(removed)
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Self::Error> {
        let value = self
            .state
            .get(key)
            .map(|v| serde_json::from_str(v))
            .transpose()
            .map_err(|e| StorageError::deserialize(key, e))?;
        Ok(value)
    }

    fn contains_key(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.state.contains_key(key))
    }
}
