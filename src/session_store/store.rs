use std::time::Duration;

use crate::{
    cookies::{RequestCookies, ResponseCookies},
    session::Session,
};

/// What a web server needs from a session backend.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    type Error: Send;

    /// Loads the session called `name` for the identity carried by the
    /// request, minting a new identity when there is none.
    async fn new<R>(&self, request: &R, name: &str) -> Result<Session, Self::Error>
    where
        R: RequestCookies + Sync + ?Sized;

    /// Hosts that cache sessions per request look there first and call this
    /// on a miss. Without such a cache it is the same as [`Store::new`].
    async fn get<R>(&self, request: &R, name: &str) -> Result<Session, Self::Error>
    where
        R: RequestCookies + Sync + ?Sized,
    {
        self.new(request, name).await
    }

    /// Persists the session and hands its identity cookie to the response.
    async fn save<R, W>(
        &self,
        request: &R,
        response: &mut W,
        session: &mut Session,
    ) -> Result<(), Self::Error>
    where
        R: RequestCookies + Sync + ?Sized,
        W: ResponseCookies + Send + ?Sized;

    async fn delete(&self, session: &mut Session) -> Result<(), Self::Error>;

    /// Removes sessions not saved within `inactive`. Returns how many were
    /// removed.
    async fn clean(&self, inactive: Duration) -> Result<u64, Self::Error>;
}
