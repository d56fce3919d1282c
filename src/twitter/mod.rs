pub mod v1;

use crate::credentials::Credentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Twitter account id, kept as a string so it survives JSON round trips intact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn to_numeric(&self) -> Result<u64, RemoteError> {
        self.0.parse().map_err(|_| RemoteError::InvalidId {
            id: self.0.clone(),
        })
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in user, as shown by `/api/profile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub photo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    #[error("Rate limited until {reset}")]
    RateLimited { reset: DateTime<Utc> },
    #[error("Credentials were rejected: {message}")]
    Unauthorized { message: String },
    #[error("Not a valid account id: {id}")]
    InvalidId { id: String },
    #[error("Request failed: {message}")]
    Request { message: String },
}

/// The slice of the Twitter social graph API this service needs.
///
/// Every call takes the caller's credentials explicitly; implementations hold
/// no per-user state. Failures are reported once and never retried here.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// All accounts the user follows. Either the whole list or an error.
    async fn list_followed_ids(&self, credentials: &Credentials)
        -> Result<Vec<UserId>, RemoteError>;

    /// Show or hide retweets from `id`. Applying the same state twice is harmless.
    async fn update_relationship(
        &self,
        credentials: &Credentials,
        id: &UserId,
        want_retweets: bool,
    ) -> Result<(), RemoteError>;

    /// Accounts whose retweets the user currently hides
    async fn list_excluded_ids(&self, credentials: &Credentials)
        -> Result<Vec<UserId>, RemoteError>;
}
