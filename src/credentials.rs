use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A key/secret pair, either the service-wide consumer pair or a user's access token pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub key: String,
    pub secret: String,
}

impl TokenPair {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.key.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("Consumer key and secret are not configured")]
    MissingConsumer,
    #[error("No access token for this session")]
    MissingAccess,
}

/// Everything needed to call the Twitter API on behalf of one user.
///
/// Can only be built fully populated, and is never mutated afterwards, so it
/// can be shared by reference between concurrent requests of one run.
#[derive(Clone, Debug)]
pub struct Credentials {
    consumer: TokenPair,
    access: TokenPair,
}

impl Credentials {
    pub fn new(consumer: TokenPair, access: TokenPair) -> Result<Self, CredentialsError> {
        if !consumer.is_complete() {
            return Err(CredentialsError::MissingConsumer);
        }
        if !access.is_complete() {
            return Err(CredentialsError::MissingAccess);
        }
        Ok(Self { consumer, access })
    }

    /// Combine the service consumer pair with whatever the session holds
    pub fn for_session(
        consumer: &TokenPair,
        access: Option<&TokenPair>,
    ) -> Result<Self, CredentialsError> {
        let access = access.ok_or(CredentialsError::MissingAccess)?;
        Self::new(consumer.clone(), access.clone())
    }

    pub fn consumer(&self) -> &TokenPair {
        &self.consumer
    }

    pub fn access(&self) -> &TokenPair {
        &self.access
    }
}

/// Validates the service-wide consumer pair once at start-up
pub fn consumer_pair(key: &str, secret: &str) -> Result<TokenPair, CredentialsError> {
    let pair = TokenPair::new(key, secret);
    if pair.is_complete() {
        Ok(pair)
    } else {
        Err(CredentialsError::MissingConsumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> TokenPair {
        TokenPair::new("consumer-key", "consumer-secret")
    }

    #[test]
    fn complete_credentials_are_accepted() {
        let credentials =
            Credentials::new(consumer(), TokenPair::new("access-key", "access-secret")).unwrap();
        assert_eq!(credentials.access().key, "access-key");
        assert_eq!(credentials.consumer().secret, "consumer-secret");
    }

    #[test]
    fn blank_parts_are_rejected() {
        assert_eq!(
            Credentials::new(TokenPair::new("", "s"), TokenPair::new("k", "s")).unwrap_err(),
            CredentialsError::MissingConsumer
        );
        assert_eq!(
            Credentials::new(consumer(), TokenPair::new("k", "  ")).unwrap_err(),
            CredentialsError::MissingAccess
        );
        assert_eq!(
            Credentials::for_session(&consumer(), None).unwrap_err(),
            CredentialsError::MissingAccess
        );
        assert!(consumer_pair("key", "").is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let credentials =
            Credentials::new(consumer(), TokenPair::new("access-key", "hunter2")).unwrap();
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("access-key"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("consumer-secret"));
    }
}
