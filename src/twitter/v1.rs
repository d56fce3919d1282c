//! Twitter API v1.1 through egg-mode, using OAuth 1.0a user context

use crate::credentials::{Credentials, TokenPair};
use crate::twitter::{GraphClient, Profile, RemoteError, UserId};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use egg_mode::error::Error;
use egg_mode::{KeyPair, Token};
use futures::TryStreamExt;
use url::Url;

// Largest page `friends/ids` will hand out
const FRIENDS_PAGE_SIZE: i32 = 5000;

// Invalid or expired token, could not authenticate, bad authentication data
const AUTH_ERROR_CODES: [i32; 3] = [89, 32, 215];

/// Stateless client, every call signs with the credentials it is given
#[derive(Clone, Copy, Debug, Default)]
pub struct TwitterClientV1;

fn key_pair(pair: &TokenPair) -> KeyPair {
    KeyPair::new(pair.key.clone(), pair.secret.clone())
}

fn token(credentials: &Credentials) -> Token {
    Token::Access {
        consumer: key_pair(credentials.consumer()),
        access: key_pair(credentials.access()),
    }
}

impl From<Error> for RemoteError {
    fn from(e: Error) -> Self {
        match e {
            Error::RateLimit(reset) => RemoteError::RateLimited {
                reset: Utc
                    .timestamp_opt(i64::from(reset), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            },
            Error::TwitterError(_, errors)
                if errors
                    .errors
                    .iter()
                    .any(|c| AUTH_ERROR_CODES.contains(&c.code)) =>
            {
                RemoteError::Unauthorized {
                    message: errors.to_string(),
                }
            }
            Error::BadStatus(status) if status.as_u16() == 401 => RemoteError::Unauthorized {
                message: status.to_string(),
            },
            other => RemoteError::Request {
                message: other.to_string(),
            },
        }
    }
}

/// `friendships/update` settings: retweets as asked, device notifications untouched
fn follow_settings(want_retweets: bool) -> (Option<bool>, Option<bool>) {
    (None, Some(want_retweets))
}

#[async_trait]
impl GraphClient for TwitterClientV1 {
    async fn list_followed_ids(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<UserId>, RemoteError> {
        let token = token(credentials);
        // `friends/ids` wants an explicit account, so ask who the token belongs to
        let user = egg_mode::auth::verify_tokens(&token).await?;
        let ids = egg_mode::user::friends_ids(user.response.id, &token)
            .with_page_size(FRIENDS_PAGE_SIZE)
            .map_ok(|id| UserId::from(id.response))
            .try_collect::<Vec<_>>()
            .await?;
        log::debug!("@{} follows {} accounts", user.response.screen_name, ids.len());
        Ok(ids)
    }

    async fn update_relationship(
        &self,
        credentials: &Credentials,
        id: &UserId,
        want_retweets: bool,
    ) -> Result<(), RemoteError> {
        let account = id.to_numeric()?;
        let (notifications, retweets) = follow_settings(want_retweets);
        egg_mode::user::update_follow(account, notifications, retweets, &token(credentials))
            .await?;
        Ok(())
    }

    async fn list_excluded_ids(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<UserId>, RemoteError> {
        let ids = egg_mode::user::friends_no_retweets(&token(credentials)).await?;
        Ok(ids.response.into_iter().map(UserId::from).collect())
    }
}

/// First leg of the OAuth handshake, returns the temporary request token
pub async fn request_token(consumer: &TokenPair, callback: &Url) -> Result<TokenPair, RemoteError> {
    let request = egg_mode::auth::request_token(&key_pair(consumer), callback.as_str()).await?;
    Ok(TokenPair::new(request.key, request.secret))
}

pub fn authorize_url(request: &TokenPair) -> String {
    egg_mode::auth::authorize_url(&key_pair(request))
}

/// Trades the verified request token for the user's access token and profile
pub async fn access_token(
    consumer: &TokenPair,
    request: &TokenPair,
    verifier: &str,
) -> Result<(TokenPair, Profile), RemoteError> {
    let (token, user_id, screen_name) =
        egg_mode::auth::access_token(key_pair(consumer), &key_pair(request), verifier).await?;
    let access = match &token {
        Token::Access { access, .. } => TokenPair::new(access.key.clone(), access.secret.clone()),
        Token::Bearer(_) => {
            return Err(RemoteError::Request {
                message: "Expected an access token, got a bearer token".to_string(),
            })
        }
    };
    let user = egg_mode::auth::verify_tokens(&token).await?;
    log::info!("@{} ({}) signed in", screen_name, user_id);
    let profile = Profile {
        id: UserId::from(user_id),
        username: screen_name,
        display_name: user.response.name.clone(),
        photo: user.response.profile_image_url_https.clone(),
    };
    Ok((access, profile))
}
