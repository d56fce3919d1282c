//! Cookie sessions kept in memory. Signing out or restarting the server forgets them.

use super::error::HttpError;
use super::AppState;
use crate::credentials::TokenPair;
use crate::twitter::Profile;
use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use futures::future::{ready, Ready};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "_blindfold";

#[derive(Debug, Clone, Default)]
pub struct SessionData {
    /// Set between `/api/auth` and the OAuth callback
    pub request_token: Option<TokenPair>,
    pub access: Option<TokenPair>,
    pub profile: Option<Profile>,
}

struct Entry {
    expires_at: DateTime<Utc>,
    data: SessionData,
}

pub struct SessionStore {
    max_age: Duration,
    secure: bool,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    /// Sessions live for `max_age` after they were last saved. `secure` marks the
    /// cookie HTTPS-only.
    pub fn new(max_age: Duration, secure: bool) -> Self {
        Self {
            max_age,
            secure,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session named by the request's cookie, if it exists and hasn't expired
    pub fn load(&self, req: &HttpRequest) -> Option<(String, SessionData)> {
        let id = req.cookie(SESSION_COOKIE)?.value().to_string();
        let data = self.get(&id)?;
        Some((id, data))
    }

    pub fn get(&self, id: &str) -> Option<SessionData> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.get(id)?;
        if entry.expires_at > Utc::now() {
            return Some(entry.data.clone());
        }
        sessions.remove(id);
        None
    }

    /// Stores `data`, allocating a fresh id when there isn't one yet
    pub fn save(&self, id: Option<String>, data: SessionData) -> String {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, entry| entry.expires_at > now);
        sessions.insert(
            id.clone(),
            Entry {
                expires_at: now + self.max_age,
                data,
            },
        );
        id
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cookie naming session `id`, expiring along with it
    pub fn cookie(&self, id: String) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, id)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(time::Duration::seconds(self.max_age.num_seconds()))
            .finish()
    }
}

/// A signed-in user. Extracting it rejects the request with `401` otherwise.
#[derive(Debug)]
pub struct Authenticated {
    pub access: TokenPair,
    pub profile: Profile,
}

fn authenticate(req: &HttpRequest) -> Result<Authenticated, HttpError> {
    let state = req
        .app_data::<Data<AppState>>()
        .ok_or_else(HttpError::unauthorized)?;
    match state.sessions.load(req) {
        Some((
            _,
            SessionData {
                access: Some(access),
                profile: Some(profile),
                ..
            },
        )) => Ok(Authenticated {
            access,
            profile,
        }),
        _ => Err(HttpError::unauthorized()),
    }
}

impl FromRequest for Authenticated {
    type Error = HttpError;
    type Future = Ready<Result<Self, HttpError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}
