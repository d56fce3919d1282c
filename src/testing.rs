//! In-memory doubles for the Twitter API and cache layer

use crate::cache::CacheInvalidator;
use crate::credentials::{Credentials, TokenPair};
use crate::twitter::{GraphClient, RemoteError, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn credentials() -> Credentials {
    Credentials::new(
        TokenPair::new("consumer-key", "consumer-secret"),
        TokenPair::new("access-key", "access-secret"),
    )
    .unwrap()
}

pub fn ids(ids: &[&str]) -> Vec<UserId> {
    ids.iter().map(|id| UserId::from(*id)).collect()
}

pub fn request_error(message: &str) -> RemoteError {
    RemoteError::Request {
        message: message.to_string(),
    }
}

/// Answers from a fixed script and records what it was asked
pub struct ScriptedClient {
    followed: Result<Vec<UserId>, RemoteError>,
    excluded: Mutex<Result<Vec<UserId>, RemoteError>>,
    failing: HashSet<UserId>,
    delays: HashMap<UserId, Duration>,
    updates: Mutex<Vec<(UserId, bool)>>,
    followed_calls: AtomicUsize,
    excluded_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn following(followed: &[&str]) -> Self {
        Self {
            followed: Ok(ids(followed)),
            excluded: Mutex::new(Ok(Vec::new())),
            failing: HashSet::new(),
            delays: HashMap::new(),
            updates: Mutex::new(Vec::new()),
            followed_calls: AtomicUsize::new(0),
            excluded_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn fail_fetch(mut self, error: RemoteError) -> Self {
        self.followed = Err(error);
        self
    }

    pub fn fail_update(mut self, id: &str) -> Self {
        self.failing.insert(UserId::from(id));
        self
    }

    pub fn delay_update(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(UserId::from(id), delay);
        self
    }

    pub fn excluding(self, excluded: &[&str]) -> Self {
        self.set_excluded(excluded);
        self
    }

    pub fn fail_confirmation(self, error: RemoteError) -> Self {
        *self.excluded.lock().unwrap() = Err(error);
        self
    }

    /// What Twitter reports from now on
    pub fn set_excluded(&self, excluded: &[&str]) {
        *self.excluded.lock().unwrap() = Ok(ids(excluded));
    }

    pub fn updates(&self) -> Vec<(UserId, bool)> {
        let mut updates = self.updates.lock().unwrap().clone();
        updates.sort();
        updates
    }

    pub fn followed_calls(&self) -> usize {
        self.followed_calls.load(Ordering::SeqCst)
    }

    pub fn excluded_calls(&self) -> usize {
        self.excluded_calls.load(Ordering::SeqCst)
    }

    /// Most updates that were ever pending at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphClient for ScriptedClient {
    async fn list_followed_ids(&self, _: &Credentials) -> Result<Vec<UserId>, RemoteError> {
        self.followed_calls.fetch_add(1, Ordering::SeqCst);
        self.followed.clone()
    }

    async fn update_relationship(
        &self,
        _: &Credentials,
        id: &UserId,
        want_retweets: bool,
    ) -> Result<(), RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = self
            .delays
            .get(id)
            .copied()
            .unwrap_or(Duration::from_millis(1));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.updates
            .lock()
            .unwrap()
            .push((id.clone(), want_retweets));
        if self.failing.contains(id) {
            Err(request_error(&format!("update {} refused", id)))
        } else {
            Ok(())
        }
    }

    async fn list_excluded_ids(&self, _: &Credentials) -> Result<Vec<UserId>, RemoteError> {
        self.excluded_calls.fetch_add(1, Ordering::SeqCst);
        self.excluded.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingInvalidator {
    tags: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, tag: &str) {
        self.tags.lock().unwrap().push(tag.to_string());
    }
}
