//! Cached API responses grouped by tag, and the ways to tell caches a tag is stale

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Fire-and-forget notification that everything cached under `tag` is stale
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, tag: &str);
}

struct Cached {
    expires_at: DateTime<Utc>,
    value: Value,
}

/// In-process response cache, entries keyed by tag then by key. Entries expire
/// `ttl` after they were stored even if nothing invalidates them.
pub struct ResponseCache {
    ttl: Duration,
    groups: Mutex<HashMap<String, HashMap<String, Cached>>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, tag: &str, key: &str) -> Option<Value> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let group = groups.get_mut(tag)?;
        let cached = group.get(key)?;
        if cached.expires_at > Utc::now() {
            return Some(cached.value.clone());
        }
        group.remove(key);
        None
    }

    pub fn insert(&self, tag: &str, key: &str, value: Value) {
        let cached = Cached {
            expires_at: Utc::now() + self.ttl,
            value,
        };
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string(), cached);
    }

    /// Drops every entry under `tag`, returning how many there were
    pub fn clear(&self, tag: &str) -> usize {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.remove(tag).map_or(0, |group| group.len())
    }
}

impl CacheInvalidator for ResponseCache {
    fn invalidate(&self, tag: &str) {
        let cleared = self.clear(tag);
        log::debug!("Cleared {} cached responses tagged {:?}", cleared, tag);
    }
}

/// Tells an external cache layer to purge a tag by POSTing `{"tag": ...}` to it
pub struct PurgeWebhook {
    client: reqwest::Client,
    url: Url,
}

impl PurgeWebhook {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl CacheInvalidator for PurgeWebhook {
    fn invalidate(&self, tag: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("No runtime to purge {:?} at {}, skipping", tag, self.url);
                return;
            }
        };
        let request = self.client.post(self.url.clone()).json(&json!({ "tag": tag }));
        let url = self.url.clone();
        let tag = tag.to_string();
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    log::debug!("Purged {:?} at {}", tag, url)
                }
                Ok(response) => log::warn!(
                    "Purging {:?} at {} returned {}",
                    tag,
                    url,
                    response.status()
                ),
                Err(e) => log::warn!("Unable to purge {:?} at {}: {}", tag, url, e),
            }
        });
    }
}

/// Passes every invalidation on to all of its members
#[derive(Default, Clone)]
pub struct Fanout(Vec<Arc<dyn CacheInvalidator>>);

impl Fanout {
    pub fn with(mut self, member: Arc<dyn CacheInvalidator>) -> Self {
        self.0.push(member);
        self
    }
}

impl CacheInvalidator for Fanout {
    fn invalidate(&self, tag: &str) {
        self.0.iter().for_each(|member| member.invalidate(tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingInvalidator;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[test]
    fn clearing_a_tag_leaves_other_tags() {
        let cache = ResponseCache::new(Duration::hours(1));
        cache.insert("friends", "1", json!([1, 2]));
        cache.insert("friends", "2", json!([3]));
        cache.insert("profile", "1", json!({"name": "a"}));

        assert_eq!(cache.get("friends", "2"), Some(json!([3])));
        assert_eq!(cache.clear("friends"), 2);
        assert_eq!(cache.get("friends", "1"), None);
        assert_eq!(cache.get("profile", "1"), Some(json!({"name": "a"})));
        assert_eq!(cache.clear("friends"), 0);
    }

    #[test]
    fn invalidation_clears_the_tag() {
        let cache = ResponseCache::new(Duration::hours(1));
        cache.insert("friends", "1", json!([]));
        cache.invalidate("friends");
        assert_eq!(cache.get("friends", "1"), None);
    }

    #[test]
    fn fanout_reaches_every_member() {
        let first = Arc::new(RecordingInvalidator::default());
        let second = Arc::new(RecordingInvalidator::default());
        let fanout = Fanout::default().with(first.clone()).with(second.clone());
        fanout.invalidate("friends");
        assert_eq!(first.tags(), vec!["friends"]);
        assert_eq!(second.tags(), vec!["friends"]);
    }

    #[test]
    fn entries_expire_after_their_ttl() {
        let cache = ResponseCache::new(Duration::zero());
        cache.insert("friends", "1", json!([1]));
        assert_eq!(cache.get("friends", "1"), None);
        assert_eq!(cache.clear("friends"), 0);
    }

    /// Accepts one HTTP request and hands back its body
    async fn purge_endpoint() -> (Url, oneshot::Receiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/purge", listener.local_addr().unwrap())).unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0; length];
            reader.read_exact(&mut body).await.unwrap();
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            tx.send(serde_json::from_slice(&body).unwrap()).ok();
        });
        (url, rx)
    }

    #[tokio::test]
    async fn webhook_posts_the_tag() {
        let (url, body) = purge_endpoint().await;
        PurgeWebhook::new(url).invalidate("friends");
        let body = tokio::time::timeout(std::time::Duration::from_secs(5), body)
            .await
            .expect("purge request never arrived")
            .unwrap();
        assert_eq!(body, json!({ "tag": "friends" }));
    }

    #[test]
    fn webhook_without_runtime_sends_nothing() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let url = Url::parse(&format!("http://{}/purge", listener.local_addr().unwrap())).unwrap();
        PurgeWebhook::new(url).invalidate("friends");
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(
            listener.accept().unwrap_err().kind(),
            std::io::ErrorKind::WouldBlock
        );
    }
}
