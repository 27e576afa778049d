// Server version discovery: GET /_matrix/client/versions, cached per server.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info};
use url::Url;

use crate::matrix::{
    command,
    error::MatrixError,
    transport::{SendOptions, Transport},
};

/// Body of `/_matrix/client/versions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSupports {
    pub versions: Vec<String>,
    #[serde(default)]
    pub unstable_features: BTreeMap<String, bool>,
}

/// Cache key for a server: SHA-1 of the URL, hex encoded.
pub fn cache_key(server_url: &str) -> String {
    hex::encode(Sha1::digest(server_url.as_bytes()))
}

/// Key-value store for discovery results.
pub trait VersionCache: Send + Sync {
    /// The entry under `key` if it is younger than `max_age`. `None` for
    /// `max_age` accepts entries of any age.
    fn get(&self, key: &str, max_age: Option<Duration>) -> Option<ServerSupports>;
    fn set(&self, key: &str, supports: ServerSupports);
    fn invalidate(&self, key: &str);
}

struct CacheEntry {
    supports: ServerSupports,
    stored_at: Instant,
}

/// In-memory [`VersionCache`].
///
/// Entries remember when they were stored; each lookup decides how old is
/// too old. Entries are dropped only by [`VersionCache::invalidate`] or
/// [`MemoryVersionCache::clear`].
#[derive(Default)]
pub struct MemoryVersionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryVersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl VersionCache for MemoryVersionCache {
    fn get(&self, key: &str, max_age: Option<Duration>) -> Option<ServerSupports> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| max_age.map_or(true, |age| entry.stored_at.elapsed() < age))
            .map(|entry| entry.supports.clone())
    }

    fn set(&self, key: &str, supports: ServerSupports) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_owned(),
            CacheEntry {
                supports,
                stored_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Fetch what `server_url` supports, from the cache when an entry younger
/// than `max_age` exists.
///
/// Concurrent first fetches for one server may both hit the network; the
/// endpoint is an idempotent GET so the last write simply wins.
pub async fn query_server_supports(
    transport: &dyn Transport,
    cache: &dyn VersionCache,
    server_url: &Url,
    max_age: Option<Duration>,
    timeout: Option<Duration>,
) -> Result<ServerSupports, MatrixError> {
    let key = cache_key(server_url.as_str());
    if let Some(supports) = cache.get(&key, max_age) {
        debug!("server versions for {server_url} served from cache");
        return Ok(supports);
    }

    let response = transport
        .send(
            &command::versions(server_url)?,
            SendOptions {
                status_errors: true,
                timeout,
            },
        )
        .await?;
    let supports: ServerSupports = response.json()?;
    info!("{server_url} advertises versions {:?}", supports.versions);

    cache.set(&key, supports.clone());
    Ok(supports)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::matrix::{command::Command, transport::Response};

    struct FixedTransport {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    impl FixedTransport {
        fn new(status: u16, body: &'static str) -> Self {
            Self { status, body, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, command: &Command, options: SendOptions) -> Result<Response, MatrixError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(command.path(), "/_matrix/client/versions");
            assert!(command.bearer().is_none());
            if options.status_errors && !(200..300).contains(&self.status) {
                return Err(MatrixError::HttpStatus {
                    status: self.status,
                    path: command.path().to_owned(),
                    body: self.body.to_owned(),
                });
            }
            Ok(Response::new(self.status, self.body))
        }
    }

    fn server() -> Url {
        Url::parse("https://matrix.example.org").unwrap()
    }

    #[test]
    fn cache_key_is_sha1_hex() {
        assert_eq!(cache_key("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[tokio::test]
    async fn fetches_once_then_serves_from_cache() {
        let transport = FixedTransport::new(
            200,
            r#"{"versions":["v1.1","v1.7"],"unstable_features":{"org.matrix.msc3916":true}}"#,
        );
        let cache = MemoryVersionCache::new();

        let first = query_server_supports(&transport, &cache, &server(), None, None).await.unwrap();
        let second = query_server_supports(&transport, &cache, &server(), None, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.versions, ["v1.1", "v1.7"]);
        assert_eq!(first.unstable_features.get("org.matrix.msc3916"), Some(&true));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_a_refetch() {
        let transport = FixedTransport::new(200, r#"{"versions":["v1.1"]}"#);
        let cache = MemoryVersionCache::new();

        query_server_supports(&transport, &cache, &server(), None, None).await.unwrap();
        cache.invalidate(&cache_key(server().as_str()));
        query_server_supports(&transport, &cache, &server(), None, None).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_age_is_decided_per_lookup() {
        let transport = FixedTransport::new(200, r#"{"versions":["v1.1"]}"#);
        let cache = MemoryVersionCache::new();
        let hour = Some(Duration::from_secs(3600));

        query_server_supports(&transport, &cache, &server(), hour, None).await.unwrap();
        query_server_supports(&transport, &cache, &server(), hour, None).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        query_server_supports(&transport, &cache, &server(), Some(Duration::ZERO), None)
            .await
            .unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_body_is_a_protocol_error() {
        let transport = FixedTransport::new(200, r#"{"unstable_features":{}}"#);
        let cache = MemoryVersionCache::new();

        let err = query_server_supports(&transport, &cache, &server(), None, None).await.unwrap_err();
        assert!(matches!(err, MatrixError::Protocol(_)));
        assert!(cache.get(&cache_key(server().as_str()), None).is_none());
    }

    #[tokio::test]
    async fn error_status_propagates() {
        let transport = FixedTransport::new(503, "unavailable");
        let cache = MemoryVersionCache::new();

        let err = query_server_supports(&transport, &cache, &server(), None, None).await.unwrap_err();
        assert!(matches!(err, MatrixError::HttpStatus { status: 503, .. }));
    }
}
