// Client configuration.
//
// Env vars (all optional, shown with defaults):
//   COMMLINK_REQUEST_TIMEOUT_SECS     30
//   COMMLINK_LOCK_TIMEOUT_SECS        10
//   COMMLINK_VERSIONS_CACHE_TTL_SECS  3600   (0 = keep until invalidated)

use std::time::Duration;

pub const DEFAULT_REFRESH_LOCK_NAME: &str = "matrix_client_token_refresh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Applied to every HTTP call: discovery, request, refresh and retry.
    pub request_timeout: Duration,
    /// Bounded wait for the token refresh lock.
    pub lock_timeout: Duration,
    /// `None` keeps discovery results until explicitly invalidated.
    pub versions_cache_ttl: Option<Duration>,
    pub refresh_lock_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
            versions_cache_ttl: Some(Duration::from_secs(3600)),
            refresh_lock_name: DEFAULT_REFRESH_LOCK_NAME.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            request_timeout: secs("COMMLINK_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            lock_timeout: secs("COMMLINK_LOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            versions_cache_ttl: match secs("COMMLINK_VERSIONS_CACHE_TTL_SECS") {
                Some(0) => None,
                Some(ttl) => Some(Duration::from_secs(ttl)),
                None => defaults.versions_cache_ttl,
            },
            refresh_lock_name: defaults.refresh_lock_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn falls_back_to_defaults() {
        assert_eq!(from_pairs(&[]), ClientConfig::default());
        assert_eq!(
            from_pairs(&[("COMMLINK_LOCK_TIMEOUT_SECS", "soon")]).lock_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("COMMLINK_REQUEST_TIMEOUT_SECS", "5"),
            ("COMMLINK_LOCK_TIMEOUT_SECS", " 2 "),
            ("COMMLINK_VERSIONS_CACHE_TTL_SECS", "0"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.versions_cache_ttl, None);
    }
}
