//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on one request/reply round trip
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default bound on acquiring a connection from the pool
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Configuration for the pub/sub client
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Connection acquire timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Close a session whose connection has been silent this long
    pub idle_timeout_ms: Option<u64>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            idle_timeout_ms: None,
        }
    }
}

impl PubSubConfig {
    /// Set the request timeout
    #[must_use]
    pub const fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Set the connection acquire timeout
    #[must_use]
    pub const fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the session idle timeout
    #[must_use]
    pub const fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    /// Request timeout as a `Duration`
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connection acquire timeout as a `Duration`
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Session idle timeout as a `Duration`, if set
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: PubSubConfig = serde_json::from_str(r#"{"idle_timeout_ms": 250}"#).unwrap();

        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_builders() {
        let config = PubSubConfig::default()
            .with_request_timeout_ms(100)
            .with_connect_timeout_ms(50);

        assert_eq!(config.request_timeout(), Duration::from_millis(100));
        assert_eq!(config.connect_timeout(), Duration::from_millis(50));
        assert_eq!(config.idle_timeout(), None);
    }
}
