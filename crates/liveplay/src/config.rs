use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = concat!("liveplay/", env!("CARGO_PKG_VERSION"));

/// Lower bound on the manifest refresh cadence.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// HTTP options for manifest and segment requests.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string
    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: HeaderMap,

    /// Overall per-request timeout. `None` lets a request wait indefinitely.
    pub timeout: Option<Duration>,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            timeout: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Options for a [`LiveSession`](crate::LiveSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Floor applied to the half-target-duration refresh interval.
    pub min_poll_interval: Duration,

    pub fetcher: FetcherConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            fetcher: FetcherConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Delay before the next manifest refresh: half the target duration,
    /// never below `min_poll_interval`. Manifests without
    /// `#EXT-X-TARGETDURATION` arrive here with [`hls::DEFAULT_TARGET_DURATION`].
    pub fn poll_interval(&self, target_duration_secs: u64) -> Duration {
        Duration::from_secs_f64(target_duration_secs as f64 * 0.5).max(self.min_poll_interval)
    }
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn min_poll_interval(mut self, interval: Duration) -> Self {
        self.config.min_poll_interval = interval;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.fetcher.user_agent = user_agent.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config.fetcher.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.config.fetcher.headers.extend(headers);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.fetcher.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetcher.connect_timeout = timeout;
        self
    }

    pub fn fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.config.fetcher = fetcher;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::REFERER;

    use super::*;

    #[test]
    fn test_poll_interval_is_half_target_with_floor() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval(4), Duration::from_secs(2));
        assert_eq!(config.poll_interval(6), Duration::from_secs(3));
        assert_eq!(config.poll_interval(0), DEFAULT_MIN_POLL_INTERVAL);
        assert_eq!(config.poll_interval(1), DEFAULT_MIN_POLL_INTERVAL);
        assert_eq!(
            config.poll_interval(hls::DEFAULT_TARGET_DURATION),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::builder()
            .min_poll_interval(Duration::from_secs(1))
            .user_agent("test-agent")
            .header(REFERER, HeaderValue::from_static("https://example.com/"))
            .timeout(Some(Duration::from_secs(5)))
            .build();
        assert_eq!(config.min_poll_interval, Duration::from_secs(1));
        assert_eq!(config.fetcher.user_agent, "test-agent");
        assert_eq!(config.fetcher.headers.len(), 1);
        assert_eq!(config.fetcher.timeout, Some(Duration::from_secs(5)));
    }
}
