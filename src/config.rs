//! Configuration for the proxy pool and the resilient fetcher.

use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::source::ListProvider;

/// Default reachability target used to verify proxies.
pub const DEFAULT_VERIFY_URL: &str = "https://api.ipify.org?format=json";

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Providers to fetch proxy lists from.
    pub providers: Vec<ListProvider>,
    /// URL requested through each candidate during verification.
    pub verify_url: String,
    /// Timeout for a single verification.
    pub verify_timeout: Duration,
    /// Maximum number of verifications in flight at once.
    pub verify_concurrency: usize,
    /// Delay before the first background refresh.
    pub initial_delay: Duration,
    /// Interval between background refreshes.
    pub refresh_interval: Duration,
    /// Pause after a failed background refresh.
    pub failure_cooldown: Duration,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    providers: Vec<ListProvider>,
    verify_url: Option<String>,
    verify_timeout: Option<Duration>,
    verify_concurrency: Option<usize>,
    initial_delay: Option<Duration>,
    refresh_interval: Option<Duration>,
    failure_cooldown: Option<Duration>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            verify_url: None,
            verify_timeout: None,
            verify_concurrency: None,
            initial_delay: None,
            refresh_interval: None,
            failure_cooldown: None,
        }
    }

    /// Set the list providers to fetch candidates from.
    pub fn providers(mut self, providers: Vec<ListProvider>) -> Self {
        self.providers = providers;
        self
    }

    /// Add a single list provider.
    pub fn provider(mut self, provider: ListProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the URL used for verification.
    pub fn verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = Some(url.into());
        self
    }

    /// Set the timeout for a single verification.
    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of concurrent verifications.
    pub fn verify_concurrency(mut self, cap: usize) -> Self {
        self.verify_concurrency = Some(cap);
        self
    }

    /// Set the delay before the first background refresh.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the interval between background refreshes.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the pause after a failed background refresh.
    pub fn failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = Some(cooldown);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            providers: self.providers,
            verify_url: self.verify_url.unwrap_or_else(|| DEFAULT_VERIFY_URL.to_string()),
            verify_timeout: self.verify_timeout.unwrap_or(Duration::from_secs(2)),
            verify_concurrency: self.verify_concurrency.unwrap_or(20).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_secs(1)),
            refresh_interval: self.refresh_interval.unwrap_or(Duration::from_secs(1800)),
            failure_cooldown: self.failure_cooldown.unwrap_or(Duration::from_secs(300)),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the resilient fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Number of attempts before the direct fallback.
    pub max_retries: usize,
    /// Timeout applied to each attempt.
    pub request_timeout: Duration,
    /// Case-insensitive marker that flags an anti-automation response.
    pub soft_block_marker: String,
    /// Headers sent with every request.
    pub headers: HeaderMap,
    /// Opaque session cookie blob, sent verbatim.
    pub cookies: Option<String>,
    /// Optional cap on outbound attempts per second.
    pub max_requests_per_second: Option<f64>,
}

impl FetcherConfig {
    /// Create a new configuration builder.
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::new()
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfigBuilder::new().build()
    }
}

/// The browser-like header set the dashboard API expects.
pub fn browser_headers() -> HeaderMap {
    const HEADERS: &[(&str, &str)] = &[
        ("accept", "*/*"),
        ("accept-language", "zh-CN,zh;q=0.9"),
        ("origin", "https://dune.com"),
        ("priority", "u=1, i"),
        ("referer", "https://dune.com/"),
        (
            "sec-ch-ua",
            "\"Google Chrome\";v=\"135\", \"Not-A.Brand\";v=\"8\", \"Chromium\";v=\"135\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"macOS\""),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-site"),
        (
            "user-agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        ),
        ("content-type", "application/json"),
    ];

    HEADERS
        .iter()
        .map(|(name, value)| {
            (
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            )
        })
        .collect()
}

/// Builder for `FetcherConfig`.
pub struct FetcherConfigBuilder {
    max_retries: Option<usize>,
    request_timeout: Option<Duration>,
    soft_block_marker: Option<String>,
    headers: Option<HeaderMap>,
    cookies: Option<String>,
    max_requests_per_second: Option<f64>,
}

impl FetcherConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_retries: None,
            request_timeout: None,
            soft_block_marker: None,
            headers: None,
            cookies: None,
            max_requests_per_second: None,
        }
    }

    /// Set the number of attempts before the direct fallback.
    pub fn max_retries(mut self, count: usize) -> Self {
        self.max_retries = Some(count);
        self
    }

    /// Set the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the soft-block marker.
    pub fn soft_block_marker(mut self, marker: impl Into<String>) -> Self {
        self.soft_block_marker = Some(marker.into());
        self
    }

    /// Replace the header set sent with every request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Set the session cookie blob.
    pub fn cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    /// Throttle outbound attempts to this rate.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> FetcherConfig {
        FetcherConfig {
            max_retries: self.max_retries.unwrap_or(5),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            soft_block_marker: self
                .soft_block_marker
                .unwrap_or_else(|| "just a moment".to_string()),
            headers: self.headers.unwrap_or_else(browser_headers),
            cookies: self.cookies.filter(|c| !c.trim().is_empty()),
            max_requests_per_second: self.max_requests_per_second.filter(|rps| *rps > 0.0),
        }
    }
}

impl Default for FetcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let config = ProxyPoolConfig::default();
        assert_eq!(config.verify_timeout, Duration::from_secs(2));
        assert_eq!(config.verify_concurrency, 20);
        assert_eq!(config.refresh_interval, Duration::from_secs(1800));
        assert_eq!(config.failure_cooldown, Duration::from_secs(300));
        assert_eq!(config.verify_url, DEFAULT_VERIFY_URL);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = ProxyPoolConfig::builder().verify_concurrency(0).build();
        assert_eq!(config.verify_concurrency, 1);
    }

    #[test]
    fn fetcher_defaults() {
        let config = FetcherConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.soft_block_marker, "just a moment");
        assert_eq!(config.headers["content-type"], "application/json");
        assert_eq!(config.headers["origin"], "https://dune.com");
        assert!(config.cookies.is_none());
        assert!(config.max_requests_per_second.is_none());
    }

    #[test]
    fn blank_cookies_are_ignored() {
        let config = FetcherConfig::builder().cookies("   ").build();
        assert!(config.cookies.is_none());

        let config = FetcherConfig::builder().cookies("a=b; c=d").build();
        assert_eq!(config.cookies.as_deref(), Some("a=b; c=d"));
    }
}
