//! Middleware implementation for reqwest.
//!
//! Lets any `reqwest_middleware` client egress through the pool. Only
//! transport errors trigger rotation here; response bodies are left to the
//! caller.

use crate::error::NoProxyAvailable;
use crate::pool::ProxyPool;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;
use std::time::Duration;

/// Middleware that uses a pool of proxies for HTTP requests.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    /// Proxied attempts before the direct fallback.
    retry_count: usize,
    /// Timeout for each proxied attempt.
    timeout: Duration,
    /// Whether to finish with one direct attempt through the inner client.
    direct_fallback: bool,
}

impl ProxyPoolMiddleware {
    /// Wrap an existing pool. Defaults: 5 proxied attempts, 30s timeout,
    /// direct fallback enabled.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self {
            pool,
            retry_count: 5,
            timeout: Duration::from_secs(30),
            direct_fallback: true,
        }
    }

    /// Set the number of proxied attempts.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the timeout for each proxied attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail with `NoProxyAvailable` instead of going direct.
    pub fn without_direct_fallback(mut self) -> Self {
        self.direct_fallback = false;
        self
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 1..=self.retry_count {
            let Some(proxy) = self.pool.pick() else {
                let stats = self.pool.stats();
                warn!(
                    "No proxy available. Candidates: {}, Working: {}",
                    stats.candidates, stats.working
                );
                break;
            };

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            info!("Using proxy: {} (attempt {})", proxy, attempt);

            let reqwest_proxy = match proxy.to_reqwest_proxy() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to create proxy from {}: {}", proxy, e);
                    last_error = Some(Error::Reqwest(e));
                    continue;
                }
            };

            let client = match reqwest::Client::builder()
                .proxy(reqwest_proxy)
                .timeout(self.timeout)
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to build client with proxy {}: {}", proxy, e);
                    last_error = Some(Error::Reqwest(e));
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(
                        "Request failed with proxy {} (attempt {}): {}",
                        proxy, attempt, err
                    );
                    last_error = Some(Error::Reqwest(err));
                }
            }
        }

        if self.direct_fallback {
            info!("Falling back to a direct connection");
            return next.run(req, extensions).await;
        }

        Err(last_error.unwrap_or_else(|| Error::Middleware(anyhow!(NoProxyAvailable))))
    }
}
