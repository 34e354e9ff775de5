//! Outbound JSON requests with proxy rotation and a direct fallback.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use http::header::{HeaderMap, HeaderValue, COOKIE};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::time;

use crate::config::FetcherConfig;
use crate::error::{AttemptError, TransportError};
use crate::pool::ProxyPool;
use crate::proxy::Endpoint;
use crate::transport::{HttpTransport, OutboundRequest};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Issues logical requests against the upstream API.
///
/// Each attempt asks the pool for a fresh proxy, so a retry rotates to a
/// different egress. Attempts follow each other immediately.
pub struct ResilientFetcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn HttpTransport>,
    config: FetcherConfig,
    headers: HeaderMap,
    limiter: Option<Limiter>,
}

impl ResilientFetcher {
    /// Create a fetcher drawing proxies from `pool` and sending through
    /// `transport`. Session cookies from the config become a `Cookie` header.
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn HttpTransport>, config: FetcherConfig) -> Self {
        let mut headers = config.headers.clone();
        if let Some(cookies) = &config.cookies {
            match HeaderValue::from_str(cookies) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => warn!("Ignoring session cookies that are not a valid header value: {}", e),
            }
        }

        let limiter = config.max_requests_per_second.map(|rps| {
            let per_second = NonZeroU32::new(rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
            RateLimiter::direct(Quota::per_second(per_second))
        });

        Self {
            pool,
            transport,
            config,
            headers,
            limiter,
        }
    }

    /// POST `payload` as JSON to `target` and return the parsed JSON reply.
    ///
    /// With `use_proxy`, up to `max_retries` proxied attempts are made
    /// (downgrading to direct once the pool has nothing to offer), followed by
    /// exactly one direct attempt. Without it, only the `max_retries` direct
    /// attempts are made. `None` means every attempt failed.
    pub async fn request(&self, target: &str, payload: &Value, use_proxy: bool) -> Option<Value> {
        let body = payload.to_string();
        let max_retries = self.config.max_retries;
        let mut proxied = use_proxy;

        for attempt in 1..=max_retries {
            let via = if proxied {
                let picked = self.pool.pick();
                if picked.is_none() {
                    warn!(
                        "No proxy available (pool {:?}), continuing without proxy",
                        self.pool.state()
                    );
                    proxied = false;
                }
                picked
            } else {
                None
            };

            match self.attempt(target, &body, via.as_ref()).await {
                Ok(value) => return Some(value),
                Err(e) => warn!(
                    "Request to {} via {} failed (attempt {}/{}): {}",
                    target,
                    egress(via.as_ref()),
                    attempt,
                    max_retries,
                    e
                ),
            }
        }

        if use_proxy {
            info!("Proxied attempts to {} exhausted, trying a direct connection", target);
            match self.attempt(target, &body, None).await {
                Ok(value) => return Some(value),
                Err(e) => warn!("Direct fallback to {} failed: {}", target, e),
            }
        }

        warn!("Giving up on {}", target);
        None
    }

    async fn attempt(&self, target: &str, body: &str, via: Option<&Endpoint>) -> Result<Value, AttemptError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        debug!("POST {} via {}", target, egress(via));

        let timeout = self.config.request_timeout;
        let request = OutboundRequest::post(target, body.to_string(), self.headers.clone(), timeout);
        let response = time::timeout(timeout, self.transport.execute(via, &request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if contains_ignore_ascii_case(&response.body, &self.config.soft_block_marker) {
            return Err(AttemptError::SoftBlocked(self.config.soft_block_marker.clone()));
        }
        if !response.status.is_success() {
            return Err(AttemptError::Status(response.status));
        }
        Ok(serde_json::from_str(&response.body)?)
    }
}

/// ASCII case-insensitive substring search. An empty needle never matches.
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.as_bytes();
    !needle.is_empty()
        && haystack
            .as_bytes()
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
}

fn egress(via: Option<&Endpoint>) -> String {
    via.map_or_else(|| "direct".to_string(), ToString::to_string)
}
