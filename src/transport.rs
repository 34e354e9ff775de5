//! The HTTP exchange used for every verification and every request attempt.

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use log::debug;
use reqwest::Client;

use crate::error::TransportError;
use crate::proxy::Endpoint;

/// A single HTTP request, independent of the egress path it takes.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
    /// Bound on connecting, sending and reading the whole response.
    pub timeout: Duration,
}

impl OutboundRequest {
    /// A bodiless GET.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout,
        }
    }

    /// A POST carrying `body`.
    pub fn post(url: impl Into<String>, body: String, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(body),
            timeout,
        }
    }
}

/// What came back from a completed exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Issues one HTTP request, optionally relayed through a proxy.
///
/// `via = None` means a direct connection.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        via: Option<&Endpoint>,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// `HttpTransport` backed by reqwest.
///
/// Direct requests share one client that ignores proxy environment
/// variables; proxied requests get a client built for that proxy.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    direct: Client,
}

impl ReqwestTransport {
    /// Build the shared direct client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let direct = Client::builder().no_proxy().build()?;
        Ok(Self { direct })
    }

    fn client_for(&self, via: &Endpoint, timeout: Duration) -> Result<Client, TransportError> {
        let proxy = via
            .to_reqwest_proxy()
            .map_err(|error| TransportError::InvalidProxy {
                endpoint: via.to_string(),
                error,
            })?;
        Ok(Client::builder()
            .proxy(proxy)
            .connect_timeout(timeout)
            .build()?)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        via: Option<&Endpoint>,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        let client = match via {
            Some(endpoint) => self.client_for(endpoint, request.timeout)?,
            None => self.direct.clone(),
        };

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let body = response.text().await.map_err(classify)?;
        debug!(
            "{} {} via {} -> {}",
            request.method,
            request.url,
            via.map_or_else(|| "direct".to_string(), ToString::to_string),
            status
        );
        Ok(TransportResponse { status, body })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Scheme;
    use crate::testing::{serve_fixed, serve_silent};
    use std::time::Instant;

    #[tokio::test]
    async fn direct_request_reads_status_and_body() {
        let addr = serve_fixed(200, r#"{"ok":true}"#).await;
        let transport = ReqwestTransport::new().unwrap();
        let request = OutboundRequest::get(format!("http://{}/", addr), Duration::from_secs(2));

        let response = transport.execute(None, &request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn proxied_request_is_sent_to_the_proxy() {
        // a plain-http target through an http proxy is forwarded in absolute form,
        // so a fixed responder standing in for the proxy answers it
        let proxy_addr = serve_fixed(200, "relayed").await;
        let endpoint = Endpoint::new(Scheme::Http, proxy_addr.ip().to_string(), proxy_addr.port());
        let transport = ReqwestTransport::new().unwrap();
        let request = OutboundRequest::get("http://upstream.invalid/ip", Duration::from_secs(2));

        let response = transport.execute(Some(&endpoint), &request).await.unwrap();
        assert_eq!(response.body, "relayed");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let addr = serve_silent().await;
        let transport = ReqwestTransport::new().unwrap();
        let request = OutboundRequest::get(format!("http://{}/", addr), Duration::from_millis(300));

        let started = Instant::now();
        let result = transport.execute(None, &request).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
