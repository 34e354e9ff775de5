//! Discovery of candidate proxies from public list providers.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use log::{info, warn};
use reqwest::Client;

use crate::error::SourceError;
use crate::proxy::{Endpoint, Scheme};
use crate::utils;

/// Supplies candidate endpoints for a refresh.
///
/// Implementations are best-effort: failures are logged and yield fewer
/// (possibly zero) endpoints, they never reach the caller.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self) -> HashSet<Endpoint>;
}

/// Layout of a provider's listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFormat {
    /// One `host:port` or `scheme://host:port` per line.
    PlainText,
    /// A JSON array of rows, optionally wrapped in an object.
    Json,
    /// An HTML page containing a listing table.
    HtmlTable,
}

/// One place proxy lists are published.
#[derive(Debug, Clone)]
pub struct ListProvider {
    /// An `http(s)` URL or a local file path.
    pub location: String,
    pub format: ProviderFormat,
    /// Scheme for rows that do not state their own.
    pub default_scheme: Scheme,
}

impl ListProvider {
    /// Describe a provider at `location` serving `format`.
    pub fn new(location: impl Into<String>, format: ProviderFormat, default_scheme: Scheme) -> Self {
        Self {
            location: location.into(),
            format,
            default_scheme,
        }
    }

    /// One `host:port` or `scheme://host:port` per line.
    pub fn plain_text(location: impl Into<String>, default_scheme: Scheme) -> Self {
        Self::new(location, ProviderFormat::PlainText, default_scheme)
    }

    /// A JSON array of proxy objects, bare or under `proxies`/`data`.
    pub fn json(location: impl Into<String>, default_scheme: Scheme) -> Self {
        Self::new(location, ProviderFormat::Json, default_scheme)
    }

    /// An HTML table with IP address and port columns.
    pub fn html_table(location: impl Into<String>, default_scheme: Scheme) -> Self {
        Self::new(location, ProviderFormat::HtmlTable, default_scheme)
    }

    fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    fn parse(&self, content: &str) -> Result<Vec<Endpoint>, SourceError> {
        match self.format {
            ProviderFormat::PlainText => Ok(utils::parse_plain_list(content, self.default_scheme)),
            ProviderFormat::HtmlTable => Ok(utils::parse_html_table(content, self.default_scheme)),
            ProviderFormat::Json => utils::parse_json_list(content, self.default_scheme).ok_or_else(|| {
                SourceError::Parse {
                    source_name: self.location.clone(),
                }
            }),
        }
    }
}

/// A handful of well-known free providers, one per format.
pub fn default_providers() -> Vec<ListProvider> {
    vec![
        ListProvider::html_table("https://free-proxy-list.net/", Scheme::Http),
        ListProvider::json(
            "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=protocolipport&format=json",
            Scheme::Http,
        ),
        ListProvider::plain_text(
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
            Scheme::Http,
        ),
    ]
}

/// Fetches every configured provider concurrently and merges the results.
pub struct HttpProxySource {
    client: Client,
    providers: Vec<ListProvider>,
}

impl HttpProxySource {
    /// Create a source over `providers`. Lists are downloaded directly,
    /// never through a proxy, with a 15s timeout per provider.
    pub fn new(providers: Vec<ListProvider>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .no_proxy()
            .build()?;
        Ok(Self { client, providers })
    }

    async fn fetch_provider(&self, provider: &ListProvider) -> Result<Vec<Endpoint>, SourceError> {
        let content = if provider.is_remote() {
            let http_error = |error| SourceError::Http {
                source_name: provider.location.clone(),
                error,
            };
            let response = self
                .client
                .get(&provider.location)
                .send()
                .await
                .map_err(http_error)?;
            if !response.status().is_success() {
                return Err(SourceError::Status {
                    source_name: provider.location.clone(),
                    status: response.status(),
                });
            }
            response.text().await.map_err(http_error)?
        } else {
            tokio::fs::read_to_string(&provider.location)
                .await
                .map_err(|error| SourceError::File {
                    path: provider.location.clone(),
                    error,
                })?
        };
        provider.parse(&content)
    }
}

#[async_trait]
impl ProxySource for HttpProxySource {
    async fn fetch(&self) -> HashSet<Endpoint> {
        info!("Fetching proxy lists from {} providers", self.providers.len());

        let results = future::join_all(
            self.providers
                .iter()
                .map(|provider| async move { (provider, self.fetch_provider(provider).await) }),
        )
        .await;

        let mut all_proxies = HashSet::new();
        for (provider, result) in results {
            match result {
                Ok(endpoints) => {
                    info!("Fetched {} proxies from {}", endpoints.len(), provider.location);
                    all_proxies.extend(endpoints);
                }
                Err(e) => warn!("Failed to fetch proxies: {}", e),
            }
        }

        info!("Found {} unique proxies before verification", all_proxies.len());
        all_proxies
    }
}

/// A fixed list of endpoints.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    endpoints: Vec<Endpoint>,
}

impl StaticSource {
    /// Always return `endpoints`.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl ProxySource for StaticSource {
    async fn fetch(&self) -> HashSet<Endpoint> {
        self.endpoints.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve_fixed, unused_addr};

    fn temp_list(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "dune-dashboard-fetch-{}-{}.txt",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn failing_provider_does_not_discard_siblings() {
        let dead = unused_addr();
        let file = temp_list("partial", "1.1.1.1:8080\n2.2.2.2:8080\n");
        let json_addr = serve_fixed(200, r#"[{"ip":"3.3.3.3","port":1080,"protocol":"socks5"}]"#).await;

        let source = HttpProxySource::new(vec![
            ListProvider::plain_text(format!("http://{}/list.txt", dead), Scheme::Http),
            ListProvider::plain_text(file, Scheme::Http),
            ListProvider::json(format!("http://{}/api", json_addr), Scheme::Http),
            ListProvider::plain_text("/nonexistent/dir/list.txt", Scheme::Http),
        ])
        .unwrap();

        let endpoints = source.fetch().await;
        let mut rendered: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        rendered.sort();
        assert_eq!(
            rendered,
            vec![
                "http://1.1.1.1:8080",
                "http://2.2.2.2:8080",
                "socks5://3.3.3.3:1080",
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_and_bad_json_yield_nothing() {
        let not_found = serve_fixed(404, "gone").await;
        let html = serve_fixed(200, "<html>maintenance</html>").await;
        let source = HttpProxySource::new(vec![
            ListProvider::plain_text(format!("http://{}/", not_found), Scheme::Http),
            ListProvider::json(format!("http://{}/", html), Scheme::Http),
        ])
        .unwrap();

        assert!(source.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn duplicates_across_providers_collapse() {
        let a = temp_list("dup-a", "5.5.5.5:80\n");
        let b = temp_list("dup-b", "http://5.5.5.5:80\n6.6.6.6:80\n");
        let source = HttpProxySource::new(vec![
            ListProvider::plain_text(a, Scheme::Http),
            ListProvider::plain_text(b, Scheme::Http),
        ])
        .unwrap();

        assert_eq!(source.fetch().await.len(), 2);
    }

    #[test]
    fn static_source_returns_its_endpoints() {
        let endpoints = vec![
            Endpoint::new(Scheme::Http, "7.7.7.7", 80),
            Endpoint::new(Scheme::Http, "7.7.7.7", 80),
        ];
        let fetched = tokio_test::block_on(StaticSource::new(endpoints).fetch());
        assert_eq!(fetched.len(), 1);
    }

    #[test]
    fn default_providers_cover_every_format() {
        let formats: HashSet<_> = default_providers().iter().map(|p| p.format).collect();
        assert!(formats.contains(&ProviderFormat::PlainText));
        assert!(formats.contains(&ProviderFormat::Json));
        assert!(formats.contains(&ProviderFormat::HtmlTable));
    }
}
