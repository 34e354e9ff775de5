//! # dune-dashboard-fetch
//!
//! Retrieves chart data from Dune dashboards by replaying the site's own API
//! calls, with every outbound request routed through a self-maintaining pool
//! of free proxies.
//!
//! The pool fetches candidate proxies from public list providers, verifies
//! them concurrently and refreshes itself in the background. The
//! [`ResilientFetcher`] rotates through working proxies on failure and ends
//! with a direct attempt, so a request only comes back empty when every
//! egress path failed.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetcher;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod source;
pub mod transport;
mod utils;

#[cfg(test)]
mod testing;

pub use config::{FetcherConfig, FetcherConfigBuilder, ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use dashboard::{parse_dashboard_url, DashboardClient, DashboardConfig, DashboardData};
pub use error::{AttemptError, DashboardError, NoProxyAvailable, SourceError, TransportError};
pub use fetcher::ResilientFetcher;
pub use middleware::ProxyPoolMiddleware;
pub use pool::{MaintenanceHandle, PoolState, PoolStats, ProxyPool, RefreshReport};
pub use proxy::{Endpoint, Scheme};
pub use source::{HttpProxySource, ListProvider, ProviderFormat, ProxySource, StaticSource};
pub use transport::{HttpTransport, OutboundRequest, ReqwestTransport, TransportResponse};
