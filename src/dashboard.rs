//! Dune dashboard retrieval: locate the dashboard, resolve each chart's
//! latest execution and download its rows.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::error::DashboardError;
use crate::fetcher::ResilientFetcher;

pub const GRAPHQL_API: &str = "https://core-api.dune.com/public/graphql";
pub const EXECUTION_API: &str = "https://core-api.dune.com/public/execution";

const FIND_DASHBOARD_QUERY: &str = r#"query FindDashboard($filters: DashboardFilterInput!) {
    dashboards(filters: $filters, pagination: {first: 1}) {
        edges { node { ...FindDashboard __typename } __typename }
        __typename
    }
}

fragment User on User {
    id
    name
    profile_image_url: profileImageUrl
    __typename
}

fragment Team on Team {
    id
    name
    handle
    profile_image_url: profileImageUrl
    __typename
}

fragment DashboardVisualization on Visualization {
    id
    type
    name
    description
    options
    created_at: createdAt
    query_details: query {
        query_id: id
        name
        description
        show_watermark: showWatermark
        parameters
        dataset_id: datasetId
        user { ...User __typename }
        team { ...Team __typename }
        __typename
    }
    __typename
}

fragment FindDashboard on Dashboard {
    id
    name
    slug
    isPrivate
    isArchived
    createdAt
    repoLink
    tags
    hasStarred
    isTrending
    mintable
    verificationStatus
    starCount
    pageViewCount(timeframe: TIMEFRAME_ALL)
    user { ...User __typename }
    team { ...Team __typename }
    forkedDashboard {
        slug
        name
        user { name __typename }
        team { handle __typename }
        __typename
    }
    textWidgets { id text options __typename }
    visualizationWidgets {
        id
        options
        visualization { ...DashboardVisualization __typename }
        __typename
    }
    paramWidgets {
        id
        key
        visualization_widget_id: visualizationWidgetId
        query_id: queryId
        dashboard_id: dashboardId
        options
        __typename
    }
    __typename
}"#;

const GET_EXECUTION_QUERY: &str = r#"query GetLatestResultSetIds($canRefresh: Boolean!, $queryId: Int!, $parameters: [ExecutionParameterInput!]) {
    resultSetForQuery(
        canRefresh: $canRefresh
        queryId: $queryId
        parameters: $parameters
    ) {
        completedExecutionId
        failedExecutionId
        pendingExecutionId
        __typename
    }
}"#;

/// Where and how the dashboard API is called.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub graphql_url: String,
    pub execution_url: String,
    /// Route calls through the proxy pool.
    pub use_proxy: bool,
    /// Rows requested per chart.
    pub sample_count: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            graphql_url: GRAPHQL_API.to_string(),
            execution_url: EXECUTION_API.to_string(),
            use_proxy: true,
            sample_count: 8000,
        }
    }
}

/// Split `https://dune.com/<handle>/<slug>` into handle and slug.
pub fn parse_dashboard_url(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.host_str()?.contains("dune.com") {
        return None;
    }
    let parts: Vec<&str> = parsed.path().trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [handle, slug] if !handle.is_empty() && !slug.is_empty() => {
            Some((handle.to_string(), slug.to_string()))
        }
        _ => None,
    }
}

/// The query behind one visualization, and how to present it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartQuery {
    pub query_id: i64,
    pub parameters: Value,
    pub options: Value,
    pub columns: Vec<String>,
    pub visualization_id: Value,
    pub visualization_type: Value,
    pub visualization_name: Value,
}

impl ChartQuery {
    /// Extract the query from a `DashboardVisualization` node.
    ///
    /// `options` may arrive JSON-encoded as a string; undecodable options
    /// become an empty object. Columns are the keys of `columnMapping`.
    pub fn from_visualization(visualization: &Value) -> Option<Self> {
        let details = visualization.get("query_details").filter(|d| d.is_object())?;
        let query_id = details.get("query_id").and_then(Value::as_i64)?;
        let parameters = match details.get("parameters") {
            Some(Value::Null) | None => json!([]),
            Some(p) => p.clone(),
        };

        let options = match visualization.get("options") {
            Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
            Some(Value::Null) | None => json!({}),
            Some(other) => other.clone(),
        };
        let columns = options
            .get("columnMapping")
            .and_then(Value::as_object)
            .map(|mapping| mapping.keys().cloned().collect())
            .unwrap_or_default();

        let field = |name: &str| visualization.get(name).cloned().unwrap_or(Value::Null);
        Some(Self {
            query_id,
            parameters,
            options,
            columns,
            visualization_id: field("id"),
            visualization_type: field("type"),
            visualization_name: field("name"),
        })
    }
}

/// Rows of a successful execution.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartResult {
    pub columns: Value,
    pub columns_metadata: Value,
    pub data: Value,
    pub total_row_count: Value,
}

/// One chart of a dashboard.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Chart {
    pub visualization_id: Value,
    pub visualization_type: Value,
    pub visualization_name: Value,
    pub query_id: i64,
    pub options: Value,
    #[serde(flatten)]
    pub result: Option<ChartResult>,
}

/// Everything retrieved for a dashboard.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardData {
    pub dashboard_name: Value,
    pub dashboard_slug: Value,
    pub dashboard_id: Value,
    pub user: Value,
    pub charts: Vec<Chart>,
}

/// Replays the dashboard site's API calls through a `ResilientFetcher`.
pub struct DashboardClient {
    fetcher: Arc<ResilientFetcher>,
    config: DashboardConfig,
}

impl DashboardClient {
    /// Create a client issuing every call through `fetcher`.
    pub fn new(fetcher: Arc<ResilientFetcher>, config: DashboardConfig) -> Self {
        Self { fetcher, config }
    }

    /// Fetch the dashboard node for `handle/slug`.
    pub async fn find_dashboard(&self, handle: &str, slug: &str) -> Option<Value> {
        let payload = json!({
            "operationName": "FindDashboard",
            "variables": {
                "filters": {
                    "slug": {"equals": slug},
                    "handle": {"equals": handle}
                }
            },
            "query": FIND_DASHBOARD_QUERY
        });
        let response = self.post(&self.config.graphql_url, &payload).await?;
        response.pointer("/data/dashboards/edges/0/node").cloned()
    }

    /// Id of the latest completed execution of `query_id`.
    pub async fn execution_id(&self, query_id: i64, parameters: &Value) -> Option<String> {
        let payload = json!({
            "operationName": "GetLatestResultSetIds",
            "variables": {
                "queryId": query_id,
                "parameters": parameters,
                "canRefresh": true
            },
            "query": GET_EXECUTION_QUERY
        });
        let response = self.post(&self.config.graphql_url, &payload).await?;
        response
            .pointer("/data/resultSetForQuery/completedExecutionId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Download the rows of an execution.
    pub async fn chart_data(
        &self,
        execution_id: &str,
        query_id: i64,
        parameters: &Value,
        columns: &[String],
    ) -> Option<Value> {
        let payload = json!({
            "execution_id": execution_id,
            "query_id": query_id,
            "parameters": parameters,
            "output_columns": columns,
            "sampling": {"count": self.config.sample_count}
        });
        self.post(&self.config.execution_url, &payload).await
    }

    /// Retrieve every chart of the dashboard at `url`.
    ///
    /// Charts whose query has no usable execution are skipped.
    pub async fn dashboard_data(&self, url: &str) -> Result<DashboardData, DashboardError> {
        let (handle, slug) = parse_dashboard_url(url).ok_or(DashboardError::InvalidUrl)?;

        info!("Fetching dashboard info for {}/{}", handle, slug);
        let node = self
            .find_dashboard(&handle, &slug)
            .await
            .ok_or(DashboardError::NotFound)?;

        let widgets = node
            .get("visualizationWidgets")
            .and_then(Value::as_array)
            .filter(|widgets| !widgets.is_empty())
            .ok_or(DashboardError::NoVisualizations)?;

        let mut charts = Vec::new();
        for widget in widgets {
            let Some(query) = widget
                .get("visualization")
                .and_then(ChartQuery::from_visualization)
            else {
                continue;
            };

            info!("Getting execution ID for query {}", query.query_id);
            let Some(execution_id) = self.execution_id(query.query_id, &query.parameters).await else {
                warn!("No completed execution for query {}", query.query_id);
                continue;
            };

            info!("Fetching chart data for execution {}", execution_id);
            let Some(data) = self
                .chart_data(&execution_id, query.query_id, &query.parameters, &query.columns)
                .await
            else {
                continue;
            };

            charts.push(Chart {
                visualization_id: query.visualization_id,
                visualization_type: query.visualization_type,
                visualization_name: query.visualization_name,
                query_id: query.query_id,
                options: query.options,
                result: data.get("execution_succeeded").and_then(Value::as_object).map(succeeded),
            });
        }

        let field = |name: &str| node.get(name).cloned().unwrap_or(Value::Null);
        Ok(DashboardData {
            dashboard_name: field("name"),
            dashboard_slug: field("slug"),
            dashboard_id: field("id"),
            user: node.pointer("/user/name").cloned().unwrap_or(Value::Null),
            charts,
        })
    }

    async fn post(&self, target: &str, payload: &Value) -> Option<Value> {
        self.fetcher.request(target, payload, self.config.use_proxy).await
    }
}

fn succeeded(result: &Map<String, Value>) -> ChartResult {
    let field = |name: &str, default: Value| result.get(name).cloned().unwrap_or(default);
    ChartResult {
        columns: field("columns", json!([])),
        columns_metadata: field("columns_metadata", json!([])),
        data: field("data", json!([])),
        total_row_count: field("total_row_count", json!(0)),
    }
}
