// SPDX-License-Identifier: AGPL-3.0-or-later
//! Elasticsearch access for telemetry documents.
//!
//! Talks to the cluster over its REST API: NDJSON bulks for the daily
//! indices, composite aggregations for the performance jobs and a scroll
//! for bulk reads. Bulk writes retry on connection-class faults only.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::models::{SiteItem, SnmpPerformanceAlarmItem, DATA_TYPE_PLANT, SITE_STATION_INDEX, SOLAR_INDEX};

const DEFAULT_ES_TIMEOUT: Duration = Duration::from_secs(30);
const AGG_ES_TIMEOUT: Duration = Duration::from_secs(300);
const SCROLL_KEEPALIVE: &str = "2m";
const SCROLL_PAGE_SIZE: usize = 1000;
const COMPOSITE_PAGE_SIZE: usize = 10_000;
const MAX_RETRY_ATTEMPTS: usize = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// Store interface the collectors and alarm jobs depend on.
#[async_trait]
pub trait SolarStore: Send + Sync {
    async fn bulk_index(&self, index: &str, docs: Vec<Value>) -> Result<()>;
    async fn upsert_site_station(&self, docs: Vec<SiteItem>) -> Result<()>;
    async fn performance_low(
        &self,
        duration: i32,
        efficiency_factor: f64,
        focus_hour: i32,
        threshold_pct: f64,
    ) -> Result<Vec<PerformanceBucket>>;
    async fn sum_performance_low(&self, duration: i32) -> Result<Vec<PerformanceBucket>>;
    async fn unique_plants(&self, index: &str) -> Result<Vec<UniquePlantBucket>>;
    async fn performance_alarms(&self, index: &str) -> Result<Vec<SnmpPerformanceAlarmItem>>;
}

/// One bucket of the composite performance aggregation, keyed by
/// (date, vendor_type, id).
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceBucket {
    pub key: BTreeMap<String, Value>,
    #[serde(default)]
    pub doc_count: i64,
    #[serde(default)]
    pub max_daily: Option<MetricValue>,
    #[serde(default)]
    pub avg_capacity: Option<MetricValue>,
    #[serde(default)]
    pub hits: Option<TopHits>,
}

impl PerformanceBucket {
    pub fn key_str(&self, name: &str) -> Option<&str> {
        self.key.get(name).and_then(Value::as_str)
    }

    pub fn max_daily_value(&self) -> f64 {
        self.max_daily.as_ref().and_then(|m| m.value).unwrap_or(0.0)
    }

    pub fn avg_capacity_value(&self) -> f64 {
        self.avg_capacity.as_ref().and_then(|m| m.value).unwrap_or(0.0)
    }

    pub fn top_hit_source(&self) -> Option<&Value> {
        self.hits
            .as_ref()
            .and_then(|h| h.hits.hits.first())
            .map(|h| &h.source)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricValue {
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopHits {
    pub hits: HitsEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_source")]
    pub source: Value,
}

/// One bucket of the unique-plant terms aggregation.
#[derive(Debug, Clone, Deserialize)]
pub struct UniquePlantBucket {
    pub key: Value,
    #[serde(default)]
    pub doc_count: i64,
    #[serde(default)]
    pub data: Option<TopHits>,
}

impl UniquePlantBucket {
    pub fn top_hit_source(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|h| h.hits.hits.first())
            .map(|h| &h.source)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CompositeAggResult {
    #[serde(default)]
    after_key: Option<Value>,
    #[serde(default)]
    buckets: Vec<PerformanceBucket>,
}

pub struct ElasticRepo {
    http: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl ElasticRepo {
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(DEFAULT_ES_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            host: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}/{}", self.host, path));
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }

    async fn create_index_if_not_exist(&self, index: &str) -> Result<()> {
        let exists = self
            .request(reqwest::Method::HEAD, index)
            .send()
            .await?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }

        let resp = self.request(reqwest::Method::PUT, index).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            // Lost a create race with a sibling job; the index is there.
            if body.to_string().contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(DataError::ElasticError(format!(
                "create index {index} failed with status {status}"
            )));
        }

        if !body
            .get("acknowledged")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(DataError::IndexNotAcknowledged(index.to_string()));
        }

        Ok(())
    }

    async fn execute_bulk(&self, index: &str, body: String) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("{index}/_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::ElasticError(format!(
                "bulk to {index} failed with status {status}"
            )));
        }

        let result: Value = resp.json().await?;
        if !result.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(());
        }

        // A 409 on a create action means the document is already there, which
        // keeps retried bulks idempotent. Anything else is a real failure.
        for item in result
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for (_, op) in item.as_object().into_iter().flatten() {
                let status = op.get("status").and_then(Value::as_i64).unwrap_or(200);
                if status >= 400 && status != 409 {
                    return Err(DataError::ElasticError(format!(
                        "bulk item failed: {}",
                        op.get("error").unwrap_or(&Value::Null)
                    )));
                }
            }
        }

        Ok(())
    }

    async fn composite_search(
        &self,
        query: &Value,
        aggregation: &Value,
    ) -> Result<Vec<PerformanceBucket>> {
        let mut buckets = Vec::new();
        let mut after_key: Option<Value> = None;

        loop {
            let mut agg = aggregation.clone();
            if let Some(after) = &after_key {
                agg["composite"]["after"] = after.clone();
            }

            let body = json!({
                "size": 0,
                "query": query,
                "aggs": { "performance_alarm": agg },
            });

            let resp = self
                .request(reqwest::Method::POST, &format!("{SOLAR_INDEX}-*/_search"))
                .timeout(AGG_ES_TIMEOUT)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(DataError::ElasticError(format!(
                    "performance search failed with status {status}"
                )));
            }

            let result: Value = resp.json().await?;
            let agg_result = result
                .get("aggregations")
                .and_then(|a| a.get("performance_alarm"))
                .cloned()
                .ok_or_else(|| {
                    DataError::ElasticError("cannot get composite performance alarm".to_string())
                })?;
            let page: CompositeAggResult = serde_json::from_value(agg_result)?;

            buckets.extend(page.buckets);

            // The after-key is an opaque continuation cursor; iteration is
            // done only when it is absent, never on page undercount.
            match page.after_key {
                Some(key) => after_key = Some(key),
                None => break,
            }
        }

        Ok(buckets)
    }

    fn plant_window_query(duration: i32) -> Value {
        json!({
            "bool": {
                "must": [
                    { "match": { "data_type": DATA_TYPE_PLANT } },
                    { "range": { "@timestamp": {
                        "gte": format!("now-{duration}d/d"),
                        "lte": "now-1d/d",
                    }}},
                ]
            }
        })
    }

    fn performance_sources() -> Value {
        json!([
            { "date": { "date_histogram": {
                "field": "@timestamp",
                "calendar_interval": "day",
                "format": "yyyy-MM-dd",
            }}},
            { "vendor_type": { "terms": { "field": "vendor_type.keyword" } } },
            { "id": { "terms": { "field": "id.keyword" } } },
        ])
    }

    fn performance_top_hits() -> Value {
        json!({
            "top_hits": {
                "size": 1,
                "_source": { "includes": [
                    "id", "name", "vendor_type", "node_type", "ac_phase",
                    "plant_status", "area", "site_id", "site_city_code",
                    "site_city_name", "installed_capacity",
                ]},
            }
        })
    }
}

#[async_trait]
impl SolarStore for ElasticRepo {
    async fn bulk_index(&self, index: &str, docs: Vec<Value>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        self.create_index_if_not_exist(index).await?;
        let body = build_bulk_create_body(&docs)?;

        with_connection_retries(|attempt| {
            if attempt > 0 {
                debug!(index, attempt, "retrying bulk after connection fault");
            }
            self.execute_bulk(index, body.clone())
        })
        .await
    }

    async fn upsert_site_station(&self, docs: Vec<SiteItem>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        self.create_index_if_not_exist(SITE_STATION_INDEX).await?;

        let mut body = String::new();
        for doc in &docs {
            body.push_str(&serde_json::to_string(
                &json!({ "update": { "_id": doc.site_id } }),
            )?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&json!({
                "doc": doc,
                "doc_as_upsert": true,
            }))?);
            body.push('\n');
        }

        self.execute_bulk(SITE_STATION_INDEX, body).await
    }

    async fn performance_low(
        &self,
        duration: i32,
        efficiency_factor: f64,
        focus_hour: i32,
        threshold_pct: f64,
    ) -> Result<Vec<PerformanceBucket>> {
        let aggregation = json!({
            "composite": {
                "size": COMPOSITE_PAGE_SIZE,
                "sources": Self::performance_sources(),
            },
            "aggs": {
                "max_daily": { "max": { "field": "daily_production" } },
                "avg_capacity": { "avg": { "field": "installed_capacity" } },
                "threshold_percentage": { "bucket_script": {
                    "buckets_path": { "capacity": "avg_capacity" },
                    "script": {
                        "source": "params.capacity * params.efficiency_factor * params.focus_hour * params.threshold_percentage",
                        "params": {
                            "efficiency_factor": efficiency_factor,
                            "focus_hour": focus_hour,
                            "threshold_percentage": threshold_pct,
                        },
                    },
                }},
                "under_threshold": { "bucket_selector": {
                    "buckets_path": {
                        "threshold": "threshold_percentage",
                        "daily": "max_daily",
                    },
                    "script": "params.daily <= params.threshold",
                }},
                "hits": Self::performance_top_hits(),
            },
        });

        self.composite_search(&Self::plant_window_query(duration), &aggregation)
            .await
    }

    async fn sum_performance_low(&self, duration: i32) -> Result<Vec<PerformanceBucket>> {
        let aggregation = json!({
            "composite": {
                "size": COMPOSITE_PAGE_SIZE,
                "sources": Self::performance_sources(),
            },
            "aggs": {
                "max_daily": { "max": { "field": "daily_production" } },
                "avg_capacity": { "avg": { "field": "installed_capacity" } },
                "hits": Self::performance_top_hits(),
            },
        });

        self.composite_search(&Self::plant_window_query(duration), &aggregation)
            .await
    }

    async fn unique_plants(&self, index: &str) -> Result<Vec<UniquePlantBucket>> {
        let body = json!({
            "size": 0,
            "query": { "bool": { "must": [
                { "match": { "data_type": DATA_TYPE_PLANT } },
            ]}},
            "aggs": { "plant": {
                "terms": { "field": "name.keyword", "size": COMPOSITE_PAGE_SIZE },
                "aggs": { "data": { "top_hits": {
                    "size": 1,
                    "_source": { "includes": [
                        "name", "area", "vendor_type", "installed_capacity",
                        "location", "owner",
                    ]},
                }}},
            }},
        });

        let resp = self
            .request(reqwest::Method::POST, &format!("{index}/_search"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::ElasticError(format!(
                "unique plant search failed with status {status}"
            )));
        }

        let result: Value = resp.json().await?;
        let buckets = result
            .get("aggregations")
            .and_then(|a| a.get("plant"))
            .and_then(|p| p.get("buckets"))
            .cloned()
            .ok_or_else(|| DataError::ElasticError("cannot get plant terms".to_string()))?;

        Ok(serde_json::from_value(buckets)?)
    }

    async fn performance_alarms(&self, index: &str) -> Result<Vec<SnmpPerformanceAlarmItem>> {
        let mut items = Vec::new();
        let mut scroll_id: Option<String> = None;

        let outcome = async {
            let resp = self
                .request(
                    reqwest::Method::POST,
                    &format!("{index}/_search?scroll={SCROLL_KEEPALIVE}"),
                )
                .timeout(AGG_ES_TIMEOUT)
                .json(&json!({ "size": SCROLL_PAGE_SIZE, "query": { "match_all": {} } }))
                .send()
                .await?;

            let mut page: Value = resp.json().await?;
            loop {
                if let Some(id) = page.get("_scroll_id").and_then(Value::as_str) {
                    scroll_id = Some(id.to_string());
                }

                let hits = page
                    .get("hits")
                    .and_then(|h| h.get("hits"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                for hit in &hits {
                    if let Some(source) = hit.get("_source") {
                        match serde_json::from_value(source.clone()) {
                            Ok(item) => items.push(item),
                            Err(err) => {
                                warn!(%err, "skipping malformed performance alarm document")
                            }
                        }
                    }
                }

                if hits.len() < SCROLL_PAGE_SIZE {
                    break;
                }

                let Some(id) = &scroll_id else { break };
                let resp = self
                    .request(reqwest::Method::POST, "_search/scroll")
                    .timeout(AGG_ES_TIMEOUT)
                    .json(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": id }))
                    .send()
                    .await?;
                page = resp.json().await?;
            }

            Ok(())
        }
        .await;

        // Release the server-side scroll context whether or not the read
        // finished cleanly.
        if let Some(id) = scroll_id {
            let _ = self
                .request(reqwest::Method::DELETE, "_search/scroll")
                .timeout(Duration::from_secs(10))
                .json(&json!({ "scroll_id": [id] }))
                .send()
                .await;
        }

        outcome.map(|()| items)
    }
}

/// Retry `op` on connection-class errors only, with exponential backoff
/// starting at two seconds. Other errors return immediately.
pub(crate) async fn with_connection_retries<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=MAX_RETRY_ATTEMPTS {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                last_err = Some(err);
                if attempt < MAX_RETRY_ATTEMPTS {
                    tokio::time::sleep(BASE_RETRY_DELAY * (1 << attempt)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| DataError::ConnectionError("retries exhausted".to_string())))
}

fn is_retryable(err: &DataError) -> bool {
    match err {
        DataError::HttpError(e) => e.is_timeout() || e.is_connect(),
        DataError::ElasticError(msg) | DataError::ConnectionError(msg) => {
            msg.contains("cannot assign requested address")
                || msg.contains("connection reset")
                || msg.contains("connection refused")
                || msg.contains("i/o timeout")
        }
        _ => false,
    }
}

fn build_bulk_create_body(docs: &[Value]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        body.push_str(r#"{"create":{}}"#);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn bulk_body_is_one_create_line_per_doc() {
        let docs = vec![json!({"a": 1}), json!({"b": 2})];
        let body = build_bulk_create_body(&docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"create":{}}"#);
        assert_eq!(lines[1], r#"{"a":1}"#);
        assert_eq!(lines[2], r#"{"create":{}}"#);
        assert_eq!(lines[3], r#"{"b":2}"#);
    }

    #[test]
    fn connection_faults_are_retryable() {
        assert!(is_retryable(&DataError::ConnectionError(
            "read tcp: connection reset by peer".to_string()
        )));
        assert!(is_retryable(&DataError::ElasticError(
            "dial tcp: connection refused".to_string()
        )));
        assert!(!is_retryable(&DataError::ElasticError(
            "mapper_parsing_exception".to_string()
        )));
        assert!(!is_retryable(&DataError::NotFound("x".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_retries_twice_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let started = Instant::now();

        let result = with_connection_retries(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DataError::ConnectionError("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Backoff waits are 2s then 4s.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_connection_retries(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(DataError::ElasticError("mapping conflict".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
