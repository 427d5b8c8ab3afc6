//! Takealot seller API page fetcher.
//!
//! Offers: `GET {base}/v2/offers?page_number=&page_size=`.
//! Sales:  `GET {base}/v2/sales?page_number=&page_size=[&filters=start_date:..;end_date:..]`.
//! Responses carry the items under `offers` / `sales` and a `page_summary`
//! with `page_number` and `total_pages`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use super::proxy::{ProxyError, ProxyPool};
use super::retry::RetryPolicy;
use super::trait_::{FetchError, Page, PageFetcher, PageRequest};
use crate::config::{AppConfig, MAX_PAGE_SIZE};
use crate::models::DataType;
use crate::telemetry::metric_names;

const ERROR_BODY_LIMIT: usize = 512;

pub struct TakealotClient {
    base_url: Url,
    proxies: ProxyPool,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    offers: Option<Vec<JsonValue>>,
    #[serde(default)]
    sales: Option<Vec<JsonValue>>,
    #[serde(default)]
    page_summary: Option<PageSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct PageSummary {
    #[serde(default)]
    page_number: Option<u32>,
    #[serde(default)]
    total_pages: Option<u32>,
}

impl TakealotClient {
    pub fn new(base_url: Url, proxies: ProxyPool, retry: RetryPolicy) -> Self {
        Self {
            base_url,
            proxies,
            retry,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ProxyError> {
        let base_url = Url::parse(&cfg.marketplace.api_base)?;
        let proxies = ProxyPool::from_urls(&cfg.proxy.urls, cfg.marketplace.request_timeout())?;
        Ok(Self::new(
            base_url,
            proxies,
            RetryPolicy::from(&cfg.rate_limit_policy),
        ))
    }

    fn page_url(&self, request: &PageRequest, page_size: u32) -> Result<Url, FetchError> {
        let path = match request.data_type {
            DataType::Products => "v2/offers",
            DataType::Sales => "v2/sales",
        };
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let mut url = base.join(path).map_err(|e| FetchError::InvalidRequest {
            message: format!("cannot build url: {e}"),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("page_number", &request.page_number.to_string())
                .append_pair("page_size", &page_size.to_string());
            if request.data_type == DataType::Sales
                && let Some(window) = request.window
            {
                query.append_pair(
                    "filters",
                    &format!(
                        "start_date:{};end_date:{}",
                        window.start.format("%Y-%m-%d"),
                        window.end.format("%Y-%m-%d")
                    ),
                );
            }
        }
        Ok(url)
    }

    async fn send_once(&self, request: &PageRequest, url: Url) -> Result<Page, FetchError> {
        let route = self.proxies.next_route();
        debug!(route = %route.label, %url, "Fetching marketplace page");

        let response = route
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Key {}", request.credential.expose()))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                status: None,
                message: describe_transport_error(&e),
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await.map_err(|e| FetchError::Transient {
                status: Some(status.as_u16()),
                message: describe_transport_error(&e),
            })?;
            return parse_page(request.data_type, request.page_number, &body);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = truncate(response.text().await.unwrap_or_default());
        Err(FetchError::from_status(status.as_u16(), retry_after, body))
    }
}

#[async_trait]
impl PageFetcher for TakealotClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        if request.page_number == 0 {
            return Err(FetchError::InvalidRequest {
                message: "page numbers start at 1".to_string(),
            });
        }
        let page_size = request.page_size.clamp(1, MAX_PAGE_SIZE);
        let url = self.page_url(request, page_size)?;
        let data_type = request.data_type.as_str();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.send_once(request, url.clone()).await;
            metrics::histogram!(metric_names::FETCH_LATENCY, "data_type" => data_type)
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(page) => {
                    metrics::counter!(metric_names::PAGES_FETCHED, "data_type" => data_type)
                        .increment(1);
                    return Ok(page);
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(
                        attempt - 1,
                        error.retry_after_secs().map(Duration::from_secs),
                    );
                    warn!(
                        data_type,
                        page = request.page_number,
                        attempt,
                        error_kind = error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Marketplace request failed, backing off"
                    );
                    metrics::counter!(
                        metric_names::FETCH_RETRIES,
                        "data_type" => data_type,
                        "kind" => error.kind()
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(
                        data_type,
                        page = request.page_number,
                        attempt,
                        error = %error,
                        "Marketplace page fetch failed"
                    );
                    metrics::counter!(
                        metric_names::FETCH_FAILURES,
                        "data_type" => data_type,
                        "kind" => error.kind()
                    )
                    .increment(1);
                    return Err(error);
                }
            }
        }
    }
}

fn parse_page(data_type: DataType, requested: u32, body: &[u8]) -> Result<Page, FetchError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| FetchError::Malformed {
        message: e.to_string(),
    })?;

    let records = match data_type {
        DataType::Products => envelope.offers,
        DataType::Sales => envelope.sales,
    }
    .unwrap_or_default();

    let summary = envelope.page_summary.unwrap_or_default();
    Ok(Page {
        records,
        page_number: summary.page_number.unwrap_or(requested),
        total_pages: summary.total_pages,
    })
}

/// Retry-After as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).num_seconds().max(0) as u64)
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
