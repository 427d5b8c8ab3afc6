//! Page fetcher trait definition
//!
//! The sync engine only sees [`PageFetcher`]: one bounded request per page,
//! with rate limits and transient failures already retried inside.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::crypto::ApiKey;
use crate::models::DataType;

/// Inclusive date filter applied to sales requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One page to fetch.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub credential: ApiKey,
    pub data_type: DataType,
    /// 1-based page number
    pub page_number: u32,
    /// Requested page size; implementations clamp to the API maximum
    pub page_size: u32,
    pub window: Option<DateWindow>,
}

/// Raw records of one page plus what the remote said about pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<JsonValue>,
    pub page_number: u32,
    pub total_pages: Option<u32>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when no further page should be requested after this one.
    pub fn is_last(&self) -> bool {
        self.is_empty()
            || self
                .total_pages
                .is_some_and(|total| self.page_number >= total)
    }
}

/// Fetch failures, classified by what the engine should do about them.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchError {
    /// Still rate limited after the retry budget
    #[error("rate limited by marketplace")]
    RateLimited { retry_after_secs: Option<u64> },
    /// 5xx, timeout or connection failure after the retry budget
    #[error("transient marketplace failure: {message}")]
    Transient { status: Option<u16>, message: String },
    /// 401/403, the stored API key is not accepted
    #[error("marketplace rejected the API key (HTTP {status})")]
    Unauthorized { status: u16 },
    /// Any other 4xx
    #[error("marketplace returned HTTP {status}: {body}")]
    Permanent { status: u16, body: String },
    /// 2xx with a body that is not the expected JSON envelope
    #[error("malformed marketplace response: {message}")]
    Malformed { message: String },
    /// Rejected before any network call
    #[error("invalid page request: {message}")]
    InvalidRequest { message: String },
}

impl FetchError {
    /// Retryable errors keep the job's cursor and are attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Transient { .. }
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: String) -> Self {
        match status {
            429 => FetchError::RateLimited { retry_after_secs },
            401 | 403 => FetchError::Unauthorized { status },
            400..=499 => FetchError::Permanent { status, body },
            _ => FetchError::Transient {
                status: Some(status),
                message: format!("HTTP {status}: {body}"),
            },
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Transient { .. } => "transient",
            FetchError::Unauthorized { .. } => "unauthorized",
            FetchError::Permanent { .. } => "permanent",
            FetchError::Malformed { .. } => "malformed",
            FetchError::InvalidRequest { .. } => "invalid_request",
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError>;
}
