//! Client side of the payment history query gateway.
//!
//! The gateway is a single POST endpoint returning a page of payment records
//! together with a full-set summary. Transport failures surface as typed
//! errors to the reconciler, which treats them as fail-soft; no retries are
//! performed here: the change feed is the only retry mechanism.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const GATEWAY_PATH: &str = "/functions/v1/get-payment-history";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
    Error,
}

impl PaymentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub payment_id: String,
    pub amount: f64,
    pub memo: String,
    pub status: PaymentStatus,
    pub txid: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub external_user_id: String,
    pub page: u64,
    pub page_size: u64,
}

impl HistoryRequest {
    /// Build a request with page and page size clamped to their minimums.
    #[must_use]
    pub fn new(external_user_id: impl Into<String>, page: u64, page_size: u64) -> Self {
        Self {
            external_user_id: external_user_id.into(),
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub total_records: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSlice {
    pub count: u64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_payments: u64,
    pub total_amount: f64,
    pub status_breakdown: BTreeMap<String, StatusSlice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub success: bool,
    pub data: Vec<PaymentRecord>,
    pub pagination: Pagination,
    pub summary: HistorySummary,
}

#[derive(Debug, Error)]
pub enum HistoryClientError {
    #[error("history_client_invalid_base_url")]
    InvalidBaseUrl,
    #[error("history_request_failed:{message}")]
    Request { message: String },
    #[error("history_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("history_json_decode_failed:{message}")]
    Decode { message: String },
}

#[async_trait]
pub trait HistoryTransport: Send + Sync {
    async fn fetch_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, HistoryClientError>;
}

/// Gateway client over HTTP. Single attempt per call; the transport timeout
/// is the only timeout applied anywhere in the retrieval path.
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpHistoryClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> Result<String, HistoryClientError> {
        if self.base_url.is_empty() {
            return Err(HistoryClientError::InvalidBaseUrl);
        }
        Ok(format!("{}{GATEWAY_PATH}", self.base_url))
    }
}

#[async_trait]
impl HistoryTransport for HttpHistoryClient {
    async fn fetch_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, HistoryClientError> {
        let url = self.endpoint()?;
        let response = self
            .http
            .post(&url)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|error| HistoryClientError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryClientError::Http { status, body });
        }

        response
            .json::<HistoryResponse>()
            .await
            .map_err(|error| HistoryClientError::Decode {
                message: error.to_string(),
            })
    }
}
