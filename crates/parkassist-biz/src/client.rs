//! Typed HTTP client for the downstream business API

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use parkassist_core::TRACE_ID_HEADER;

#[derive(Debug, Error)]
pub enum BizApiError {
    #[error("HTTP status {status}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl BizApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BizApiError::Status { status, .. } => Some(*status),
            BizApiError::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Downstream business API. All reads are idempotent.
#[async_trait]
pub trait BizApi: Send + Sync {
    async fn get_arrears_orders(
        &self,
        plate_no: Option<&str>,
        city_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError>;

    async fn get_parking_order(&self, order_no: &str) -> Result<Value, BizApiError>;

    async fn get_billing_rules(
        &self,
        city_code: Option<&str>,
        lot_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError>;

    async fn simulate_billing(
        &self,
        rule_code: &str,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
    ) -> Result<Value, BizApiError>;
}

/// `BizApi` over HTTP. A per-request trace id is attached as `X-Trace-Id`
/// when set.
pub struct BizApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    trace_id: Option<String>,
}

impl BizApiClient {
    pub fn new(base_url: impl Into<String>, timeout_seconds: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs_f64(timeout_seconds.max(0.1)),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn apply_trace(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.trace_id {
            Some(trace_id) => request.header(TRACE_ID_HEADER, trace_id),
            None => request,
        }
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, BizApiError> {
        let url = self.url(path);
        debug!(%url, ?params, "biz_api GET");
        let request = self
            .apply_trace(self.client.get(&url))
            .query(params)
            .timeout(self.timeout);
        Self::read_json(request.send().await).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, BizApiError> {
        let url = self.url(path);
        debug!(%url, "biz_api POST");
        let request = self
            .apply_trace(self.client.post(&url))
            .json(body)
            .timeout(self.timeout);
        Self::read_json(request.send().await).await
    }

    async fn read_json(
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, BizApiError> {
        let response = result.map_err(|err| BizApiError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BizApiError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(BizApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| BizApiError::Transport(err.to_string()))
    }

    fn as_list(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl BizApi for BizApiClient {
    async fn get_arrears_orders(
        &self,
        plate_no: Option<&str>,
        city_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(plate_no) = plate_no {
            params.push(("plate_no", plate_no));
        }
        if let Some(city_code) = city_code {
            params.push(("city_code", city_code));
        }
        let value = self.get_json("/arrears-orders", &params).await?;
        Ok(Self::as_list(value))
    }

    async fn get_parking_order(&self, order_no: &str) -> Result<Value, BizApiError> {
        self.get_json(&format!("/parking-orders/{order_no}"), &[])
            .await
    }

    async fn get_billing_rules(
        &self,
        city_code: Option<&str>,
        lot_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(city_code) = city_code {
            params.push(("city_code", city_code));
        }
        if let Some(lot_code) = lot_code {
            params.push(("lot_code", lot_code));
        }
        let value = self.get_json("/billing-rules", &params).await?;
        Ok(Self::as_list(value))
    }

    async fn simulate_billing(
        &self,
        rule_code: &str,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
    ) -> Result<Value, BizApiError> {
        let body = serde_json::json!({
            "rule_code": rule_code,
            "entry_time": entry_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            "exit_time": exit_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        self.post_json("/billing-rules/simulate", &body).await
    }
}
