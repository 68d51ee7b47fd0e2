//! Scripted `BizApi` for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{BizApi, BizApiError};

/// Test double for the business API: per-endpoint scripted payloads plus a
/// call log. Clones share state.
#[derive(Clone, Default)]
pub struct MockBizApi {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    arrears: Vec<Value>,
    arrears_error: Option<u16>,
    orders: HashMap<String, Value>,
    order_error: Option<u16>,
    billing_rules: Vec<Value>,
    rules_error: Option<u16>,
    simulation: Option<Value>,
    simulate_error: Option<u16>,
    calls: Vec<String>,
}

impl MockBizApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_arrears(&self, rows: Vec<Value>) {
        self.inner.write().arrears = rows;
    }

    pub fn fail_arrears(&self, status: Option<u16>) {
        self.inner.write().arrears_error = Some(status.unwrap_or(0));
    }

    pub fn set_order(&self, order_no: &str, order: Value) {
        self.inner.write().orders.insert(order_no.to_string(), order);
    }

    pub fn fail_orders(&self, status: Option<u16>) {
        self.inner.write().order_error = Some(status.unwrap_or(0));
    }

    pub fn set_billing_rules(&self, rows: Vec<Value>) {
        self.inner.write().billing_rules = rows;
    }

    pub fn fail_billing_rules(&self, status: Option<u16>) {
        self.inner.write().rules_error = Some(status.unwrap_or(0));
    }

    pub fn set_simulation(&self, simulation: Value) {
        self.inner.write().simulation = Some(simulation);
    }

    pub fn fail_simulate(&self, status: Option<u16>) {
        self.inner.write().simulate_error = Some(status.unwrap_or(0));
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.read().calls.clone()
    }

    fn error_for(code: u16) -> BizApiError {
        if code == 0 {
            BizApiError::Transport("mock transport error".into())
        } else {
            BizApiError::Status {
                status: code,
                body: String::new(),
            }
        }
    }
}

#[async_trait]
impl BizApi for MockBizApi {
    async fn get_arrears_orders(
        &self,
        _plate_no: Option<&str>,
        _city_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError> {
        let mut inner = self.inner.write();
        inner.calls.push("get_arrears_orders".into());
        if let Some(code) = inner.arrears_error {
            return Err(Self::error_for(code));
        }
        Ok(inner.arrears.clone())
    }

    async fn get_parking_order(&self, order_no: &str) -> Result<Value, BizApiError> {
        let mut inner = self.inner.write();
        inner.calls.push(format!("get_parking_order:{order_no}"));
        if let Some(code) = inner.order_error {
            return Err(Self::error_for(code));
        }
        inner
            .orders
            .get(order_no)
            .cloned()
            .ok_or(BizApiError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn get_billing_rules(
        &self,
        _city_code: Option<&str>,
        _lot_code: Option<&str>,
    ) -> Result<Vec<Value>, BizApiError> {
        let mut inner = self.inner.write();
        inner.calls.push("get_billing_rules".into());
        if let Some(code) = inner.rules_error {
            return Err(Self::error_for(code));
        }
        Ok(inner.billing_rules.clone())
    }

    async fn simulate_billing(
        &self,
        rule_code: &str,
        _entry_time: DateTime<Utc>,
        _exit_time: DateTime<Utc>,
    ) -> Result<Value, BizApiError> {
        let mut inner = self.inner.write();
        inner.calls.push(format!("simulate_billing:{rule_code}"));
        if let Some(code) = inner.simulate_error {
            return Err(Self::error_for(code));
        }
        Ok(inner
            .simulation
            .clone()
            .unwrap_or_else(|| serde_json::json!({"total_amount": "0.00"})))
    }
}
