//! Introspection tools exposed to the ReAct clarify agent

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use parkassist_core::{ClarifyTool, ToolOutcome};

use crate::client::{BizApi, BizApiError};

fn reason_for(err: &BizApiError) -> String {
    match err {
        BizApiError::Status { status, .. } => format!("http_{status}"),
        BizApiError::Transport(_) => "request_error".to_string(),
    }
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Check whether an order number exists; on a hit, surface the slots the
/// order implies.
pub struct LookupOrderTool {
    biz: Arc<dyn BizApi>,
}

impl LookupOrderTool {
    pub const NAME: &'static str = "lookup_order";

    pub fn new(biz: Arc<dyn BizApi>) -> Self {
        Self { biz }
    }
}

#[async_trait]
impl ClarifyTool for LookupOrderTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "按订单号查询订单是否存在。"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_no": {"type": "string", "description": "订单号，例如 SCN-020"}
            },
            "required": ["order_no"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutcome {
        let Some(order_no) = arg_str(&args, "order_no").map(|v| v.to_uppercase()) else {
            return ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": false,
                "reason": "missing_order_no",
            }));
        };

        debug!(order_no, "clarify tool lookup_order");
        match self.biz.get_parking_order(&order_no).await {
            Ok(order) => ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": true,
                "order_no": order_no,
                "plate_no": order.get("plate_no").cloned().unwrap_or(Value::Null),
                "city_code": order.get("city_code").cloned().unwrap_or(Value::Null),
                "lot_code": order.get("lot_code").cloned().unwrap_or(Value::Null),
            })),
            Err(err) => ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": false,
                "order_no": order_no,
                "reason": reason_for(&err),
            })),
        }
    }
}

/// Check whether billing rules exist for a lot (optionally scoped by city).
pub struct QueryBillingRulesTool {
    biz: Arc<dyn BizApi>,
}

impl QueryBillingRulesTool {
    pub const NAME: &'static str = "query_billing_rules_by_params";

    pub fn new(biz: Arc<dyn BizApi>) -> Self {
        Self { biz }
    }
}

#[async_trait]
impl ClarifyTool for QueryBillingRulesTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "按停车场编码（可选城市）查询是否存在匹配计费规则。"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lot_code": {"type": "string", "description": "停车场编码，例如 LOT-A"},
                "city_code": {"type": "string", "description": "城市编码（可选）"}
            },
            "required": ["lot_code"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutcome {
        let Some(lot_code) = arg_str(&args, "lot_code").map(|v| v.to_uppercase()) else {
            return ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": false,
                "reason": "missing_lot_code",
            }));
        };
        let city_code = arg_str(&args, "city_code");

        debug!(lot_code, "clarify tool query_billing_rules_by_params");
        match self
            .biz
            .get_billing_rules(city_code.as_deref(), Some(&lot_code))
            .await
        {
            Ok(rows) if rows.is_empty() => ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": false,
                "lot_code": lot_code,
                "city_code": city_code,
                "reason": "rule_not_found",
            })),
            Ok(rows) => ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": true,
                "lot_code": lot_code,
                "city_code": city_code,
                "matched_rule_count": rows.len(),
                "rule_codes": rows
                    .iter()
                    .filter_map(|row| row.get("rule_code").and_then(Value::as_str))
                    .collect::<Vec<_>>(),
            })),
            Err(err) => ToolOutcome::new(json!({
                "tool": Self::NAME,
                "hit": false,
                "lot_code": lot_code,
                "city_code": city_code,
                "reason": reason_for(&err),
            })),
        }
    }
}

/// The tool set handed to the clarify agent, in preferred call order.
pub fn build_clarify_tools(biz: Arc<dyn BizApi>) -> Vec<Arc<dyn ClarifyTool>> {
    vec![
        Arc::new(LookupOrderTool::new(Arc::clone(&biz))),
        Arc::new(QueryBillingRulesTool::new(biz)),
    ]
}
