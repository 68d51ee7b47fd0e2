//! Business fact builders consumed by the answer synthesizer

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use parkassist_core::{HybridAnswerRequest, Intent};

use crate::client::{BizApi, BizApiError};

pub const CHECK_CONSISTENT: &str = "一致";
pub const CHECK_INCONSISTENT: &str = "不一致";
pub const ACTION_AUTO_PASS: &str = "自动通过";
pub const ACTION_MANUAL_REVIEW: &str = "需人工复核";

/// Arrears lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrearsFacts {
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    pub arrears_count: usize,
    pub arrears_order_nos: Vec<String>,
    pub orders: Vec<Value>,
    pub attempted_tools: Vec<String>,
}

/// Fee verification result comparing the order total against a fresh
/// simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeVerifyFacts {
    pub intent: Intent,
    pub order_no: String,
    pub rule_code: String,
    pub entry_time: String,
    pub exit_time: String,
    pub order_total_amount: String,
    pub sim_total_amount: String,
    pub amount_check_result: String,
    pub amount_check_action: String,
    pub order: Value,
    pub simulation: Value,
    pub attempted_tools: Vec<String>,
}

/// Structured error surfaced instead of a fact; the workflow never throws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolErrorFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_tools: Vec<String>,
}

impl ToolErrorFacts {
    pub fn new(intent: Option<Intent>, error: impl Into<String>) -> Self {
        Self {
            intent,
            error: error.into(),
            attempted_tools: Vec::new(),
        }
    }
}

/// Tagged business fact; serializes to the flat JSON object the wire
/// contract expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BizFact {
    Arrears(ArrearsFacts),
    FeeVerify(Box<FeeVerifyFacts>),
    RuleExplain { intent: Intent, note: String },
    ToolError(ToolErrorFacts),
}

impl BizFact {
    pub fn rule_explain_note() -> Self {
        BizFact::RuleExplain {
            intent: Intent::RuleExplain,
            note: "RAG-only explanation flow".to_string(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BizFact::ToolError(facts) => Some(&facts.error),
            _ => None,
        }
    }

    pub fn intent(&self) -> Option<Intent> {
        match self {
            BizFact::Arrears(facts) => Some(facts.intent),
            BizFact::FeeVerify(facts) => Some(facts.intent),
            BizFact::RuleExplain { intent, .. } => Some(*intent),
            BizFact::ToolError(facts) => facts.intent,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

fn quantize_amount(value: &Value) -> String {
    let raw = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => "0".to_string(),
    };
    let amount = Decimal::from_str(raw.trim()).unwrap_or(Decimal::ZERO);
    let mut quantized = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    quantized.rescale(2);
    quantized.to_string()
}

fn parse_iso_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Naive timestamps are taken as UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Composes business facts from the downstream API. Transport and status
/// errors are folded into `ToolError` facts at this boundary.
pub struct BizFactTools {
    biz: Arc<dyn BizApi>,
}

impl BizFactTools {
    pub fn new(biz: Arc<dyn BizApi>) -> Self {
        Self { biz }
    }

    pub async fn build_arrears_facts(&self, payload: &HybridAnswerRequest) -> BizFact {
        info!(
            plate_no = payload.plate_no.as_deref().unwrap_or(""),
            city_code = payload.city_code.as_deref().unwrap_or(""),
            "tool[arrears_check] start"
        );
        let attempted_tools = vec!["get_arrears_orders".to_string()];
        let rows = match self
            .biz
            .get_arrears_orders(payload.plate_no.as_deref(), payload.city_code.as_deref())
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "tool[arrears_check] failed");
                let error = match err {
                    BizApiError::Status { .. } => "arrears_tool_http_error",
                    BizApiError::Transport(_) => "arrears_tool_request_error",
                };
                return BizFact::ToolError(ToolErrorFacts {
                    intent: Some(Intent::ArrearsCheck),
                    error: error.to_string(),
                    attempted_tools,
                });
            }
        };

        info!(count = rows.len(), "tool[arrears_check] done");
        BizFact::Arrears(ArrearsFacts {
            intent: Intent::ArrearsCheck,
            plate_no: payload.plate_no.clone(),
            city_code: payload.city_code.clone(),
            arrears_count: rows.len(),
            arrears_order_nos: rows
                .iter()
                .map(|row| {
                    row.get("order_no")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                })
                .collect(),
            orders: rows,
            attempted_tools,
        })
    }

    pub async fn build_fee_verify_facts(&self, payload: &HybridAnswerRequest) -> BizFact {
        let mut attempted_tools: Vec<String> = Vec::new();

        let Some(order_no) = payload.order_no.as_deref() else {
            info!("tool[fee_verify] skip reason=missing_order_no");
            return BizFact::ToolError(ToolErrorFacts {
                intent: Some(Intent::FeeVerify),
                error: "order_no is required for fee_verify".to_string(),
                attempted_tools,
            });
        };

        info!(order_no, "tool[fee_verify] start");
        attempted_tools.push("get_parking_order".to_string());
        let order = match self.biz.get_parking_order(order_no).await {
            Ok(order) => order,
            Err(err) => {
                warn!(order_no, error = %err, "tool[fee_verify] order lookup failed");
                let error = if err.is_not_found() {
                    "order_not_found"
                } else {
                    match err {
                        BizApiError::Status { .. } => "order_tool_http_error",
                        BizApiError::Transport(_) => "order_tool_request_error",
                    }
                };
                return BizFact::ToolError(ToolErrorFacts {
                    intent: Some(Intent::FeeVerify),
                    error: error.to_string(),
                    attempted_tools,
                });
            }
        };

        let rule_code = payload
            .rule_code
            .clone()
            .or_else(|| {
                order
                    .get("billing_rule_code")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let entry_time = match payload.entry_time.or_else(|| {
            order
                .get("entry_time")
                .and_then(parse_iso_datetime)
        }) {
            Some(entry_time) => entry_time,
            None => {
                warn!(order_no, "tool[fee_verify] invalid_entry_time");
                return BizFact::ToolError(ToolErrorFacts {
                    intent: Some(Intent::FeeVerify),
                    error: "entry_time is invalid for fee_verify".to_string(),
                    attempted_tools,
                });
            }
        };

        let exit_time = match payload.exit_time {
            Some(exit_time) => exit_time,
            None => match order.get("exit_time") {
                None | Some(Value::Null) => {
                    warn!(order_no, "tool[fee_verify] missing_exit_time");
                    return BizFact::ToolError(ToolErrorFacts {
                        intent: Some(Intent::FeeVerify),
                        error: "exit_time is required for fee_verify".to_string(),
                        attempted_tools,
                    });
                }
                Some(raw) => match parse_iso_datetime(raw) {
                    Some(exit_time) => exit_time,
                    None => {
                        warn!(order_no, "tool[fee_verify] invalid_exit_time");
                        return BizFact::ToolError(ToolErrorFacts {
                            intent: Some(Intent::FeeVerify),
                            error: "exit_time is invalid for fee_verify".to_string(),
                            attempted_tools,
                        });
                    }
                },
            },
        };

        attempted_tools.push("simulate_billing".to_string());
        let simulation = match self
            .biz
            .simulate_billing(&rule_code, entry_time, exit_time)
            .await
        {
            Ok(simulation) => simulation,
            Err(err) => {
                warn!(order_no, error = %err, "tool[fee_verify] simulate failed");
                let error = match err {
                    BizApiError::Status { .. } => "simulate_tool_http_error",
                    BizApiError::Transport(_) => "simulate_tool_request_error",
                };
                return BizFact::ToolError(ToolErrorFacts {
                    intent: Some(Intent::FeeVerify),
                    error: error.to_string(),
                    attempted_tools,
                });
            }
        };

        let order_total = quantize_amount(order.get("total_amount").unwrap_or(&Value::Null));
        let sim_total = quantize_amount(simulation.get("total_amount").unwrap_or(&Value::Null));
        let is_consistent = order_total == sim_total;
        info!(
            order_no,
            amount_check_result = if is_consistent { CHECK_CONSISTENT } else { CHECK_INCONSISTENT },
            "tool[fee_verify] done"
        );

        BizFact::FeeVerify(Box::new(FeeVerifyFacts {
            intent: Intent::FeeVerify,
            order_no: order_no.to_string(),
            rule_code,
            entry_time: entry_time.to_rfc3339(),
            exit_time: exit_time.to_rfc3339(),
            order_total_amount: order_total,
            sim_total_amount: sim_total,
            amount_check_result: if is_consistent {
                CHECK_CONSISTENT.to_string()
            } else {
                CHECK_INCONSISTENT.to_string()
            },
            amount_check_action: if is_consistent {
                ACTION_AUTO_PASS.to_string()
            } else {
                ACTION_MANUAL_REVIEW.to_string()
            },
            order,
            simulation,
            attempted_tools,
        }))
    }
}
