//! Business-API integration for ParkAssist
//!
//! `BizApi` is the seam to the downstream parking operations service;
//! `BizFactTools` composes typed facts from it for the answer workflow, and
//! the clarify tools expose narrow lookups to the ReAct agent.

mod client;
mod clarify_tools;
mod facts;
pub mod mock;

pub use clarify_tools::{build_clarify_tools, LookupOrderTool, QueryBillingRulesTool};
pub use client::{BizApi, BizApiClient, BizApiError};
pub use facts::{ArrearsFacts, BizFact, BizFactTools, FeeVerifyFacts, ToolErrorFacts};
pub use mock::MockBizApi;
