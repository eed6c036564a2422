//! # Agent Investigations
//!
//! Investigation orchestrator for monitored hosts. A user describes an issue
//! on one of their agents; the service asks the AI reasoning gateway for a
//! diagnosis, optionally has the agent run the diagnostics the AI requests,
//! and feeds the results back for a final analysis.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (api) ──▶ Orchestrator ──▶ RelationalStore (Supabase)
//!                      │    ▲
//!                      ▼    │ poll pending
//!               ReasoningClient (TensorZero)     remote agent ──▶ pending row
//!
//!   Read endpoints ──▶ RelationalStore + AnalyticsStore (ClickHouse)
//! ```
//!
//! ## Modules
//! - `api`: axum router, bearer auth middleware, error mapping
//! - `investigation`: the create saga, pending poller and read endpoints
//! - `store`: investigations, pending tasks, agents and metrics
//! - `analytics`: inference and feedback lookups
//! - `llm`: reasoning gateway client with retry classification
//! - `identity`: bearer token validation

pub mod analytics;
pub mod api;
pub mod config;
pub mod identity;
pub mod investigation;
pub mod llm;
pub mod store;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
