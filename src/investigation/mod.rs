//! Investigation orchestration.
//!
//! ## Flow
//!
//! ```text
//!   create ──▶ persist (active) ──▶ AI turn 1 ──┬─▶ plain answer ──────────────▶ completed
//!                                               │
//!                                               └─▶ diagnostic ──▶ pending row ──▶ poll
//!                                                                                   │
//!                                 completed_with_analysis ◀── AI turn 2 ◀── results ┘
//! ```
//!
//! Any failure after the investigation row exists ends the session as
//! `failed` and is reported in the response body rather than as a transport
//! error. The row is written once at creation and once at the end.

mod answer;
mod orchestrator;
mod poller;
mod reads;
mod system_info;

pub use answer::{classify_answer, AiAnswer, DiagnosticCommand, DiagnosticParseError, DiagnosticPayload};
pub use orchestrator::{CreateInvestigation, InvestigationOutcome, Orchestrator};
pub use poller::{wait_for_pending, WaitMode};
pub use reads::{
    InvestigationDetails, InvestigationListItem, InvestigationList, InvestigationQueries,
    ListParams, Pagination,
};
pub use system_info::{initial_prompt, render_system_info};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::llm::ReasoningError;

#[derive(Debug, Error)]
pub enum InvestigationError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Agent {agent_id} is not connected")]
    AgentUnavailable { agent_id: String },

    #[error("Agent {agent_id} has no recorded metrics")]
    NoMetrics { agent_id: String },

    #[error("AI reasoning service error: {0}")]
    Upstream(String),

    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Timed out after {}s waiting for agent results", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

impl InvestigationError {
    /// Stable snake_case name of the error kind, used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::AgentUnavailable { .. } => "agent_unavailable",
            Self::NoMetrics { .. } => "no_metrics",
            Self::Upstream(_) => "upstream_error",
            Self::AgentExecution(_) => "agent_execution_error",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    pub fn failure_info(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<anyhow::Error> for InvestigationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl From<ReasoningError> for InvestigationError {
    fn from(err: ReasoningError) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// A failure reported as data on a committed investigation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

/// Generate a new external investigation id (`INV-<unix millis>-<8 hex>`).
pub fn generate_investigation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("INV-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Whether `id` has the shape produced by [`generate_investigation_id`].
pub fn is_well_formed_investigation_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^INV-\d{13}-[0-9A-F]{8}$").expect("valid regex"))
        .is_match(id)
}
