//! Analytics store access (read-only).
//!
//! Inference and feedback events are written by the reasoning gateway; this
//! service only reads them to decorate investigation views.

mod clickhouse;
mod memory;

pub use clickhouse::ClickHouseAnalytics;
pub use memory::InMemoryAnalytics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Summary of one inference (ids and metadata, no payloads).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceSummary {
    pub id: String,
    pub function_name: String,
    pub variant_name: String,
    pub episode_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Boolean,
    Float,
    Comment,
    Demonstration,
}

impl FeedbackKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "boolean" => Some(Self::Boolean),
            "float" => Some(Self::Float),
            "comment" => Some(Self::Comment),
            "demonstration" => Some(Self::Demonstration),
            _ => None,
        }
    }
}

/// One feedback record attached to an inference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRecord {
    pub feedback_type: FeedbackKind,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    pub value: serde_json::Value,
    pub timestamp: String,
}

/// A single inference joined with its model-call metadata, flattened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceDetail {
    pub id: String,
    pub function_name: String,
    pub variant_name: String,
    pub episode_id: String,
    pub timestamp: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub processing_time_ms: Option<u64>,
    pub model_name: Option<String>,
    pub model_provider_name: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub response_time_ms: Option<u64>,
    pub raw_request: Option<String>,
    pub raw_response: Option<String>,
    pub feedback: Vec<FeedbackRecord>,
}

/// Parse a stored JSON string, keeping it as a plain string when it is not JSON.
pub(crate) fn json_or_string(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Build a typed feedback value from its stringified column.
pub(crate) fn feedback_value(kind: FeedbackKind, raw: &str) -> serde_json::Value {
    match kind {
        FeedbackKind::Boolean => match raw {
            "true" | "1" => serde_json::Value::Bool(true),
            "false" | "0" => serde_json::Value::Bool(false),
            other => serde_json::Value::String(other.to_string()),
        },
        FeedbackKind::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(raw.to_string())),
        FeedbackKind::Comment => serde_json::Value::String(raw.to_string()),
        FeedbackKind::Demonstration => json_or_string(raw),
    }
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Number of inferences recorded for an episode.
    async fn inference_count(&self, episode_id: &str) -> anyhow::Result<u64>;

    /// Inference summaries for an episode, oldest first.
    async fn list_inferences(&self, episode_id: &str) -> anyhow::Result<Vec<InferenceSummary>>;

    /// One inference with model metadata and all feedback kinds.
    async fn get_inference(&self, inference_id: &str) -> anyhow::Result<Option<InferenceDetail>>;
}
