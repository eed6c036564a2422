//! Relational store module with pluggable backends.
//!
//! Supports:
//! - `supabase`: PostgREST over HTTP (production)
//! - `memory`: In-memory storage (non-persistent, for testing and local runs)
//!
//! The store holds `agents`, `agent_metrics`, `investigations` and
//! `pending_investigations`. All writes are single-row and unconditional.

mod memory;
mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// A monitored host as seen by the orchestrator (read-only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    /// User id of the account that registered the agent
    pub owner: String,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Liveness flag maintained by the connection registry
    #[serde(default)]
    pub websocket_connected: bool,
    #[serde(default)]
    pub websocket_connected_at: Option<String>,
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilesystemUsage {
    pub mount_path: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub usage_percent: f64,
}

/// A block device reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockDevice {
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub model: Option<String>,
}

/// One row of `agent_metrics`, embedded verbatim into investigation metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub agent_id: String,
    pub recorded_at: String,
    pub hostname: Option<String>,
    pub os_info: Option<String>,
    pub kernel_version: Option<String>,
    pub cpu_percent: Option<f64>,
    pub memory_used_mb: Option<f64>,
    pub memory_total_mb: Option<f64>,
    pub load_avg_1: Option<f64>,
    pub load_avg_5: Option<f64>,
    pub load_avg_15: Option<f64>,
    pub network_in_kbps: Option<f64>,
    pub network_out_kbps: Option<f64>,
    pub ip_address: Option<String>,
    pub filesystems: Vec<FilesystemUsage>,
    pub block_devices: Vec<BlockDevice>,
}

/// Investigation lifecycle status.
///
/// Transitions only move forward: `pending -> active -> {completed | failed}`,
/// with `completed_with_analysis` reachable from `active` after a diagnostic round trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    Active,
    Completed,
    CompletedWithAnalysis,
    Failed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::CompletedWithAnalysis => "completed_with_analysis",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithAnalysis | Self::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Completed | Self::CompletedWithAnalysis | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle forward-only.
    pub fn can_transition_to(&self, next: InvestigationStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvestigationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "completed_with_analysis" => Ok(Self::CompletedWithAnalysis),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown investigation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Audit transcript of one investigation's conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationTranscript {
    pub initial_response: Option<String>,
    pub agent_execution: Option<serde_json::Value>,
    pub final_analysis: Option<String>,
}

/// Structured `metadata` column of an investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvestigationMetadata {
    /// Agent metrics captured when the investigation started
    pub metrics_snapshot: MetricsSnapshot,
    /// Issue text exactly as submitted
    pub issue: String,
    /// Results reported by the agent after running the diagnostic payload
    pub agent_results: Option<serde_json::Value>,
    /// Second-turn analysis text
    pub continuation_analysis: Option<String>,
    /// Failure reason when the investigation ended as `failed`
    pub error: Option<String>,
    #[serde(rename = "full_conversation")]
    pub transcript: Option<ConversationTranscript>,
}

/// A persisted investigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investigation {
    pub id: i64,
    pub investigation_id: String,
    pub agent_id: String,
    pub issue: String,
    pub priority: Priority,
    pub status: InvestigationStatus,
    #[serde(default)]
    pub initiated_by: Option<String>,
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub tensorzero_response: Option<String>,
    #[serde(default)]
    pub metadata: InvestigationMetadata,
    pub initiated_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Insert payload for an investigation.
#[derive(Debug, Clone, Serialize)]
pub struct NewInvestigation {
    pub investigation_id: String,
    pub agent_id: String,
    pub issue: String,
    pub priority: Priority,
    pub status: InvestigationStatus,
    pub initiated_by: Option<String>,
    pub metadata: InvestigationMetadata,
    pub initiated_at: String,
}

/// The single terminal update written at the end of an investigation.
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationUpdate {
    pub status: InvestigationStatus,
    pub tensorzero_response: Option<String>,
    /// Never cleared once stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    pub metadata: InvestigationMetadata,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Completed,
    Failed,
}

impl PendingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Work handed to a remote agent, awaiting its results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInvestigation {
    pub id: i64,
    pub investigation_id: String,
    pub agent_id: String,
    pub diagnostic_payload: serde_json::Value,
    #[serde(default)]
    pub episode_id: Option<String>,
    pub status: PendingStatus,
    #[serde(default)]
    pub command_results: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPendingInvestigation {
    pub investigation_id: String,
    pub agent_id: String,
    pub diagnostic_payload: serde_json::Value,
    pub episode_id: Option<String>,
    pub status: PendingStatus,
}

/// Filter and window for listing investigations.
#[derive(Debug, Clone, Default)]
pub struct InvestigationQuery {
    /// Only investigations on these agents; an empty list matches nothing
    pub agent_ids: Vec<String>,
    pub status: Option<InvestigationStatus>,
    /// Only rows with a non-null `episode_id`
    pub with_episodes: bool,
    pub offset: usize,
    pub limit: usize,
}

/// One window of investigations plus the total matching count.
#[derive(Debug, Clone, Default)]
pub struct InvestigationPage {
    pub rows: Vec<Investigation>,
    pub total: usize,
}

/// Relational store trait - implemented by all storage backends.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>>;

    /// Ids of every agent owned by `owner`.
    async fn agent_ids_for_owner(&self, owner: &str) -> anyhow::Result<Vec<String>>;

    /// Most recent metrics row for an agent, by `recorded_at`.
    async fn latest_metrics(&self, agent_id: &str) -> anyhow::Result<Option<MetricsSnapshot>>;

    async fn insert_investigation(
        &self,
        investigation: &NewInvestigation,
    ) -> anyhow::Result<Investigation>;

    async fn update_investigation(
        &self,
        investigation_id: &str,
        update: &InvestigationUpdate,
    ) -> anyhow::Result<()>;

    async fn get_investigation(&self, investigation_id: &str)
        -> anyhow::Result<Option<Investigation>>;

    async fn find_investigation_by_episode(
        &self,
        episode_id: &str,
    ) -> anyhow::Result<Option<Investigation>>;

    /// List investigations ordered by `created_at` descending.
    async fn list_investigations(
        &self,
        query: &InvestigationQuery,
    ) -> anyhow::Result<InvestigationPage>;

    async fn insert_pending(
        &self,
        pending: &NewPendingInvestigation,
    ) -> anyhow::Result<PendingInvestigation>;

    /// Latest pending record for an investigation.
    async fn get_pending(&self, investigation_id: &str)
        -> anyhow::Result<Option<PendingInvestigation>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        use InvestigationStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(CompletedWithAnalysis));
        assert!(Active.can_transition_to(Failed));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(CompletedWithAnalysis));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            InvestigationStatus::Pending,
            InvestigationStatus::Active,
            InvestigationStatus::Completed,
            InvestigationStatus::CompletedWithAnalysis,
            InvestigationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InvestigationStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("done".parse::<InvestigationStatus>().is_err());
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!(Priority::default(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn metadata_tolerates_sparse_rows() {
        let metadata: InvestigationMetadata =
            serde_json::from_value(serde_json::json!({"issue": "slow"})).unwrap();
        assert_eq!(metadata.issue, "slow");
        assert!(metadata.transcript.is_none());
        assert!(metadata.metrics_snapshot.filesystems.is_empty());
    }

    #[test]
    fn transcript_serializes_as_full_conversation() {
        let metadata = InvestigationMetadata {
            transcript: Some(ConversationTranscript {
                initial_response: Some("hi".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["full_conversation"]["initial_response"], "hi");
    }
}
