//! In-memory relational store (non-persistent).
//!
//! Besides the `RelationalStore` operations it exposes seeding helpers and the
//! remote-agent side of the pending handoff (`complete_pending`/`fail_pending`).

use super::{
    now_string, Agent, Investigation, InvestigationPage, InvestigationQuery, InvestigationUpdate,
    MetricsSnapshot, NewInvestigation, NewPendingInvestigation, PendingInvestigation,
    PendingStatus, RelationalStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    agents: HashMap<String, Agent>,
    metrics: Vec<MetricsSnapshot>,
    investigations: Vec<Investigation>,
    pending: Vec<PendingInvestigation>,
}

#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.tables
            .write()
            .await
            .agents
            .insert(agent.id.clone(), agent);
    }

    pub async fn set_agent_connected(&self, agent_id: &str, connected: bool) {
        if let Some(agent) = self.tables.write().await.agents.get_mut(agent_id) {
            agent.websocket_connected = connected;
        }
    }

    pub async fn insert_metrics(&self, snapshot: MetricsSnapshot) {
        self.tables.write().await.metrics.push(snapshot);
    }

    /// Number of pending records ever created for an investigation.
    pub async fn pending_count(&self, investigation_id: &str) -> usize {
        self.tables
            .read()
            .await
            .pending
            .iter()
            .filter(|p| p.investigation_id == investigation_id)
            .count()
    }

    /// Most recent unresolved pending record dispatched to an agent.
    pub async fn next_pending_for_agent(&self, agent_id: &str) -> Option<PendingInvestigation> {
        self.tables
            .read()
            .await
            .pending
            .iter()
            .rev()
            .find(|p| p.agent_id == agent_id && p.status == PendingStatus::Pending)
            .cloned()
    }

    /// Record successful agent-side execution.
    pub async fn complete_pending(
        &self,
        investigation_id: &str,
        command_results: serde_json::Value,
    ) -> Result<(), String> {
        self.resolve_pending(investigation_id, |p| {
            p.status = PendingStatus::Completed;
            p.command_results = Some(command_results);
        })
        .await
    }

    /// Record failed agent-side execution.
    pub async fn fail_pending(&self, investigation_id: &str, message: &str) -> Result<(), String> {
        self.resolve_pending(investigation_id, |p| {
            p.status = PendingStatus::Failed;
            p.error_message = Some(message.to_string());
        })
        .await
    }

    async fn resolve_pending(
        &self,
        investigation_id: &str,
        apply: impl FnOnce(&mut PendingInvestigation),
    ) -> Result<(), String> {
        let mut tables = self.tables.write().await;
        let pending = tables
            .pending
            .iter_mut()
            .rev()
            .find(|p| p.investigation_id == investigation_id)
            .ok_or_else(|| format!("No pending investigation for {}", investigation_id))?;
        apply(pending);
        pending.completed_at = Some(now_string());
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for InMemoryStore {
    async fn get_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>> {
        Ok(self.tables.read().await.agents.get(agent_id).cloned())
    }

    async fn agent_ids_for_owner(&self, owner: &str) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .tables
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.owner == owner)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn latest_metrics(&self, agent_id: &str) -> anyhow::Result<Option<MetricsSnapshot>> {
        Ok(self
            .tables
            .read()
            .await
            .metrics
            .iter()
            .filter(|m| m.agent_id == agent_id)
            .max_by(|a, b| a.recorded_at.cmp(&b.recorded_at))
            .cloned())
    }

    async fn insert_investigation(
        &self,
        investigation: &NewInvestigation,
    ) -> anyhow::Result<Investigation> {
        let mut tables = self.tables.write().await;
        if tables
            .investigations
            .iter()
            .any(|i| i.investigation_id == investigation.investigation_id)
        {
            anyhow::bail!(
                "duplicate investigation_id {}",
                investigation.investigation_id
            );
        }
        let now = now_string();
        let row = Investigation {
            id: self.allocate_id(),
            investigation_id: investigation.investigation_id.clone(),
            agent_id: investigation.agent_id.clone(),
            issue: investigation.issue.clone(),
            priority: investigation.priority,
            status: investigation.status,
            initiated_by: investigation.initiated_by.clone(),
            episode_id: None,
            tensorzero_response: None,
            metadata: investigation.metadata.clone(),
            initiated_at: investigation.initiated_at.clone(),
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        tables.investigations.push(row.clone());
        Ok(row)
    }

    async fn update_investigation(
        &self,
        investigation_id: &str,
        update: &InvestigationUpdate,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .investigations
            .iter_mut()
            .find(|i| i.investigation_id == investigation_id)
            .ok_or_else(|| anyhow::anyhow!("Investigation {} not found", investigation_id))?;

        if row.status != update.status && !row.status.can_transition_to(update.status) {
            anyhow::bail!(
                "Investigation {} cannot move from {} to {}",
                investigation_id,
                row.status,
                update.status
            );
        }

        row.status = update.status;
        row.tensorzero_response = update.tensorzero_response.clone();
        if row.episode_id.is_none() {
            row.episode_id = update.episode_id.clone();
        }
        row.metadata = update.metadata.clone();
        row.completed_at = update.completed_at.clone();
        row.updated_at = now_string();
        Ok(())
    }

    async fn get_investigation(
        &self,
        investigation_id: &str,
    ) -> anyhow::Result<Option<Investigation>> {
        Ok(self
            .tables
            .read()
            .await
            .investigations
            .iter()
            .find(|i| i.investigation_id == investigation_id)
            .cloned())
    }

    async fn find_investigation_by_episode(
        &self,
        episode_id: &str,
    ) -> anyhow::Result<Option<Investigation>> {
        Ok(self
            .tables
            .read()
            .await
            .investigations
            .iter()
            .find(|i| i.episode_id.as_deref() == Some(episode_id))
            .cloned())
    }

    async fn list_investigations(
        &self,
        query: &InvestigationQuery,
    ) -> anyhow::Result<InvestigationPage> {
        let tables = self.tables.read().await;
        let mut matching: Vec<&Investigation> = tables
            .investigations
            .iter()
            .filter(|i| query.agent_ids.contains(&i.agent_id))
            .filter(|i| query.status.map_or(true, |s| i.status == s))
            .filter(|i| !query.with_episodes || i.episode_id.is_some())
            .collect();
        // Ties on created_at fall back to insertion order, newest first.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(InvestigationPage {
            total: matching.len(),
            rows: matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect(),
        })
    }

    async fn insert_pending(
        &self,
        pending: &NewPendingInvestigation,
    ) -> anyhow::Result<PendingInvestigation> {
        let row = PendingInvestigation {
            id: self.allocate_id(),
            investigation_id: pending.investigation_id.clone(),
            agent_id: pending.agent_id.clone(),
            diagnostic_payload: pending.diagnostic_payload.clone(),
            episode_id: pending.episode_id.clone(),
            status: pending.status,
            command_results: None,
            error_message: None,
            created_at: now_string(),
            completed_at: None,
        };
        self.tables.write().await.pending.push(row.clone());
        Ok(row)
    }

    async fn get_pending(
        &self,
        investigation_id: &str,
    ) -> anyhow::Result<Option<PendingInvestigation>> {
        Ok(self
            .tables
            .read()
            .await
            .pending
            .iter()
            .rev()
            .find(|p| p.investigation_id == investigation_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InvestigationMetadata, InvestigationStatus, Priority};

    fn new_investigation(id: &str, agent_id: &str) -> NewInvestigation {
        NewInvestigation {
            investigation_id: id.to_string(),
            agent_id: agent_id.to_string(),
            issue: "high load".to_string(),
            priority: Priority::High,
            status: InvestigationStatus::Active,
            initiated_by: Some("user-1".to_string()),
            metadata: InvestigationMetadata::default(),
            initiated_at: now_string(),
        }
    }

    fn terminal_update(status: InvestigationStatus, episode: &str) -> InvestigationUpdate {
        InvestigationUpdate {
            status,
            tensorzero_response: Some("answer".to_string()),
            episode_id: Some(episode.to_string()),
            metadata: InvestigationMetadata::default(),
            completed_at: Some(now_string()),
        }
    }

    #[tokio::test]
    async fn latest_metrics_picks_most_recent_row() {
        let store = InMemoryStore::new();
        for (ts, cpu) in [("2026-01-01T00:00:00Z", 10.0), ("2026-01-02T00:00:00Z", 55.0)] {
            store
                .insert_metrics(MetricsSnapshot {
                    agent_id: "a1".to_string(),
                    recorded_at: ts.to_string(),
                    cpu_percent: Some(cpu),
                    ..Default::default()
                })
                .await;
        }

        let latest = store.latest_metrics("a1").await.unwrap().unwrap();
        assert_eq!(latest.cpu_percent, Some(55.0));
        assert!(store.latest_metrics("a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_investigation_ids_are_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_investigation(&new_investigation("INV-1", "a1"))
            .await
            .unwrap();
        assert!(store
            .insert_investigation(&new_investigation("INV-1", "a1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn terminal_rows_cannot_move_backwards() {
        let store = InMemoryStore::new();
        store
            .insert_investigation(&new_investigation("INV-1", "a1"))
            .await
            .unwrap();
        store
            .update_investigation("INV-1", &terminal_update(InvestigationStatus::Completed, "ep-1"))
            .await
            .unwrap();

        let err = store
            .update_investigation("INV-1", &terminal_update(InvestigationStatus::Failed, "ep-2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot move"));

        let row = store.get_investigation("INV-1").await.unwrap().unwrap();
        assert_eq!(row.status, InvestigationStatus::Completed);
        assert_eq!(row.episode_id.as_deref(), Some("ep-1"));
    }

    #[tokio::test]
    async fn list_filters_by_owned_agents_and_episodes() {
        let store = InMemoryStore::new();
        store
            .insert_investigation(&new_investigation("INV-1", "a1"))
            .await
            .unwrap();
        store
            .insert_investigation(&new_investigation("INV-2", "a1"))
            .await
            .unwrap();
        store
            .insert_investigation(&new_investigation("INV-3", "a2"))
            .await
            .unwrap();
        store
            .update_investigation("INV-2", &terminal_update(InvestigationStatus::Completed, "ep"))
            .await
            .unwrap();

        let page = store
            .list_investigations(&InvestigationQuery {
                agent_ids: vec!["a1".to_string()],
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.rows[0].investigation_id, "INV-2");

        let with_episodes = store
            .list_investigations(&InvestigationQuery {
                agent_ids: vec!["a1".to_string(), "a2".to_string()],
                with_episodes: true,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(with_episodes.total, 1);

        let nothing = store
            .list_investigations(&InvestigationQuery {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(nothing.total, 0);
    }

    #[tokio::test]
    async fn pending_resolution_updates_latest_record() {
        let store = InMemoryStore::new();
        store
            .insert_pending(&NewPendingInvestigation {
                investigation_id: "INV-1".to_string(),
                agent_id: "a1".to_string(),
                diagnostic_payload: serde_json::json!({"commands": []}),
                episode_id: Some("ep".to_string()),
                status: PendingStatus::Pending,
            })
            .await
            .unwrap();

        store
            .complete_pending("INV-1", serde_json::json!([{"exit_code": 0}]))
            .await
            .unwrap();
        let pending = store.get_pending("INV-1").await.unwrap().unwrap();
        assert_eq!(pending.status, PendingStatus::Completed);
        assert!(pending.completed_at.is_some());
        assert!(store.fail_pending("INV-404", "boom").await.is_err());
    }
}
