//! Read endpoints: list, details and inference drill-down.
//!
//! Visibility always flows through agent ownership: a caller sees an
//! investigation only if they own the agent it ran on.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::InvestigationError;
use crate::analytics::{AnalyticsStore, InferenceDetail, InferenceSummary};
use crate::identity::AuthUser;
use crate::store::{Agent, Investigation, InvestigationQuery, InvestigationStatus, RelationalStore};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Normalized list parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub page: usize,
    pub limit: usize,
    pub status: Option<InvestigationStatus>,
    pub agent_id: Option<String>,
    pub with_episodes: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            status: None,
            agent_id: None,
            with_episodes: false,
        }
    }
}

impl ListParams {
    /// Page defaults to 1 (minimum 1); limit defaults to 20 and is clamped to 1..=100.
    pub fn paged(page: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            ..Self::default()
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            (total + limit - 1) / limit
        };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationListItem {
    #[serde(flatten)]
    pub investigation: Investigation,
    /// Inferences recorded for the row's episode; absent without an episode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationList {
    pub investigations: Vec<InvestigationListItem>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationDetails {
    #[serde(flatten)]
    pub investigation: Investigation,
    pub agent: Agent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferences: Option<Vec<InferenceSummary>>,
}

/// Load an investigation and its agent, checking that `user` owns the agent.
pub(crate) async fn authorize_investigation(
    store: &dyn RelationalStore,
    user: &AuthUser,
    investigation_id: &str,
) -> Result<(Investigation, Agent), InvestigationError> {
    let investigation = store
        .get_investigation(investigation_id)
        .await?
        .ok_or_else(|| InvestigationError::NotFound("Investigation not found".to_string()))?;
    let agent = owned_agent(store, user, &investigation.agent_id).await?;
    Ok((investigation, agent))
}

async fn owned_agent(
    store: &dyn RelationalStore,
    user: &AuthUser,
    agent_id: &str,
) -> Result<Agent, InvestigationError> {
    match store.get_agent(agent_id).await? {
        Some(agent) if agent.owner == user.id => Ok(agent),
        _ => Err(InvestigationError::Forbidden("Access denied".to_string())),
    }
}

#[derive(Clone)]
pub struct InvestigationQueries {
    store: Arc<dyn RelationalStore>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl InvestigationQueries {
    pub fn new(store: Arc<dyn RelationalStore>, analytics: Arc<dyn AnalyticsStore>) -> Self {
        Self { store, analytics }
    }

    pub async fn list(
        &self,
        user: &AuthUser,
        params: &ListParams,
    ) -> Result<InvestigationList, InvestigationError> {
        let owned = self.store.agent_ids_for_owner(&user.id).await?;
        let agent_ids: Vec<String> = match &params.agent_id {
            Some(agent_id) => owned.into_iter().filter(|id| id == agent_id).collect(),
            None => owned,
        };

        let page = self
            .store
            .list_investigations(&InvestigationQuery {
                agent_ids,
                status: params.status,
                with_episodes: params.with_episodes,
                offset: params.offset(),
                limit: params.limit,
            })
            .await?;

        let counts = join_all(page.rows.iter().map(|row| self.inference_count(row))).await;
        let investigations = page
            .rows
            .into_iter()
            .zip(counts)
            .map(|(investigation, inference_count)| InvestigationListItem {
                investigation,
                inference_count,
            })
            .collect();

        Ok(InvestigationList {
            investigations,
            pagination: Pagination::new(params.page, params.limit, page.total),
        })
    }

    async fn inference_count(&self, investigation: &Investigation) -> Option<u64> {
        let episode_id = investigation.episode_id.as_deref()?;
        match self.analytics.inference_count(episode_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(
                    investigation_id = %investigation.investigation_id,
                    "Failed to count inferences for episode {}: {:#}",
                    episode_id,
                    e
                );
                None
            }
        }
    }

    pub async fn details(
        &self,
        user: &AuthUser,
        investigation_id: &str,
    ) -> Result<InvestigationDetails, InvestigationError> {
        let (investigation, agent) =
            authorize_investigation(self.store.as_ref(), user, investigation_id).await?;

        let inferences = match investigation.episode_id.as_deref() {
            Some(episode_id) => Some(self.analytics.list_inferences(episode_id).await?),
            None => None,
        };

        Ok(InvestigationDetails {
            investigation,
            agent,
            inferences,
        })
    }

    /// One inference with model metadata and feedback, visible only to the
    /// owner of the agent whose investigation produced it.
    pub async fn inference(
        &self,
        user: &AuthUser,
        inference_id: &str,
    ) -> Result<InferenceDetail, InvestigationError> {
        if Uuid::parse_str(inference_id).is_err() {
            return Err(InvestigationError::BadRequest(format!(
                "Invalid inference_id: {}",
                inference_id
            )));
        }

        let detail = self
            .analytics
            .get_inference(inference_id)
            .await?
            .ok_or_else(|| InvestigationError::NotFound("Inference not found".to_string()))?;

        let investigation = self
            .store
            .find_investigation_by_episode(&detail.episode_id)
            .await?
            .ok_or_else(|| InvestigationError::Forbidden("Access denied".to_string()))?;
        owned_agent(self.store.as_ref(), user, &investigation.agent_id).await?;

        Ok(detail)
    }
}
