//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::identity::AuthUser;
use crate::investigation::{CreateInvestigation, InvestigationError, ListParams};
use crate::store::{InvestigationStatus, Priority};

/// Body of `POST /`. Fields are optional so a missing one yields our own 400.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInvestigationRequest {
    pub agent_id: Option<String>,
    pub issue: Option<String>,
    pub priority: Option<String>,
    pub initiated_by: Option<String>,
}

impl CreateInvestigationRequest {
    /// Validate the body; `initiated_by` falls back to the caller.
    pub fn into_command(self, user: &AuthUser) -> Result<CreateInvestigation, InvestigationError> {
        let agent_id = self.agent_id.filter(|v| !v.trim().is_empty());
        let issue = self.issue.filter(|v| !v.trim().is_empty());
        let (Some(agent_id), Some(issue)) = (agent_id, issue) else {
            return Err(InvestigationError::BadRequest(
                "agent_id and issue are required".to_string(),
            ));
        };

        let priority = match self.priority.as_deref() {
            None | Some("") => Priority::default(),
            Some(raw) => raw.parse().map_err(InvestigationError::BadRequest)?,
        };

        Ok(CreateInvestigation {
            agent_id,
            issue,
            priority,
            initiated_by: self.initiated_by.or_else(|| Some(user.id.clone())),
        })
    }
}

/// Query string of `GET /`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootQuery {
    pub investigation_id: Option<String>,
    pub inference_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub with_episodes: Option<String>,
}

impl RootQuery {
    /// Non-numeric `page`/`limit` fall back to their defaults; an unknown `status` is rejected.
    pub fn list_params(&self) -> Result<ListParams, InvestigationError> {
        let number = |raw: &Option<String>| -> Option<usize> {
            raw.as_deref().and_then(|v| v.trim().parse().ok())
        };
        let mut params = ListParams::paged(number(&self.page), number(&self.limit));

        params.status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.parse::<InvestigationStatus>()
                    .map_err(InvestigationError::BadRequest)?,
            ),
            None => None,
        };
        params.agent_id = self.agent_id.clone().filter(|a| !a.is_empty());
        params.with_episodes = matches!(
            self.with_episodes.as_deref().map(str::to_lowercase).as_deref(),
            Some("true") | Some("1")
        );
        Ok(params)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
