//! The create-investigation saga.

use serde::Serialize;
use std::sync::Arc;

use super::answer::{classify_answer, AiAnswer, DiagnosticPayload};
use super::poller::{wait_for_pending, WaitMode};
use super::reads::authorize_investigation;
use super::system_info::initial_prompt;
use super::{generate_investigation_id, FailureInfo, InvestigationError};
use crate::config::PollConfig;
use crate::identity::AuthUser;
use crate::llm::{ChatMessage, ChatResponse, ReasoningClient};
use crate::store::{
    now_string, ConversationTranscript, InvestigationMetadata, InvestigationStatus,
    InvestigationUpdate, NewInvestigation, NewPendingInvestigation, PendingInvestigation,
    PendingStatus, Priority, RelationalStore,
};

/// Validated input for a new investigation.
#[derive(Debug, Clone)]
pub struct CreateInvestigation {
    pub agent_id: String,
    pub issue: String,
    pub priority: Priority,
    pub initiated_by: Option<String>,
}

/// Result envelope returned by the create endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationOutcome {
    pub investigation_id: String,
    pub status: InvestigationStatus,
    /// Raw first-turn answer
    pub tensorzero_response: Option<String>,
    pub diagnostic_payload: Option<serde_json::Value>,
    pub agent_results: Option<serde_json::Value>,
    pub continuation_analysis: Option<String>,
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

/// Everything the dispatch sub-flow produced, including partial results.
#[derive(Default)]
struct DispatchResult {
    agent_results: Option<serde_json::Value>,
    analysis: Option<String>,
    failure: Option<InvestigationError>,
}

/// Drives investigations from creation to a terminal status.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RelationalStore>,
    reasoning: Arc<dyn ReasoningClient>,
    poll: PollConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        reasoning: Arc<dyn ReasoningClient>,
        poll: PollConfig,
    ) -> Self {
        Self {
            store,
            reasoning,
            poll,
        }
    }

    /// Create an investigation on an agent owned by `user` and drive it to a
    /// terminal status.
    ///
    /// Only failures before the investigation row exists (or a failed final
    /// write) are returned as `Err`. Every other failure yields `Ok` with
    /// `status = failed` and the failure in `error`.
    pub async fn create_investigation(
        &self,
        user: &AuthUser,
        request: CreateInvestigation,
    ) -> Result<InvestigationOutcome, InvestigationError> {
        let agent_id = request.agent_id.trim().to_string();
        if agent_id.is_empty() || request.issue.trim().is_empty() {
            return Err(InvestigationError::BadRequest(
                "agent_id and issue are required".to_string(),
            ));
        }

        let agent = self
            .store
            .get_agent(&agent_id)
            .await?
            .ok_or_else(|| InvestigationError::NotFound("Agent not found".to_string()))?;
        if agent.owner != user.id {
            return Err(InvestigationError::Forbidden("Access denied".to_string()));
        }
        if !agent.websocket_connected {
            return Err(InvestigationError::AgentUnavailable { agent_id });
        }

        let metrics = self
            .store
            .latest_metrics(&agent_id)
            .await?
            .ok_or_else(|| InvestigationError::NoMetrics {
                agent_id: agent_id.clone(),
            })?;

        let investigation_id = generate_investigation_id();
        let prompt = initial_prompt(&metrics, &request.issue);
        let mut metadata = InvestigationMetadata {
            metrics_snapshot: metrics,
            issue: request.issue.clone(),
            ..Default::default()
        };

        self.store
            .insert_investigation(&NewInvestigation {
                investigation_id: investigation_id.clone(),
                agent_id: agent_id.clone(),
                issue: request.issue.clone(),
                priority: request.priority,
                status: InvestigationStatus::Active,
                initiated_by: request.initiated_by.clone(),
                metadata: metadata.clone(),
                initiated_at: now_string(),
            })
            .await?;
        tracing::info!(
            investigation_id = %investigation_id,
            agent_id = %agent_id,
            "Investigation created"
        );

        let conversation = vec![ChatMessage::user(prompt)];
        let first = match self.reasoning.chat(&conversation, None).await {
            Ok(response) => response,
            Err(e) => {
                let err = InvestigationError::from(e);
                tracing::error!(
                    investigation_id = %investigation_id,
                    "First AI turn failed: {}",
                    err
                );
                metadata.error = Some(err.to_string());
                metadata.transcript = Some(ConversationTranscript::default());
                self.finalize(&investigation_id, InvestigationStatus::Failed, None, None, metadata)
                    .await?;
                return Ok(InvestigationOutcome {
                    investigation_id,
                    status: InvestigationStatus::Failed,
                    tensorzero_response: None,
                    diagnostic_payload: None,
                    agent_results: None,
                    continuation_analysis: None,
                    episode_id: None,
                    error: Some(err.failure_info()),
                });
            }
        };

        let mut outcome = InvestigationOutcome {
            investigation_id: investigation_id.clone(),
            status: InvestigationStatus::Completed,
            tensorzero_response: Some(first.content.clone()),
            diagnostic_payload: None,
            agent_results: None,
            continuation_analysis: None,
            episode_id: first.episode_id.clone(),
            error: None,
        };

        let failure = match classify_answer(&first.content) {
            Ok(AiAnswer::Unparseable) | Ok(AiAnswer::PlainAnswer(_)) => {
                tracing::info!(investigation_id = %investigation_id, "AI answered directly");
                None
            }
            Ok(AiAnswer::Diagnostic(payload)) => {
                tracing::info!(
                    investigation_id = %investigation_id,
                    commands = payload.commands.len(),
                    programs = payload.programs.len(),
                    "AI requested diagnostics"
                );
                outcome.diagnostic_payload = Some(payload.raw.clone());
                let dispatch = self
                    .dispatch(&investigation_id, &agent_id, &conversation, &first, payload)
                    .await;
                outcome.agent_results = dispatch.agent_results;
                outcome.continuation_analysis = dispatch.analysis;
                if dispatch.failure.is_none() {
                    outcome.status = InvestigationStatus::CompletedWithAnalysis;
                }
                dispatch.failure
            }
            Err(e) => {
                tracing::warn!(
                    investigation_id = %investigation_id,
                    "Could not parse diagnostic payload: {}",
                    e
                );
                Some(InvestigationError::Internal(e.to_string()))
            }
        };

        if let Some(err) = failure {
            tracing::warn!(
                investigation_id = %investigation_id,
                kind = err.kind(),
                "Investigation failed: {}",
                err
            );
            outcome.status = InvestigationStatus::Failed;
            metadata.error = Some(err.to_string());
            outcome.error = Some(err.failure_info());
        }

        metadata.agent_results = outcome.agent_results.clone();
        metadata.continuation_analysis = outcome.continuation_analysis.clone();
        metadata.transcript = Some(ConversationTranscript {
            initial_response: Some(first.content.clone()),
            agent_execution: outcome.agent_results.clone(),
            final_analysis: outcome.continuation_analysis.clone(),
        });

        self.finalize(
            &investigation_id,
            outcome.status,
            Some(first.content),
            first.episode_id,
            metadata,
        )
        .await?;
        tracing::info!(
            investigation_id = %investigation_id,
            status = %outcome.status,
            "Investigation finished"
        );

        Ok(outcome)
    }

    /// Hand the diagnostic payload to the agent, wait for results, and run
    /// the second AI turn.
    async fn dispatch(
        &self,
        investigation_id: &str,
        agent_id: &str,
        conversation: &[ChatMessage],
        first: &ChatResponse,
        payload: DiagnosticPayload,
    ) -> DispatchResult {
        let mut result = DispatchResult::default();

        if let Err(e) = self
            .store
            .insert_pending(&NewPendingInvestigation {
                investigation_id: investigation_id.to_string(),
                agent_id: agent_id.to_string(),
                diagnostic_payload: payload.raw,
                episode_id: first.episode_id.clone(),
                status: PendingStatus::Pending,
            })
            .await
        {
            result.failure = Some(e.into());
            return result;
        }
        tracing::info!(investigation_id = %investigation_id, "Dispatched diagnostics to agent");

        let pending = match wait_for_pending(
            self.store.as_ref(),
            investigation_id,
            self.poll.interval,
            self.poll.interactive_budget,
            WaitMode::Interactive,
        )
        .await
        {
            Ok(pending) => pending,
            Err(e) => {
                result.failure = Some(e);
                return result;
            }
        };

        let command_results = pending
            .command_results
            .unwrap_or(serde_json::Value::Null);
        result.agent_results = Some(command_results.clone());

        let mut continuation = conversation.to_vec();
        continuation.push(ChatMessage::assistant(first.content.clone()));
        continuation.push(ChatMessage::user(format!(
            "Command execution results: {}",
            command_results
        )));

        match self
            .reasoning
            .chat(&continuation, first.episode_id.as_deref())
            .await
        {
            Ok(second) => result.analysis = Some(second.content),
            Err(e) => result.failure = Some(e.into()),
        }
        result
    }

    async fn finalize(
        &self,
        investigation_id: &str,
        status: InvestigationStatus,
        tensorzero_response: Option<String>,
        episode_id: Option<String>,
        metadata: InvestigationMetadata,
    ) -> Result<(), InvestigationError> {
        self.store
            .update_investigation(
                investigation_id,
                &InvestigationUpdate {
                    status,
                    tensorzero_response,
                    episode_id,
                    metadata,
                    completed_at: Some(now_string()),
                },
            )
            .await?;
        Ok(())
    }

    /// Wait on an owned investigation's pending record with the background budget.
    pub async fn await_agent_results(
        &self,
        user: &AuthUser,
        investigation_id: &str,
    ) -> Result<PendingInvestigation, InvestigationError> {
        if !super::is_well_formed_investigation_id(investigation_id) {
            return Err(InvestigationError::BadRequest(format!(
                "Malformed investigation_id: {}",
                investigation_id
            )));
        }
        authorize_investigation(self.store.as_ref(), user, investigation_id).await?;

        wait_for_pending(
            self.store.as_ref(),
            investigation_id,
            self.poll.interval,
            self.poll.background_budget,
            WaitMode::Background,
        )
        .await
    }
}
