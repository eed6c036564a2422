//! Shared fixtures for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::identity::{AuthUser, IdentityProvider};
use crate::llm::{ChatMessage, ChatResponse, ReasoningClient, ReasoningError};
use crate::store::{Agent, InMemoryStore, MetricsSnapshot};

/// One recorded call to [`ScriptedReasoning`].
#[derive(Debug, Clone)]
pub struct RecordedTurn {
    pub messages: Vec<ChatMessage>,
    pub episode_id: Option<String>,
}

/// Reasoning client that replays queued answers and records every call.
#[derive(Default)]
pub struct ScriptedReasoning {
    answers: Mutex<VecDeque<Result<ChatResponse, ReasoningError>>>,
    turns: Mutex<Vec<RecordedTurn>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, content: &str, episode_id: &str) -> Self {
        self.answers.lock().unwrap().push_back(Ok(ChatResponse {
            content: content.to_string(),
            episode_id: Some(episode_id.to_string()),
            inference_id: None,
            finish_reason: Some("stop".to_string()),
            usage: None,
        }));
        self
    }

    pub fn fail(self, err: ReasoningError) -> Self {
        self.answers.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn turns(&self) -> Vec<RecordedTurn> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        episode_id: Option<&str>,
    ) -> Result<ChatResponse, ReasoningError> {
        self.turns.lock().unwrap().push(RecordedTurn {
            messages: messages.to_vec(),
            episode_id: episode_id.map(str::to_string),
        });
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ReasoningError::empty_response("no scripted answer left".to_string())))
    }
}

/// Identity provider backed by a fixed token table.
#[derive(Default)]
pub struct StaticIdentity {
    users: HashMap<String, AuthUser>,
}

impl StaticIdentity {
    pub fn with_user(mut self, token: &str, user_id: &str) -> Self {
        self.users.insert(
            token.to_string(),
            AuthUser {
                id: user_id.to_string(),
                email: None,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self, token: &str) -> anyhow::Result<Option<AuthUser>> {
        Ok(self.users.get(token).cloned())
    }
}

pub fn user(id: &str) -> AuthUser {
    AuthUser {
        id: id.to_string(),
        email: None,
    }
}

/// Seed a connected agent with one metrics row.
pub async fn seed_agent(store: &InMemoryStore, agent_id: &str, owner: &str, connected: bool) {
    store
        .insert_agent(Agent {
            id: agent_id.to_string(),
            owner: owner.to_string(),
            hostname: Some(format!("{}.internal", agent_id)),
            websocket_connected: connected,
            websocket_connected_at: None,
        })
        .await;
    store
        .insert_metrics(MetricsSnapshot {
            agent_id: agent_id.to_string(),
            recorded_at: "2026-01-01T00:00:00Z".to_string(),
            hostname: Some(format!("{}.internal", agent_id)),
            cpu_percent: Some(93.0),
            memory_used_mb: Some(3500.0),
            memory_total_mb: Some(4096.0),
            ..Default::default()
        })
        .await;
}
