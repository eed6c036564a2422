//! Bearer token validation against the identity provider.
//!
//! Tokens are never decoded locally: each one is forwarded to the provider's
//! "get current user" endpoint and only a 200 response authenticates.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// The authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to a user. `Ok(None)` means the token was rejected.
    async fn current_user(&self, token: &str) -> anyhow::Result<Option<AuthUser>>;
}

/// Supabase GoTrue (`/auth/v1/user`) identity provider.
pub struct SupabaseIdentity {
    client: Client,
    url: String,
    anon_key: String,
}

impl SupabaseIdentity {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn current_user(&self, token: &str) -> anyhow::Result<Option<AuthUser>> {
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.url))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;

        if resp.status() != reqwest::StatusCode::OK {
            tracing::debug!("Identity provider rejected token: {}", resp.status());
            return Ok(None);
        }

        Ok(Some(resp.json().await?))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
