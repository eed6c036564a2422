//! Supabase (PostgREST) implementation of the relational store.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::{
    Agent, Investigation, InvestigationPage, InvestigationQuery, InvestigationUpdate,
    MetricsSnapshot, NewInvestigation, NewPendingInvestigation, PendingInvestigation,
    RelationalStore,
};

/// Supabase client for table operations.
pub struct SupabaseStore {
    client: Client,
    url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    /// Get the PostgREST URL.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    fn get(&self, table_and_query: &str) -> RequestBuilder {
        self.authorized(
            self.client
                .get(format!("{}/{}", self.rest_url(), table_and_query)),
        )
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        table_and_query: &str,
        what: &str,
    ) -> anyhow::Result<Vec<T>> {
        let resp = self.get(table_and_query).send().await?;
        Self::read_rows(resp, what).await
    }

    async fn read_rows<T: DeserializeOwned>(resp: Response, what: &str) -> anyhow::Result<Vec<T>> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to {}: {} - {}", what, status, text);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Insert one row and return its stored representation.
    async fn insert_row<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let resp = self
            .authorized(self.client.post(format!("{}/{}", self.rest_url(), table)))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        let rows: Vec<T> = Self::read_rows(resp, &format!("insert into {}", table)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No row returned from insert into {}", table))
    }
}

/// Encode a value for a PostgREST `eq.` filter.
fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

/// Build a PostgREST `in.(...)` filter with quoted members.
fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", urlencoding::encode(&quoted.join(",")))
}

/// Parse the total from a `Content-Range` header such as `0-19/57` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<usize> {
    value.rsplit('/').next().and_then(|t| t.parse().ok())
}

#[async_trait]
impl RelationalStore for SupabaseStore {
    async fn get_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>> {
        let rows: Vec<Agent> = self
            .fetch_rows(
                &format!(
                    "agents?id={}&select=id,owner,hostname,websocket_connected,websocket_connected_at",
                    eq(agent_id)
                ),
                "get agent",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn agent_ids_for_owner(&self, owner: &str) -> anyhow::Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct IdOnly {
            id: String,
        }

        let rows: Vec<IdOnly> = self
            .fetch_rows(
                &format!("agents?owner={}&select=id", eq(owner)),
                "list owned agents",
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    async fn latest_metrics(&self, agent_id: &str) -> anyhow::Result<Option<MetricsSnapshot>> {
        let rows: Vec<MetricsSnapshot> = self
            .fetch_rows(
                &format!(
                    "agent_metrics?agent_id={}&order=recorded_at.desc&limit=1",
                    eq(agent_id)
                ),
                "get latest metrics",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_investigation(
        &self,
        investigation: &NewInvestigation,
    ) -> anyhow::Result<Investigation> {
        self.insert_row("investigations", investigation).await
    }

    async fn update_investigation(
        &self,
        investigation_id: &str,
        update: &InvestigationUpdate,
    ) -> anyhow::Result<()> {
        let resp = self
            .authorized(self.client.patch(format!(
                "{}/investigations?investigation_id={}",
                self.rest_url(),
                eq(investigation_id)
            )))
            .header("Content-Type", "application/json")
            .json(update)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            anyhow::bail!("Failed to update investigation: {} - {}", status, text);
        }

        Ok(())
    }

    async fn get_investigation(
        &self,
        investigation_id: &str,
    ) -> anyhow::Result<Option<Investigation>> {
        let rows: Vec<Investigation> = self
            .fetch_rows(
                &format!("investigations?investigation_id={}", eq(investigation_id)),
                "get investigation",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_investigation_by_episode(
        &self,
        episode_id: &str,
    ) -> anyhow::Result<Option<Investigation>> {
        let rows: Vec<Investigation> = self
            .fetch_rows(
                &format!("investigations?episode_id={}&limit=1", eq(episode_id)),
                "find investigation by episode",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_investigations(
        &self,
        query: &InvestigationQuery,
    ) -> anyhow::Result<InvestigationPage> {
        if query.agent_ids.is_empty() {
            return Ok(InvestigationPage::default());
        }

        let mut filters = vec![format!("agent_id={}", in_list(&query.agent_ids))];
        if let Some(status) = query.status {
            filters.push(format!("status={}", eq(status.as_str())));
        }
        if query.with_episodes {
            filters.push("episode_id=not.is.null".to_string());
        }

        let resp = self
            .get(&format!(
                "investigations?{}&order=created_at.desc&limit={}&offset={}",
                filters.join("&"),
                query.limit,
                query.offset
            ))
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let total_header = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        // An offset past the exact count is answered with 416 (PGRST103).
        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(InvestigationPage {
                rows: Vec::new(),
                total: total_header.unwrap_or(query.offset),
            });
        }

        let rows: Vec<Investigation> = Self::read_rows(resp, "list investigations").await?;
        // Without an exact count, fall back to what the window proves exists.
        let total = total_header.unwrap_or(query.offset + rows.len());

        Ok(InvestigationPage { rows, total })
    }

    async fn insert_pending(
        &self,
        pending: &NewPendingInvestigation,
    ) -> anyhow::Result<PendingInvestigation> {
        self.insert_row("pending_investigations", pending).await
    }

    async fn get_pending(
        &self,
        investigation_id: &str,
    ) -> anyhow::Result<Option<PendingInvestigation>> {
        let rows: Vec<PendingInvestigation> = self
            .fetch_rows(
                &format!(
                    "pending_investigations?investigation_id={}&order=created_at.desc&limit=1",
                    eq(investigation_id)
                ),
                "get pending investigation",
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
