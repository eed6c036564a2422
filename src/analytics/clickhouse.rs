//! ClickHouse HTTP interface client for the analytics store.
//!
//! Queries use server-side parameters (`{name:Type}` placeholders bound via
//! `param_<name>` URL arguments) and `JSONEachRow` output.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{
    feedback_value, json_or_string, AnalyticsStore, FeedbackKind, FeedbackRecord,
    InferenceDetail, InferenceSummary,
};
use crate::config::ClickHouseConfig;

const COUNT_SQL: &str = "\
SELECT count() AS count FROM (
    SELECT id FROM ChatInference WHERE episode_id = {episode_id:UUID}
    UNION ALL
    SELECT id FROM JsonInference WHERE episode_id = {episode_id:UUID}
)";

const LIST_SQL: &str = "\
SELECT * FROM (
    SELECT toString(id) AS id, function_name, variant_name, toString(episode_id) AS episode_id,
           toString(UUIDv7ToDateTime(id)) AS timestamp, processing_time_ms
    FROM ChatInference WHERE episode_id = {episode_id:UUID}
    UNION ALL
    SELECT toString(id) AS id, function_name, variant_name, toString(episode_id) AS episode_id,
           toString(UUIDv7ToDateTime(id)) AS timestamp, processing_time_ms
    FROM JsonInference WHERE episode_id = {episode_id:UUID}
)
ORDER BY id ASC";

const DETAIL_SQL: &str = "\
SELECT toString(i.id) AS id, i.function_name AS function_name, i.variant_name AS variant_name,
       toString(i.episode_id) AS episode_id, toString(UUIDv7ToDateTime(i.id)) AS timestamp,
       i.input AS input, i.output AS output, i.processing_time_ms AS processing_time_ms,
       mi.model_name AS model_name, mi.model_provider_name AS model_provider_name,
       mi.input_tokens AS input_tokens, mi.output_tokens AS output_tokens,
       mi.response_time_ms AS response_time_ms,
       mi.raw_request AS raw_request, mi.raw_response AS raw_response
FROM (
    SELECT id, function_name, variant_name, episode_id, input, output, processing_time_ms
    FROM ChatInference WHERE id = {inference_id:UUID}
    UNION ALL
    SELECT id, function_name, variant_name, episode_id, input, output, processing_time_ms
    FROM JsonInference WHERE id = {inference_id:UUID}
) AS i
LEFT JOIN ModelInference AS mi ON mi.inference_id = i.id
LIMIT 1";

const FEEDBACK_SQL: &str = "\
SELECT * FROM (
    SELECT 'boolean' AS feedback_type, toString(id) AS id, metric_name, toString(value) AS value,
           toString(UUIDv7ToDateTime(id)) AS timestamp
    FROM BooleanMetricFeedback WHERE target_id = {inference_id:UUID}
    UNION ALL
    SELECT 'float' AS feedback_type, toString(id) AS id, metric_name, toString(value) AS value,
           toString(UUIDv7ToDateTime(id)) AS timestamp
    FROM FloatMetricFeedback WHERE target_id = {inference_id:UUID}
    UNION ALL
    SELECT 'comment' AS feedback_type, toString(id) AS id, '' AS metric_name, value,
           toString(UUIDv7ToDateTime(id)) AS timestamp
    FROM CommentFeedback WHERE target_id = {inference_id:UUID}
    UNION ALL
    SELECT 'demonstration' AS feedback_type, toString(id) AS id, '' AS metric_name, value,
           toString(UUIDv7ToDateTime(id)) AS timestamp
    FROM DemonstrationFeedback WHERE inference_id = {inference_id:UUID}
)
ORDER BY timestamp ASC, id ASC";

/// Analytics store backed by ClickHouse over HTTP.
pub struct ClickHouseAnalytics {
    client: Client,
    url: Url,
    user: String,
    password: String,
    database: String,
}

impl ClickHouseAnalytics {
    pub fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::new(),
            url: Url::parse(&config.url)?,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
        })
    }

    fn query_url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("database", &self.database)
                .append_pair("default_format", "JSONEachRow")
                .append_pair("output_format_json_quote_64bit_integers", "0")
                .append_pair("join_use_nulls", "1");
            for (name, value) in params {
                pairs.append_pair(&format!("param_{}", name), value);
            }
        }
        url
    }

    async fn query_rows<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[(&str, &str)],
    ) -> anyhow::Result<Vec<T>> {
        let resp = self
            .client
            .post(self.query_url(params))
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("ClickHouse query failed: {} - {}", status, text.trim());
        }

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }
}

#[derive(Deserialize)]
struct CountRow {
    count: u64,
}

#[derive(Deserialize)]
struct DetailRow {
    id: String,
    function_name: String,
    variant_name: String,
    episode_id: String,
    timestamp: String,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    processing_time_ms: Option<u64>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    model_provider_name: Option<String>,
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    response_time_ms: Option<u64>,
    #[serde(default)]
    raw_request: Option<String>,
    #[serde(default)]
    raw_response: Option<String>,
}

#[derive(Deserialize)]
struct FeedbackRow {
    feedback_type: String,
    id: String,
    #[serde(default)]
    metric_name: String,
    value: String,
    timestamp: String,
}

impl DetailRow {
    fn into_detail(self, feedback: Vec<FeedbackRecord>) -> InferenceDetail {
        InferenceDetail {
            id: self.id,
            function_name: self.function_name,
            variant_name: self.variant_name,
            episode_id: self.episode_id,
            timestamp: self.timestamp,
            input: self
                .input
                .as_deref()
                .map(json_or_string)
                .unwrap_or(serde_json::Value::Null),
            output: self
                .output
                .as_deref()
                .map(json_or_string)
                .unwrap_or(serde_json::Value::Null),
            processing_time_ms: self.processing_time_ms,
            model_name: self.model_name,
            model_provider_name: self.model_provider_name,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            response_time_ms: self.response_time_ms,
            raw_request: self.raw_request,
            raw_response: self.raw_response,
            feedback,
        }
    }
}

impl FeedbackRow {
    fn into_record(self) -> Option<FeedbackRecord> {
        let kind = FeedbackKind::from_tag(&self.feedback_type)?;
        Some(FeedbackRecord {
            feedback_type: kind,
            id: self.id,
            metric_name: Some(self.metric_name).filter(|m| !m.is_empty()),
            value: feedback_value(kind, &self.value),
            timestamp: self.timestamp,
        })
    }
}

#[async_trait]
impl AnalyticsStore for ClickHouseAnalytics {
    async fn inference_count(&self, episode_id: &str) -> anyhow::Result<u64> {
        let rows: Vec<CountRow> = self
            .query_rows(COUNT_SQL, &[("episode_id", episode_id)])
            .await?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    async fn list_inferences(&self, episode_id: &str) -> anyhow::Result<Vec<InferenceSummary>> {
        self.query_rows(LIST_SQL, &[("episode_id", episode_id)])
            .await
    }

    async fn get_inference(&self, inference_id: &str) -> anyhow::Result<Option<InferenceDetail>> {
        let params = [("inference_id", inference_id)];
        let rows: Vec<DetailRow> = self.query_rows(DETAIL_SQL, &params).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let feedback_rows: Vec<FeedbackRow> = self.query_rows(FEEDBACK_SQL, &params).await?;
        let feedback = feedback_rows
            .into_iter()
            .filter_map(FeedbackRow::into_record)
            .collect();

        Ok(Some(row.into_detail(feedback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analytics_for(server: &MockServer) -> ClickHouseAnalytics {
        ClickHouseAnalytics::new(&ClickHouseConfig {
            url: server.uri(),
            user: "reader".to_string(),
            password: "secret".to_string(),
            database: "tensorzero".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn count_binds_episode_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("database", "tensorzero"))
            .and(query_param("param_episode_id", "ep-1"))
            .and(header("X-ClickHouse-User", "reader"))
            .and(header("X-ClickHouse-Key", "secret"))
            .and(body_string_contains("count()"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"count\":3}\n"))
            .mount(&server)
            .await;

        assert_eq!(analytics_for(&server).inference_count("ep-1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_parses_json_each_row() {
        let server = MockServer::start().await;
        let body = [
            json!({"id": "i1", "function_name": "investigate_issue", "variant_name": "v1",
                   "episode_id": "ep-1", "timestamp": "2026-01-01 00:00:00", "processing_time_ms": 900}),
            json!({"id": "i2", "function_name": "investigate_issue", "variant_name": "v1",
                   "episode_id": "ep-1", "timestamp": "2026-01-01 00:00:09", "processing_time_ms": null}),
        ]
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
        Mock::given(method("POST"))
            .and(body_string_contains("ORDER BY id ASC"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let rows = analytics_for(&server).list_inferences("ep-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].processing_time_ms, Some(900));
        assert_eq!(rows[1].processing_time_ms, None);
    }

    #[tokio::test]
    async fn detail_joins_feedback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("LEFT JOIN ModelInference"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({
                    "id": "i1", "function_name": "investigate_issue", "variant_name": "v1",
                    "episode_id": "ep-1", "timestamp": "2026-01-01 00:00:00",
                    "input": "{\"messages\":[]}", "output": "[{\"type\":\"text\",\"text\":\"hi\"}]",
                    "processing_time_ms": 120, "model_name": "gpt", "model_provider_name": "openai",
                    "input_tokens": 10, "output_tokens": 2, "response_time_ms": 100,
                    "raw_request": "{}", "raw_response": "{}"
                })
                .to_string(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("BooleanMetricFeedback"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                [
                    json!({"feedback_type": "boolean", "id": "f1", "metric_name": "resolved",
                           "value": "true", "timestamp": "2026-01-01 00:01:00"}),
                    json!({"feedback_type": "comment", "id": "f2", "metric_name": "",
                           "value": "nice", "timestamp": "2026-01-01 00:02:00"}),
                ]
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
            ))
            .mount(&server)
            .await;

        let detail = analytics_for(&server)
            .get_inference("i1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.input, json!({"messages": []}));
        assert_eq!(detail.model_name.as_deref(), Some("gpt"));
        assert_eq!(detail.feedback.len(), 2);
        assert_eq!(detail.feedback[0].value, json!(true));
        assert_eq!(detail.feedback[1].metric_name, None);
    }

    #[tokio::test]
    async fn missing_inference_skips_feedback_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        assert!(analytics_for(&server)
            .get_inference("i404")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Code: 60. Unknown table"))
            .mount(&server)
            .await;

        let err = analytics_for(&server).inference_count("ep").await.unwrap_err();
        assert!(err.to_string().contains("Unknown table"));
    }
}
