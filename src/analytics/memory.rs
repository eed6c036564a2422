//! In-memory analytics store (for tests and local runs without ClickHouse).

use super::{AnalyticsStore, InferenceDetail, InferenceSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryAnalytics {
    inferences: Arc<RwLock<HashMap<String, InferenceDetail>>>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, detail: InferenceDetail) {
        self.inferences
            .write()
            .await
            .insert(detail.id.clone(), detail);
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalytics {
    async fn inference_count(&self, episode_id: &str) -> anyhow::Result<u64> {
        Ok(self
            .inferences
            .read()
            .await
            .values()
            .filter(|i| i.episode_id == episode_id)
            .count() as u64)
    }

    async fn list_inferences(&self, episode_id: &str) -> anyhow::Result<Vec<InferenceSummary>> {
        let mut rows: Vec<InferenceSummary> = self
            .inferences
            .read()
            .await
            .values()
            .filter(|i| i.episode_id == episode_id)
            .map(|i| InferenceSummary {
                id: i.id.clone(),
                function_name: i.function_name.clone(),
                variant_name: i.variant_name.clone(),
                episode_id: i.episode_id.clone(),
                timestamp: i.timestamp.clone(),
                processing_time_ms: i.processing_time_ms,
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn get_inference(&self, inference_id: &str) -> anyhow::Result<Option<InferenceDetail>> {
        Ok(self.inferences.read().await.get(inference_id).cloned())
    }
}
