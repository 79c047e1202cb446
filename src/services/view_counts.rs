use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Source of display-only view counts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewCountProvider: Send + Sync {
    async fn view_counts(&self, ids: &[String]) -> AppResult<HashMap<String, u64>>;
}

/// Used when no view-tracking service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoViewCounts;

#[async_trait]
impl ViewCountProvider for NoViewCounts {
    async fn view_counts(&self, _ids: &[String]) -> AppResult<HashMap<String, u64>> {
        Ok(HashMap::new())
    }
}

#[derive(Debug, Deserialize)]
struct ViewCountResponse {
    #[serde(default)]
    counts: HashMap<String, u64>,
}

/// Client for the view-tracking service: `GET {base}/views?ids=a,b`
#[derive(Clone)]
pub struct HttpViewCounts {
    http_client: HttpClient,
    base_url: String,
}

impl HttpViewCounts {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ViewCountProvider for HttpViewCounts {
    async fn view_counts(&self, ids: &[String]) -> AppResult<HashMap<String, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/views", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[("ids", ids.join(","))])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApi(format!(
                "view count service returned status {}",
                status
            )));
        }

        let body: ViewCountResponse = response.json().await?;
        tracing::debug!(requested = ids.len(), returned = body.counts.len(), "Fetched view counts");
        Ok(body.counts)
    }
}
