use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SearchError;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// One result returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Web-search capability. An empty result list means "no results", not failure.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout_secs: u64,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Tavily search API client.
pub struct TavilyClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SearchError::Request {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: TAVILY_ENDPOINT.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout_secs: u64,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let body = serde_json::json!({
            "query": query,
            "max_results": max_results,
            "include_raw_content": false,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SearchError::AuthFailed);
        }
        let text = resp.text().await.map_err(|e| SearchError::Request {
            message: format!("failed to read search response: {}", e),
        })?;
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: TavilyResponse =
            serde_json::from_str(&text).map_err(|e| SearchError::ResponseParse {
                message: e.to_string(),
            })?;

        let mut hits = parsed.results;
        hits.truncate(max_results);
        debug!(query, results = hits.len(), "Search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tavily_response() {
        let json = r#"{
            "query": "solar",
            "results": [
                {"title": "Solar 2024", "url": "https://a.example", "content": "growth", "score": 0.91, "raw_content": null},
                {"title": "No score", "url": "https://b.example", "content": "text"}
            ]
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].score, Some(0.91));
        assert_eq!(parsed.results[1].score, None);
    }

    #[test]
    fn test_missing_results_is_empty() {
        let parsed: TavilyResponse = serde_json::from_str(r#"{"query": "x"}"#).unwrap();
        assert!(parsed.results.is_empty());
    }
}
