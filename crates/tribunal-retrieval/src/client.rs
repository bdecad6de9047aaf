//! HTTP client for the external content-index service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tribunal_core::model::{ContextFragment, Question};
use tribunal_core::traits::ContextRetriever;

use crate::error::RetrievalError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for a content-index service exposing scoped fragment search.
///
/// The index owns ingestion and embedding; this client only issues queries,
/// always filtered to one exam's scope so no other exam's material leaks
/// into grading.
pub struct ContentIndexClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ContentIndexClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    scope: &'a str,
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    fragments: Vec<WireFragment>,
}

#[derive(Deserialize)]
struct WireFragment {
    source: String,
    #[serde(default)]
    locator: String,
    #[serde(default)]
    relevance: f32,
    text: String,
}

#[async_trait]
impl ContextRetriever for ContentIndexClient {
    #[instrument(skip(self, question), fields(question = %question.id, scope = %scope))]
    async fn retrieve(
        &self,
        question: &Question,
        scope: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ContextFragment>> {
        let body = QueryRequest {
            scope,
            query: &question.statement,
            limit: k,
        };

        let mut req = self
            .client
            .post(format!("{}/v1/query", self.base_url))
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout(DEFAULT_TIMEOUT_SECS)
            } else {
                RetrievalError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        // An unknown scope means no indexed material, which is a valid
        // empty result, not a failure.
        if status == 404 {
            return Ok(Vec::new());
        }
        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::AuthenticationFailed(body).into());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::ApiError {
                status,
                message: body,
            }
            .into());
        }

        let api_response: QueryResponse =
            response.json().await.map_err(|e| RetrievalError::ApiError {
                status: 0,
                message: format!("failed to parse query response: {e}"),
            })?;

        Ok(api_response
            .fragments
            .into_iter()
            .map(|f| ContextFragment {
                source: f.source,
                locator: f.locator,
                relevance: f.relevance,
                text: f.text,
            })
            .collect())
    }
}
