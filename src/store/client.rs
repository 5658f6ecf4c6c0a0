//! Document store seam and the Elasticsearch REST client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use super::document::Document;

/// Operations the agent needs from the document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Succeeds once the store answers requests
    async fn ping(&self) -> Result<(), StoreError>;

    async fn index_exists(&self, index: &str) -> Result<bool, StoreError>;

    /// Create an index from a full body (settings and mappings)
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError>;

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), StoreError>;

    async fn index_document(&self, index: &str, document: &Document) -> Result<(), StoreError>;

    async fn close(&self) {}
}

/// Elasticsearch REST client
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ElasticClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        reqwest::Url::parse(url)
            .map_err(|e| StoreError::Config(format!("invalid store url '{}': {}", url, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("remora/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<(), StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception")
        {
            return Err(StoreError::AlreadyExists(body));
        }

        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DocumentStore for ElasticClient {
    async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .http_client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response).await
    }

    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        let response = self
            .http_client
            .head(self.url(index))
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Rejected {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError> {
        let response = self
            .http_client
            .put(self.url(index))
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response).await
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), StoreError> {
        let response = self
            .http_client
            .put(self.url(&format!("{}/_mapping", index)))
            .json(mapping)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response).await
    }

    async fn index_document(&self, index: &str, document: &Document) -> Result<(), StoreError> {
        let response = self
            .http_client
            .post(self.url(&format!("{}/_doc", index)))
            .json(document)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response).await
    }

    async fn close(&self) {
        tracing::debug!(url = %self.base_url, "closing store client");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Index already exists: {0}")]
    AlreadyExists(String),

    #[error("Store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}
