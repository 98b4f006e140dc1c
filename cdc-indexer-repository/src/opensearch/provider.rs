//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! using the OpenSearch Rust crate.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use opensearch::{
    http::request::JsonBody,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    BulkParts, DeleteParts, OpenSearch,
};
use serde_json::Value;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::opensearch::bulk;
use crate::opensearch::index_config::{get_index_settings, IndexConfig};
use crate::types::{BatchOperationSummary, BulkAction, DeleteDocumentRequest};

/// Base delay of the transport retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Upper bound of a single transport retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// OpenSearch provider implementation.
///
/// # Example
///
/// ```ignore
/// use cdc_indexer_repository::opensearch::IndexConfig;
/// let urls = ["http://localhost:9200".to_string()];
/// let provider = OpenSearchProvider::new(&urls, IndexConfig::new(3)).await?;
/// provider.ensure_index_exists().await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
    index_config: IndexConfig,
}

impl OpenSearchProvider {
    /// Create a new OpenSearch provider.
    ///
    /// No request is sent; reachability is checked by `ensure_index_exists`.
    ///
    /// # Arguments
    ///
    /// * `urls` - OpenSearch node URLs; requests go to the first one
    /// * `index_config` - Settings of the resource indices
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A new provider instance
    /// * `Err(SearchIndexError)` - If no URL is given or the transport can't be built
    pub async fn new(urls: &[String], index_config: IndexConfig) -> Result<Self, SearchIndexError> {
        let url = urls
            .first()
            .ok_or_else(|| SearchIndexError::connection("No OpenSearch URL configured"))?;
        if urls.len() > 1 {
            warn!(
                url = %url,
                ignored = urls.len() - 1,
                "Multiple OpenSearch URLs configured, using the first one"
            );
        }

        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            indices = ?index_config.indices,
            max_retries = index_config.max_retries,
            "Created OpenSearch provider"
        );

        Ok(Self {
            client,
            index_config,
        })
    }

    /// Send a request, re-sending it with backoff while it fails at the transport level.
    async fn send_with_retry<F, Fut>(&self, mut request: F) -> Result<Response, SearchIndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response, opensearch::Error>>,
    {
        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(self.index_config.max_retries);

        RetryIf::spawn(
            strategy,
            || {
                let response = request();
                async move {
                    response
                        .await
                        .map_err(|e| SearchIndexError::connection(e.to_string()))
                }
            },
            |e: &SearchIndexError| {
                let transient = e.is_transient();
                if transient {
                    warn!(error = %e, "OpenSearch request failed, retrying");
                }
                transient
            },
        )
        .await
    }

    /// Create `index` unless it already exists.
    async fn ensure_single_index(&self, index: &str) -> Result<(), SearchIndexError> {
        let names = [index];
        let response = self
            .send_with_retry(|| {
                let indices = self.client.indices();
                async move {
                    indices
                        .exists(IndicesExistsParts::Index(&names))
                        .send()
                        .await
                }
            })
            .await?;

        if response.status_code().is_success() {
            debug!(index = %index, "Index already exists");
            return Ok(());
        }

        let settings = get_index_settings(&self.index_config);
        let response = self
            .send_with_retry(|| {
                let indices = self.client.indices();
                let body = settings.clone();
                async move {
                    indices
                        .create(IndicesCreateParts::Index(index))
                        .body(body)
                        .send()
                        .await
                }
            })
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            // Another indexer instance may have created it in between.
            if error_body.contains("resource_already_exists_exception") {
                debug!(index = %index, "Index created concurrently");
                return Ok(());
            }
            error!(index = %index, status = %status, body = %error_body, "Index creation failed");
            return Err(SearchIndexError::index_creation(format!(
                "Creating index {} failed with status {}: {}",
                index, status, error_body
            )));
        }

        info!(index = %index, "Index created");
        Ok(())
    }
}

#[async_trait]
impl SearchIndexProvider for OpenSearchProvider {
    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError> {
        for index in &self.index_config.indices {
            self.ensure_single_index(index).await?;
        }
        Ok(())
    }

    /// Delete a document from its index.
    ///
    /// A 404 response is treated as success: the document is absent either way.
    async fn delete_document(
        &self,
        request: &DeleteDocumentRequest,
    ) -> Result<(), SearchIndexError> {
        if request.id.is_empty() {
            return Err(SearchIndexError::validation("Document id cannot be empty"));
        }

        let response = self
            .send_with_retry(|| {
                self.client
                    .delete(DeleteParts::IndexId(&request.index, &request.id))
                    .send()
            })
            .await?;

        let status = response.status_code();

        // 404 is acceptable - document may not exist
        if !status.is_success() && status.as_u16() != 404 {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Delete request failed");
            return Err(SearchIndexError::delete(format!(
                "Delete of {}/{} failed with status {}: {}",
                request.index, request.id, status, error_body
            )));
        }

        debug!(index = %request.index, doc_id = %request.id, "Document deleted");
        Ok(())
    }

    /// Send all actions as one `_bulk` request.
    ///
    /// An empty slice issues no request.
    async fn bulk(
        &self,
        actions: &[BulkAction],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        if actions.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        let lines = bulk::encode_bulk_lines(actions);

        let response = self
            .send_with_retry(|| {
                let body: Vec<JsonBody<Value>> =
                    lines.iter().cloned().map(JsonBody::new).collect();
                self.client.bulk(BulkParts::None).body(body).send()
            })
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Bulk request failed");
            return Err(SearchIndexError::bulk_index(format!(
                "Bulk request failed with status {}: {}",
                status, error_body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;

        let summary = bulk::parse_bulk_response(&body, actions)?;

        debug!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Bulk request completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_requires_url() {
        let result = OpenSearchProvider::new(&[], IndexConfig::default()).await;
        assert!(matches!(result, Err(SearchIndexError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_url() {
        let result =
            OpenSearchProvider::new(&["not a url".to_string()], IndexConfig::default()).await;
        assert!(matches!(result, Err(SearchIndexError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_empty_bulk_sends_nothing() {
        // Nothing listens on this port; an issued request would fail.
        let provider = OpenSearchProvider::new(
            &["http://127.0.0.1:1".to_string()],
            IndexConfig::new(0),
        )
        .await
        .unwrap();

        let summary = provider.bulk(&[]).await.unwrap();
        assert_eq!(summary.total, 0);
    }
}
