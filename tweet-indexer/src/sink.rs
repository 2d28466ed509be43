use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{config::ElasticConfig, error::SinkError, types::BufferEntry};

/// What the store reported back for an accepted bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSummary {
    pub indexed: usize,
}

/// Writes a batch of documents to their destination indices in one request.
#[async_trait]
pub trait BulkSink: Send + Sync {
    async fn write_batch(&self, batch: &[BufferEntry]) -> Result<BulkSummary, SinkError>;
}

/// Bulk writer for the Elasticsearch `_bulk` endpoint.
pub struct ElasticsearchSink {
    client: reqwest::Client,
    bulk_url: String,
    refresh: String,
}

#[derive(Deserialize, Debug)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

#[derive(Deserialize, Debug)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    error: Option<Value>,
}

impl ElasticsearchSink {
    pub fn new(config: &ElasticConfig) -> Result<Self, SinkError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/x-ndjson"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("tweet-indexer")
            .timeout(config.elastic_request_timeout_ms.0)
            .build()?;

        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", config.elastic_address.trim_end_matches('/')),
            refresh: config.elastic_bulk_refresh.clone(),
        })
    }
}

/// Builds the newline delimited bulk body: an index action line per document, followed by the
/// document itself.
pub fn bulk_body(batch: &[BufferEntry]) -> Vec<u8> {
    let payload_size: usize = batch.iter().map(|e| e.payload.len() + 48).sum();
    let mut body = Vec::with_capacity(payload_size);

    for entry in batch {
        let action = serde_json::json!({ "index": { "_index": &*entry.index } });
        body.extend_from_slice(action.to_string().as_bytes());
        body.push(b'\n');
        body.extend_from_slice(&entry.payload);
        body.push(b'\n');
    }
    body
}

#[async_trait]
impl BulkSink for ElasticsearchSink {
    async fn write_batch(&self, batch: &[BufferEntry]) -> Result<BulkSummary, SinkError> {
        let response = self
            .client
            .post(&self.bulk_url)
            .query(&[("refresh", self.refresh.as_str())])
            .body(bulk_body(batch))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: BulkResponse =
            serde_json::from_slice(&body).map_err(SinkError::InvalidResponse)?;
        check_items(parsed, batch.len())
    }
}

fn check_items(response: BulkResponse, total: usize) -> Result<BulkSummary, SinkError> {
    let failures: Vec<&BulkItem> = response
        .items
        .iter()
        .flat_map(|item| item.values())
        .filter(|item| item.error.is_some() || item.status >= 300)
        .collect();

    if failures.is_empty() && !response.errors {
        debug!(total, "Bulk request fully indexed");
        return Ok(BulkSummary { indexed: total });
    }

    let first_error = failures
        .first()
        .and_then(|item| item.error.as_ref())
        .map(Value::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    Err(SinkError::PartialFailure {
        // The errors flag is authoritative even when no item could be blamed.
        failed: failures.len().max(1),
        total,
        first_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::config::EnvMsDuration;

    fn entry(index: &str, payload: Value) -> BufferEntry {
        BufferEntry {
            index: Arc::from(index),
            payload: payload.to_string().into_bytes(),
        }
    }

    fn sink_for(server: &MockServer) -> ElasticsearchSink {
        ElasticsearchSink::new(&ElasticConfig {
            elastic_address: server.base_url(),
            elastic_users_index: "users".to_string(),
            elastic_tweets_index: "tweets".to_string(),
            elastic_bulk_refresh: "false".to_string(),
            elastic_request_timeout_ms: EnvMsDuration(Duration::from_secs(5)),
        })
        .unwrap()
    }

    #[test]
    fn test_bulk_body_keeps_buffer_order() {
        let batch = vec![
            entry("users", json!({"id": "1"})),
            entry("tweets", json!({"message": "a"})),
            entry("users", json!({"id": "2"})),
        ];

        let body = String::from_utf8(bulk_body(&batch)).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(
            lines,
            vec![
                r#"{"index":{"_index":"users"}}"#,
                r#"{"id":"1"}"#,
                r#"{"index":{"_index":"tweets"}}"#,
                r#"{"message":"a"}"#,
                r#"{"index":{"_index":"users"}}"#,
                r#"{"id":"2"}"#,
            ]
        );
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_write_batch_success() {
        let server = MockServer::start_async().await;
        let batch = vec![
            entry("users", json!({"id": "1"})),
            entry("tweets", json!({"message": "a"})),
        ];
        let expected_body = String::from_utf8(bulk_body(&batch)).unwrap();

        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path("/_bulk")
                .query_param("refresh", "false")
                .body(expected_body);
            then.status(200).json_body(json!({
                "took": 3,
                "errors": false,
                "items": [
                    {"index": {"_index": "users", "status": 201}},
                    {"index": {"_index": "tweets", "status": 201}}
                ]
            }));
        })
        .await;

        let summary = sink_for(&server).write_batch(&batch).await.unwrap();

        mock.assert_async().await;
        assert_eq!(summary, BulkSummary { indexed: 2 });
    }

    #[tokio::test]
    async fn test_write_batch_detects_partial_failure() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/_bulk");
            then.status(200).json_body(json!({
                "took": 3,
                "errors": true,
                "items": [
                    {"index": {"_index": "users", "status": 201}},
                    {"index": {"_index": "tweets", "status": 400, "error": {
                        "type": "mapper_parsing_exception",
                        "reason": "failed to parse field [city]"
                    }}}
                ]
            }));
        })
        .await;

        let batch = vec![
            entry("users", json!({"id": "1"})),
            entry("tweets", json!({"message": "a"})),
        ];
        let err = sink_for(&server).write_batch(&batch).await.unwrap_err();

        match err {
            SinkError::PartialFailure {
                failed,
                total,
                first_error,
            } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
                assert!(first_error.contains("mapper_parsing_exception"));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_batch_rejected() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/_bulk");
            then.status(503).body("cluster unavailable");
        })
        .await;

        let err = sink_for(&server)
            .write_batch(&[entry("users", json!({"id": "1"}))])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SinkError::Status { status: 503, ref body } if body == "cluster unavailable"
        ));
    }

    #[tokio::test]
    async fn test_write_batch_unreachable() {
        let sink = ElasticsearchSink::new(&ElasticConfig {
            elastic_address: "http://127.0.0.1:1".to_string(),
            elastic_users_index: "users".to_string(),
            elastic_tweets_index: "tweets".to_string(),
            elastic_bulk_refresh: "false".to_string(),
            elastic_request_timeout_ms: EnvMsDuration(Duration::from_secs(1)),
        })
        .unwrap();

        let err = sink
            .write_batch(&[entry("users", json!({"id": "1"}))])
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Request(_)));
    }
}
