//! HTTP client for an external workflow engine

use crate::error::CliResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowunit_registry::{DeploymentRecord, EngineError, WorkflowEngine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Workflow engine reached over HTTP
pub struct HttpWorkflowEngine {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    key: &'a str,
    name: &'a str,
    definition: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    id: String,
    #[serde(default)]
    deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    definition_key: &'a str,
    variables: &'a serde_json::Value,
    start_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

impl HttpWorkflowEngine {
    pub fn new(base_url: &str, timeout: Duration) -> CliResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn unavailable(err: reqwest::Error) -> EngineError {
    EngineError::Unavailable(err.to_string())
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn deploy(
        &self,
        definition_key: &str,
        raw_definition: &str,
        display_name: &str,
    ) -> Result<Option<DeploymentRecord>, EngineError> {
        let response = self
            .client
            .post(self.url("/deployments"))
            .json(&DeployRequest {
                key: definition_key,
                name: display_name,
                definition: raw_definition,
            })
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            warn!(%status, definition_key, "Engine produced no deployment");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(format!("{status}: {message}")));
        }

        let body = response.text().await.map_err(unavailable)?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<DeployResponse>(&body) {
            Ok(parsed) => {
                debug!(deployment_id = %parsed.id, definition_key, "Engine deployment recorded");
                Ok(Some(DeploymentRecord {
                    deployment_id: parsed.id,
                    definition_key: definition_key.to_string(),
                    name: display_name.to_string(),
                    deployed_at: parsed.deployed_at.unwrap_or_else(Utc::now),
                }))
            }
            Err(err) => {
                warn!(error = %err, definition_key, "Unreadable deployment response");
                Ok(None)
            }
        }
    }

    async fn start_instance(
        &self,
        definition_key: &str,
        variables: &serde_json::Value,
        user_id: &str,
    ) -> Result<String, EngineError> {
        let response = self
            .client
            .post(self.url("/process-instances"))
            .json(&StartRequest {
                definition_key,
                variables,
                start_user_id: user_id,
            })
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                EngineError::Unavailable(format!("{status}: {message}"))
            } else {
                EngineError::Rejected(format!("{status}: {message}"))
            });
        }
        let started: StartResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Rejected(format!("unreadable start response: {e}")))?;
        Ok(started.id)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn engine(base: &str) -> HttpWorkflowEngine {
        HttpWorkflowEngine::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_base_url_normalization() {
        let engine = engine("http://localhost:8080/");
        assert_eq!(engine.url("/deployments"), "http://localhost:8080/deployments");
    }

    #[tokio::test]
    async fn test_deploy_with_body_is_record() {
        let base = serve_once("200 OK", r#"{"id":"dep-7"}"#).await;
        let record = engine(&base)
            .deploy("leave_v1.0.0", "<definitions/>", "leave (v1.0.0)")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.deployment_id, "dep-7");
        assert_eq!(record.definition_key, "leave_v1.0.0");
        assert_eq!(record.name, "leave (v1.0.0)");
    }

    #[tokio::test]
    async fn test_deploy_without_result_is_none() {
        let base = serve_once("200 OK", "").await;
        assert!(engine(&base)
            .deploy("leave_v1.0.0", "<definitions/>", "leave (v1.0.0)")
            .await
            .unwrap()
            .is_none());

        let base = serve_once("503 Service Unavailable", "").await;
        assert!(engine(&base)
            .deploy("leave_v1.0.0", "<definitions/>", "leave (v1.0.0)")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_start_instance_returns_id() {
        let base = serve_once("201 Created", r#"{"id":"exec-42"}"#).await;
        let id = engine(&base)
            .start_instance("leave_v1.0.0", &serde_json::json!({"days": 2}), "alice")
            .await
            .unwrap();
        assert_eq!(id, "exec-42");

        let base = serve_once("400 Bad Request", "unknown key").await;
        let err = engine(&base)
            .start_instance("ghost_v1.0.0", &serde_json::json!({}), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = engine(&format!("http://{addr}"))
            .deploy("leave_v1.0.0", "<definitions/>", "leave (v1.0.0)")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
