//! Workflow engine seam
//!
//! The workflow runtime is opaque to this crate: it accepts definitions under
//! a deterministic key and starts executions of a previously deployed key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// What the engine reports back after accepting a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,
    pub definition_key: String,
    pub name: String,
    pub deployed_at: DateTime<Utc>,
}

/// Workflow engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow engine returned no deployment for {0}")]
    NoDeploymentRecord(String),

    #[error("workflow engine rejected request: {0}")]
    Rejected(String),

    #[error("workflow engine unavailable: {0}")]
    Unavailable(String),
}

/// External workflow deployer and executor
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Deploy `raw_definition` under `definition_key`. `None` means the engine
    /// accepted the call but produced no deployment, which callers treat as failure.
    async fn deploy(
        &self,
        definition_key: &str,
        raw_definition: &str,
        display_name: &str,
    ) -> Result<Option<DeploymentRecord>, EngineError>;

    /// Start an execution of a deployed key and return its execution id.
    async fn start_instance(
        &self,
        definition_key: &str,
        variables: &serde_json::Value,
        user_id: &str,
    ) -> Result<String, EngineError>;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// An execution started by [`InMemoryWorkflowEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct StartedExecution {
    pub execution_id: String,
    pub definition_key: String,
    pub variables: serde_json::Value,
    pub user_id: String,
}

/// In-memory workflow engine for development and tests
pub struct InMemoryWorkflowEngine {
    deployments: DashMap<String, DeploymentRecord>,
    executions: DashMap<String, StartedExecution>,
    sequence: AtomicU64,
    fail_deploys: AtomicBool,
    withhold_records: AtomicBool,
}

impl InMemoryWorkflowEngine {
    pub fn new() -> Self {
        Self {
            deployments: DashMap::new(),
            executions: DashMap::new(),
            sequence: AtomicU64::new(0),
            fail_deploys: AtomicBool::new(false),
            withhold_records: AtomicBool::new(false),
        }
    }

    /// Make every deploy fail with [`EngineError::Unavailable`]
    pub fn set_fail_deploys(&self, fail: bool) {
        self.fail_deploys.store(fail, Ordering::SeqCst);
    }

    /// Make every deploy succeed without returning a record
    pub fn set_withhold_records(&self, withhold: bool) {
        self.withhold_records.store(withhold, Ordering::SeqCst);
    }

    pub fn deployment(&self, definition_key: &str) -> Option<DeploymentRecord> {
        self.deployments.get(definition_key).map(|d| d.clone())
    }

    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    pub fn execution(&self, execution_id: &str) -> Option<StartedExecution> {
        self.executions.get(execution_id).map(|e| e.clone())
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

impl Default for InMemoryWorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn deploy(
        &self,
        definition_key: &str,
        _raw_definition: &str,
        display_name: &str,
    ) -> Result<Option<DeploymentRecord>, EngineError> {
        if self.fail_deploys.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("deploys disabled".to_string()));
        }
        if self.withhold_records.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let record = DeploymentRecord {
            deployment_id: self.next_id("deployment"),
            definition_key: definition_key.to_string(),
            name: display_name.to_string(),
            deployed_at: Utc::now(),
        };
        self.deployments
            .insert(definition_key.to_string(), record.clone());
        Ok(Some(record))
    }

    async fn start_instance(
        &self,
        definition_key: &str,
        variables: &serde_json::Value,
        user_id: &str,
    ) -> Result<String, EngineError> {
        if !self.deployments.contains_key(definition_key) {
            return Err(EngineError::Rejected(format!(
                "no deployed definition with key {definition_key}"
            )));
        }
        let execution_id = self.next_id("exec");
        self.executions.insert(
            execution_id.clone(),
            StartedExecution {
                execution_id: execution_id.clone(),
                definition_key: definition_key.to_string(),
                variables: variables.clone(),
                user_id: user_id.to_string(),
            },
        );
        Ok(execution_id)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_then_start() {
        let engine = InMemoryWorkflowEngine::new();
        let record = engine
            .deploy("leave_v1.0.0", "<definitions/>", "leave (v1.0.0)")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.definition_key, "leave_v1.0.0");

        let exec = engine
            .start_instance("leave_v1.0.0", &serde_json::json!({"days": 2}), "u-1")
            .await
            .unwrap();
        assert_eq!(engine.execution(&exec).unwrap().user_id, "u-1");
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let engine = InMemoryWorkflowEngine::new();
        engine.set_withhold_records(true);
        assert!(engine.deploy("k", "<x/>", "k").await.unwrap().is_none());

        engine.set_fail_deploys(true);
        assert!(engine.deploy("k", "<x/>", "k").await.is_err());
        assert_eq!(engine.deployment_count(), 0);

        let err = engine
            .start_instance("missing", &serde_json::Value::Null, "u")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }
}
