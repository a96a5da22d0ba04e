//! Flowunit Deployment Engine
//!
//! Deploys new versions of function units and rolls them back.
//!
//! ## Deployment
//!
//! A deployment is one unit of work: reserve the next version, record it
//! inactive, hand the definition to the workflow engine, store the definition
//! snapshot, inherit the predecessor's grants and finally activate. Activation
//! is always the last step, so an abort anywhere earlier leaves the previous
//! active version in place. Concurrent-write conflicts are retried with linear
//! backoff; every other failure propagates immediately.
//!
//! ## Rollback
//!
//! Rollback is destructive. It deletes every version semantically newer than
//! the target together with their process instances, definitions and grants,
//! then reactivates the target, all in one transaction. The impact can be
//! previewed first without mutating anything.
//!
//! ## Usage
//!
//! ```no_run
//! use flowunit_deployment::FunctionUnitService;
//! use flowunit_registry::InMemoryWorkflowEngine;
//! use flowunit_storage::InMemoryUnitStore;
//! use flowunit_types::ChangeType;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FunctionUnitService::new(
//!     Arc::new(InMemoryUnitStore::new()),
//!     Arc::new(InMemoryWorkflowEngine::new()),
//! );
//!
//! let deployed = service
//!     .deploy("leave_request", "<definitions/>", ChangeType::Minor, serde_json::json!({}))
//!     .await?;
//! println!("deployed {} as {}", deployed.version, deployed.definition_key);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod display;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod rollback;
pub mod service;

// Re-exports
pub use display::{FunctionUnitDisplay, VersionHistoryDisplay, VersionHistoryEntry};
pub use error::{DeploymentError, Result};
pub use orchestrator::{DeploymentOrchestrator, DeploymentOutcome};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use rollback::{
    rollback_warning, RollbackExecutor, RollbackImpact, RollbackOutcome, RollbackPlanner,
};
pub use service::{FunctionUnitService, RollbackResponse};
