//! Flowunit registry
//!
//! Per-unit version bookkeeping on top of the unit store:
//! - `VersionRegistry`: next-version generation, activation, history and the
//!   single-active consistency check
//! - `PermissionInheritance`: copying access grants onto a new version
//! - `ProcessBindingStore`: starting instances bound to the active version
//! - `WorkflowEngine`: the external deployer/executor the registry talks to
//!
//! Every operation also has a transaction-scoped `*_in` form so that the
//! deployment crate can compose several of them into one unit of work.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod binding;
pub mod engine;
pub mod error;
pub mod permission;
pub mod version;

// Re-exports
pub use binding::{ProcessBindingStore, StartInstance};
pub use engine::{
    DeploymentRecord, EngineError, InMemoryWorkflowEngine, StartedExecution, WorkflowEngine,
};
pub use error::{RegistryError, Result};
pub use permission::PermissionInheritance;
pub use version::VersionRegistry;
