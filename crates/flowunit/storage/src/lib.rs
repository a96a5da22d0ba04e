//! Flowunit storage abstractions.
//!
//! This crate defines the transactional store behind the versioning engine:
//! - function unit version rows with an optimistic concurrency stamp
//! - definition snapshots owned 1:1 by a version
//! - access grants owned by a version
//! - process instances bound to exactly one version
//!
//! Every mutation runs inside a [`UnitTransaction`]. Committing validates the
//! rows and name scans the transaction read, and re-checks that each touched
//! unit name has exactly one active version. A failed commit applies nothing.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryUnitStore;
pub use model::{NewDefinition, NewVersion};
pub use traits::{UnitStore, UnitTransaction};
