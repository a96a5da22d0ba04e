//! CLI command implementations

pub mod instance;
pub mod rollback;
pub mod unit;
