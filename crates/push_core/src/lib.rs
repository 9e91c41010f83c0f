pub mod aggregate;
pub mod cleanup;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod policy;
pub mod sas;
pub mod store;
pub mod tokens;

pub use crate::engine::{Reconciler, ReconcilerBuilder, RunReport};
pub use crate::error::{Error, Result};
