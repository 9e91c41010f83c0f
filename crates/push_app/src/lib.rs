pub mod config;
pub mod job;
pub mod lock;

pub use crate::config::JobConfig;
pub use crate::job::run;
