pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::storage::{LocalStorage, MemoryStorage};
pub use config::MonitorConfig;
pub use core::workflow::{RunOutcome, RunReport, Workflow, WorkflowConfig};
pub use utils::error::{MonitorError, Result};
