//! diskwarden - local disk-cleanup agent
//!
//! Finds reclaimable space, classifies it by category and safety tier, and
//! removes it reversibly: files go to a quarantine, optionally after a
//! backup snapshot, and both can be restored. Scans and clean tasks run on
//! worker threads and can be paused, resumed and stopped.
//!
//! [`orchestrator::TaskOrchestrator`] is the entry point for library users.

pub mod actions;
pub mod app;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod rules;
pub mod scanner;
pub mod signal;
pub mod store;

pub use app::run_app;
