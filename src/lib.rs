pub mod cleanup;
pub mod config;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod orchestrator;
pub mod report;
pub mod store;
pub mod workload;
